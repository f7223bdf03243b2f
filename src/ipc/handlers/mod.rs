pub mod auth;
pub mod core;
pub mod dashboard;
pub mod parents;
pub mod schools;
pub mod students;
pub mod teachers;
