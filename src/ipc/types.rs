use std::path::PathBuf;

use crate::config::Config;
use crate::error::AppResult;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Session context for this call: `Bearer <access token>`.
    #[serde(default)]
    pub authorization: Option<String>,
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            workspace: None,
            db: None,
        }
    }
}

/// Successful handler output before it is wrapped in the envelope.
pub struct Reply {
    pub message: String,
    pub data: serde_json::Value,
}

impl Reply {
    pub fn new(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }
}

pub type HandlerResult = AppResult<Reply>;
