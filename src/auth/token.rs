use crate::config::Config;
use crate::error::{AppError, AppResult};
use anyhow::anyhow;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signing material. Access and refresh tokens use separate secrets.
#[derive(Clone)]
pub struct TokenKeys {
    access_secret: String,
    refresh_secret: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl std::fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKeys")
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .finish_non_exhaustive()
    }
}

impl TokenKeys {
    pub fn new(
        access_secret: impl Into<String>,
        refresh_secret: impl Into<String>,
        access_ttl_secs: i64,
        refresh_ttl_secs: i64,
    ) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    pub fn from_config(cfg: &Config) -> AppResult<Self> {
        match (&cfg.jwt_secret, &cfg.jwt_refresh_secret) {
            (Some(access), Some(refresh)) => Ok(Self::new(
                access.clone(),
                refresh.clone(),
                cfg.access_ttl_secs,
                cfg.refresh_ttl_secs,
            )),
            _ => Err(AppError::Fault(anyhow!(
                "SMARTQ_JWT_SECRET and SMARTQ_JWT_REFRESH_SECRET must both be set"
            ))),
        }
    }

    fn secret(&self, kind: TokenKind) -> &[u8] {
        match kind {
            TokenKind::Access => self.access_secret.as_bytes(),
            TokenKind::Refresh => self.refresh_secret.as_bytes(),
        }
    }

    fn ttl(&self, kind: TokenKind) -> i64 {
        match kind {
            TokenKind::Access => self.access_ttl_secs,
            TokenKind::Refresh => self.refresh_ttl_secs,
        }
    }

    pub fn mint(&self, kind: TokenKind, user_id: i64, role: Option<&str>) -> AppResult<String> {
        self.mint_at(kind, user_id, role, chrono::Utc::now().timestamp())
    }

    pub fn mint_at(
        &self,
        kind: TokenKind,
        user_id: i64,
        role: Option<&str>,
        now: i64,
    ) -> AppResult<String> {
        let claims = Claims {
            id: user_id,
            role: role.map(str::to_string),
            kind,
            iat: now,
            exp: now + self.ttl(kind),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret(kind)),
        )
        .map_err(|e| AppError::Fault(anyhow!("token signing failed: {e}")))
    }

    /// Checks signature, expiry and kind. Every failure is `Unauthenticated`.
    pub fn verify(&self, kind: TokenKind, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &DecodingKey::from_secret(self.secret(kind)), &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, ?kind, "token rejected");
                AppError::unauthenticated("invalid or expired token")
            })?;
        if data.claims.kind != kind {
            return Err(AppError::unauthenticated("invalid or expired token"));
        }
        Ok(data.claims)
    }
}
