//! Connection authentication. Runs once per connection, before the WebSocket
//! upgrade; a session that fails here never reaches the hub.

use axum_extra::extract::CookieJar;
use thiserror::Error;
use tracing::debug;

use super::token::validate_session_token;
use crate::db::directory::{Directory, StoreError};

/// Cookie that carries the signed session token.
pub const SESSION_COOKIE: &str = "token";

/// Who a connection belongs to, fixed for the connection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("missing token")]
    MissingToken,

    #[error("invalid token")]
    InvalidToken,

    #[error("user not found")]
    UserNotFound,

    #[error("identity lookup failed: {0}")]
    Store(#[from] StoreError),
}

impl AuthenticationError {
    /// Body of the 401 sent back on a refused handshake. Store failures stay
    /// in the server log.
    pub fn client_message(&self) -> String {
        match self {
            Self::Store(_) => "Authentication error".to_string(),
            other => format!("Authentication error: {other}"),
        }
    }
}

/// Resolve the handshake cookies to an identity.
pub async fn authenticate(
    jar: &CookieJar,
    jwt_secret: &str,
    directory: &Directory,
) -> Result<Identity, AuthenticationError> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value())
        .filter(|v| !v.is_empty())
        .ok_or(AuthenticationError::MissingToken)?;

    let claims = validate_session_token(token, jwt_secret).map_err(|e| {
        debug!(error = %e, "rejected handshake token");
        AuthenticationError::InvalidToken
    })?;

    let user = directory
        .find_user(&claims.id)
        .await?
        .ok_or(AuthenticationError::UserNotFound)?;

    Ok(Identity {
        user_id: user.id,
        display_name: user.name,
    })
}
