use std::sync::Arc;

use crate::auth::config::AuthConfig;
use crate::engine::hub::Hub;

/// Shared state for axum handlers.
pub struct AppState {
    pub hub: Arc<Hub>,
    pub auth_config: AuthConfig,
    /// Browser origin allowed to open credentialed connections.
    pub frontend_url: String,
}
