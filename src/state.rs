use std::sync::Arc;
use std::time::Duration;

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::{PgPool, PgPooledConnection},
    error::{AppError, AppResult},
    storage::ObjectStorage,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        jwt: JwtService,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            storage,
            jwt,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }

    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.config.presigned_url_expiry_seconds)
    }
}
