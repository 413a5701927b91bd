use std::sync::Arc;

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::repo::SqliteStore;
use crate::services::booking::BookingEngine;

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<SqliteStore>,
    pub engine: BookingEngine,
}

impl AppState {
    pub fn new(config: AppConfig, conn: Connection) -> Self {
        let store = Arc::new(SqliteStore::new(conn));
        let engine = BookingEngine::new(store.clone(), store.clone(), store.clone());
        Self {
            config,
            store,
            engine,
        }
    }
}
