use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::DashboardConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: DashboardConfig,
    pub db_path: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Why the last open failed; shown by `health` while offline.
    pub db_error: Option<String>,
}

impl AppState {
    pub fn new(config: DashboardConfig) -> Self {
        Self {
            config,
            db_path: None,
            db: None,
            db_error: None,
        }
    }

    pub fn db_status(&self) -> String {
        match (&self.db, &self.db_error) {
            (Some(_), _) => "ONLINE".to_string(),
            (None, Some(e)) => format!("OFFLINE: {}", e),
            (None, None) => "OFFLINE: no database selected".to_string(),
        }
    }
}
