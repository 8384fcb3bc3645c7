use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::grading::RubricFlags;

pub const CONFIG_ENV: &str = "DASHBOARDD_CONFIG";
pub const DB_ENV: &str = "DASHBOARDD_DB";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardConfig {
    /// Opened at startup when set.
    pub database: Option<PathBuf>,
    /// Extra schemas: alias -> database file.
    pub attach: BTreeMap<String, PathBuf>,
    /// Upper bound on detected items per table.
    pub max_items: Option<usize>,
    pub preferred_tables: Vec<String>,
    pub default_limit: usize,
    pub min_limit: usize,
    pub max_limit: usize,
    pub summary_chars: usize,
    pub rubric_flags: RubricFlags,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            database: None,
            attach: BTreeMap::new(),
            max_items: None,
            preferred_tables: vec!["DAT3".into(), "DAT2".into(), "DAT1".into()],
            default_limit: 500,
            min_limit: 10,
            max_limit: 2000,
            summary_chars: 120,
            rubric_flags: RubricFlags::builtin(),
        }
    }
}

impl DashboardConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.to_string_lossy()))?;
        let cfg: DashboardConfig = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.to_string_lossy()))?;
        Ok(cfg)
    }

    /// `DASHBOARDD_CONFIG` (if set) then `DASHBOARDD_DB` on top.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var_os(CONFIG_ENV) {
            Some(p) if !p.is_empty() => Self::load(Path::new(&p))?,
            _ => Self::default(),
        };
        if let Some(db) = std::env::var_os(DB_ENV).filter(|v| !v.is_empty()) {
            cfg.database = Some(PathBuf::from(db));
        }
        Ok(cfg)
    }

    pub fn clamp_limit(&self, requested: Option<i64>) -> usize {
        let Some(n) = requested else {
            return self.default_limit;
        };
        let n = usize::try_from(n).unwrap_or(0);
        n.clamp(self.min_limit, self.max_limit.max(self.min_limit))
    }
}
