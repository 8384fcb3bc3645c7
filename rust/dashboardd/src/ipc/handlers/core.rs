use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::selection::required_str;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schema;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "dbStatus": state.db_status(),
            "dbPath": state.db_path.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

/// Open (or re-open) the database. On failure the previous connection is
/// dropped so no stale data is served.
pub fn open_into_state(state: &mut AppState, path: &Path, attach: &BTreeMap<String, PathBuf>) -> bool {
    state.db = None;
    state.db_path = Some(path.to_path_buf());
    match db::open_db(path, attach) {
        Ok(conn) => {
            state.db = Some(conn);
            state.db_error = None;
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "database unavailable");
            state.db_error = Some(e.to_string());
            false
        }
    }
}

fn parse_attach(req: &Request) -> Result<Option<BTreeMap<String, PathBuf>>, serde_json::Value> {
    let Some(raw) = req.params.get("attach") else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Some(obj) = raw.as_object() else {
        return Err(err(&req.id, "bad_params", "attach must be an object", None));
    };
    let mut out = BTreeMap::new();
    for (alias, v) in obj {
        let Some(p) = v.as_str().filter(|s| !s.trim().is_empty()) else {
            return Err(err(
                &req.id,
                "bad_params",
                "attach values must be database paths",
                Some(json!({ "alias": alias })),
            ));
        };
        out.insert(alias.clone(), PathBuf::from(p));
    }
    Ok(Some(out))
}

fn handle_db_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match required_str(req, "path") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    let attach = match parse_attach(req) {
        Ok(Some(v)) => v,
        Ok(None) => state.config.attach.clone(),
        Err(e) => return e,
    };

    if !open_into_state(state, &path, &attach) {
        return err(
            &req.id,
            "db_open_failed",
            state.db_status(),
            Some(json!({ "path": path.to_string_lossy() })),
        );
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "db_offline", state.db_status(), None);
    };
    match schema::list_schemas(conn) {
        Ok(schemas) => ok(
            &req.id,
            json!({
                "dbPath": path.to_string_lossy(),
                "schemas": schemas
            }),
        ),
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "db.open" => Some(handle_db_open(state, req)),
        _ => None,
    }
}
