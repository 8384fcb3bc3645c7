use serde_json::json;

use super::selection::{db_conn, optional_str, required_str};
use crate::ipc::error::{dashboard_err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schema::{self, TableRef};

fn handle_tables_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tables = match schema::list_submission_tables(
        conn,
        &state.config.preferred_tables,
        state.config.max_items,
    ) {
        Ok(v) => v,
        Err(e) => return dashboard_err(&req.id, &e),
    };
    let listed: Vec<serde_json::Value> = tables
        .iter()
        .map(|t| {
            json!({
                "schema": t.table.schema,
                "table": t.table.table,
                "label": t.table.to_string(),
                "itemCount": t.item_count,
                "hasTime": t.has_time,
                "hasOpinion": t.has_opinion,
            })
        })
        .collect();
    tracing::info!(tables = listed.len(), "listed submission tables");
    ok(
        &req.id,
        json!({
            "tables": listed,
            // list is already in preference order
            "defaultIndex": 0
        }),
    )
}

fn handle_tables_describe(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let table = match required_str(req, "table") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let schema_name = optional_str(req, "schema").unwrap_or("main");
    match schema::describe_table(
        conn,
        &TableRef::new(schema_name, table),
        state.config.max_items,
    ) {
        Ok(described) => ok(&req.id, json!(described)),
        Err(e) => dashboard_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tables.list" => Some(handle_tables_list(state, req)),
        "tables.describe" => Some(handle_tables_describe(state, req)),
        _ => None,
    }
}
