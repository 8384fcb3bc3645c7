use rusqlite::Connection;
use serde_json::{json, Value};

use crate::db;
use crate::flatten::{self, NormalizedTable};
use crate::ipc::error::{dashboard_err, err};
use crate::ipc::types::{AppState, Request};
use crate::schema::{self, SchemaMap, TableRef, TableSchema};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state.db.as_ref().ok_or_else(|| {
        err(
            &req.id,
            "db_offline",
            state.db_status(),
            Some(json!({ "hint": "call db.open first" })),
        )
    })
}

pub fn optional_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

pub fn required_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, Value> {
    optional_str(req, key)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_bool(req: &Request, key: &str) -> Result<bool, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a boolean", key),
            Some(json!({ key: other })),
        )),
    }
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be an integer", key),
                Some(json!({ key: v })),
            )
        }),
    }
}

fn table_ref_from(value: &Value, default_schema: &str) -> Option<TableRef> {
    match value {
        Value::String(t) if !t.trim().is_empty() => Some(TableRef::new(default_schema, t.trim())),
        Value::Object(obj) => {
            let table = obj.get("table")?.as_str()?.trim();
            if table.is_empty() {
                return None;
            }
            let schema = obj
                .get("schema")
                .and_then(|v| v.as_str())
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .unwrap_or(default_schema);
            Some(TableRef::new(schema, table))
        }
        _ => None,
    }
}

/// Tables named by `table` (+ `schema`) or `tables`; the first listed
/// submission table when neither is given.
fn requested_tables(state: &AppState, conn: &Connection, req: &Request) -> Result<Vec<TableRef>, Value> {
    let default_schema = optional_str(req, "schema").unwrap_or("main");

    if let Some(list) = req.params.get("tables") {
        let Some(items) = list.as_array() else {
            return Err(err(&req.id, "bad_params", "tables must be an array", None));
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let Some(t) = table_ref_from(item, default_schema) else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "tables entries must be names or {schema, table} objects",
                    Some(json!({ "entry": item })),
                ));
            };
            if !out.contains(&t) {
                out.push(t);
            }
        }
        if out.is_empty() {
            return Err(err(&req.id, "bad_params", "tables must not be empty", None));
        }
        return Ok(out);
    }

    if let Some(t) = optional_str(req, "table") {
        return Ok(vec![TableRef::new(default_schema, t)]);
    }

    let listed = schema::list_submission_tables(
        conn,
        &state.config.preferred_tables,
        state.config.max_items,
    )
    .map_err(|e| dashboard_err(&req.id, &e))?;
    match listed.into_iter().next() {
        Some(first) => Ok(vec![first.table]),
        None => Err(err(&req.id, "not_found", "no submission tables found", None)),
    }
}

pub struct Selection {
    pub tables: Vec<TableSchema>,
    pub normalized: NormalizedTable,
    /// Rows in the selected tables, including any not read because of a
    /// row limit.
    pub row_count: usize,
}

impl Selection {
    pub fn table_refs(&self) -> Vec<TableRef> {
        self.tables.iter().map(|t| t.table.clone()).collect()
    }

    pub fn tables_json(&self) -> Value {
        json!(self
            .tables
            .iter()
            .map(|t| json!({
                "schema": t.table.schema,
                "table": t.table.table,
                "itemCount": t.item_count,
            }))
            .collect::<Vec<_>>())
    }
}

/// Describe, read and flatten the requested tables. Any database failure
/// fails the whole request; nothing partial is returned.
///
/// With `row_limit`, each table contributes at most that many of its newest
/// rows, which is enough to fill the first `row_limit` merged records.
pub fn load_selection(
    state: &AppState,
    req: &Request,
    row_limit: Option<usize>,
) -> Result<Selection, Value> {
    let conn = db_conn(state, req)?;
    let refs = requested_tables(state, conn, req)?;

    let mut tables = Vec::with_capacity(refs.len());
    for t in &refs {
        let described = schema::describe_table(conn, t, state.config.max_items)
            .map_err(|e| dashboard_err(&req.id, &e))?;
        tables.push(described);
    }
    let schema_map = SchemaMap::from_schemas(&tables);

    let mut rows = Vec::new();
    let mut row_count = 0usize;
    for t in &tables {
        let fetched =
            db::fetch_rows(conn, t, row_limit).map_err(|e| dashboard_err(&req.id, &e))?;
        row_count += match row_limit {
            Some(_) => db::count_rows(conn, t).map_err(|e| dashboard_err(&req.id, &e))?,
            None => fetched.len(),
        };
        rows.extend(fetched);
    }
    let normalized = flatten::flatten(&rows, &schema_map, &state.config.rubric_flags);
    Ok(Selection {
        tables,
        normalized,
        row_count,
    })
}
