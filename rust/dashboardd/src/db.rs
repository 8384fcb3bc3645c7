use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{DashboardError, Result};
use crate::flatten::SubmissionRow;
use crate::grading::format_number;
use crate::schema::{
    answer_column, feedback_column, quote_ident, TableSchema, ID_COLUMN, OPINION_COLUMN,
    TIME_COLUMN,
};

/// Open the submissions database read-only, attach extra schemas, and make
/// sure it answers.
pub fn open_db(path: &Path, attach: &BTreeMap<String, PathBuf>) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags).map_err(|source| {
        DashboardError::Connection {
            path: path.to_path_buf(),
            source,
        }
    })?;
    ping(&conn).map_err(|source| DashboardError::Connection {
        path: path.to_path_buf(),
        source,
    })?;

    for (alias, file) in attach {
        conn.execute("ATTACH DATABASE ?1 AS ?2", (read_only_uri(file), alias))
            .map_err(|source| DashboardError::Attach {
                alias: alias.clone(),
                path: file.clone(),
                source,
            })?;
    }
    tracing::info!(
        path = %path.display(),
        attached = attach.len(),
        "opened submissions database"
    );
    Ok(conn)
}

pub fn ping(conn: &Connection) -> rusqlite::Result<()> {
    conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
    Ok(())
}

fn read_only_uri(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            '?' => escaped.push_str("%3f"),
            '#' => escaped.push_str("%23"),
            _ => escaped.push(ch),
        }
    }
    format!("file:{}?mode=ro", escaped)
}

fn cell_text(v: ValueRef<'_>) -> Option<String> {
    match v {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(format_number(f)),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

/// Numeric timestamps are Unix seconds; text is kept as stored.
fn time_text(v: ValueRef<'_>) -> Option<String> {
    let secs = match v {
        ValueRef::Integer(i) => i,
        ValueRef::Real(f) => f as i64,
        other => return cell_text(other),
    };
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .or_else(|| Some(secs.to_string()))
}

/// Number of submissions in `table`.
pub fn count_rows(conn: &Connection, table: &TableSchema) -> Result<usize> {
    let sql = format!("SELECT COUNT(*) FROM {}", table.table.qualified());
    let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
    Ok(n.max(0) as usize)
}

/// Submissions in `table`, newest first, then by id. With `limit`, only the
/// first `limit` rows in that order are read.
pub fn fetch_rows(
    conn: &Connection,
    table: &TableSchema,
    limit: Option<usize>,
) -> Result<Vec<SubmissionRow>> {
    let mut select = vec![quote_ident(ID_COLUMN)];
    if table.has_time {
        select.push(quote_ident(TIME_COLUMN));
    }
    if table.has_opinion {
        select.push(quote_ident(OPINION_COLUMN));
    }
    for i in 1..=table.item_count {
        select.push(quote_ident(&answer_column(i)));
        select.push(quote_ident(&feedback_column(i)));
    }
    let order = if table.has_time {
        format!("{} DESC, {}", quote_ident(TIME_COLUMN), quote_ident(ID_COLUMN))
    } else {
        quote_ident(ID_COLUMN)
    };
    let mut sql = format!(
        "SELECT {} FROM {} ORDER BY {}",
        select.join(", "),
        table.table.qualified(),
        order
    );
    if limit.is_some() {
        sql.push_str(" LIMIT ?1");
    }
    let limit_param = limit.map(|n| i64::try_from(n).unwrap_or(i64::MAX));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(limit_param), |r| {
            let mut col = 0usize;
            let student_id = cell_text(r.get_ref(col)?).unwrap_or_default();
            col += 1;
            let submitted_at = if table.has_time {
                col += 1;
                time_text(r.get_ref(col - 1)?)
            } else {
                None
            };
            let opinion = if table.has_opinion {
                col += 1;
                cell_text(r.get_ref(col - 1)?)
            } else {
                None
            };
            let mut answers = Vec::with_capacity(table.item_count);
            let mut payloads = Vec::with_capacity(table.item_count);
            for _ in 0..table.item_count {
                answers.push(cell_text(r.get_ref(col)?));
                payloads.push(cell_text(r.get_ref(col + 1)?));
                col += 2;
            }
            Ok(SubmissionRow {
                table: table.table.clone(),
                student_id,
                submitted_at,
                opinion,
                answers,
                payloads,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    tracing::debug!(
        table = %table.table,
        rows = rows.len(),
        limit = ?limit,
        "fetched submissions"
    );
    Ok(rows)
}
