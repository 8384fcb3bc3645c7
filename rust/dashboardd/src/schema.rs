use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{DashboardError, Result};

/// Columns a table needs to be listed as a submission table.
pub const REQUIRED_COLUMNS: [&str; 3] = ["id", "answer1", "feedback1"];

pub const ID_COLUMN: &str = "id";
pub const TIME_COLUMN: &str = "time";
pub const OPINION_COLUMN: &str = "opinion1";

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// `"schema"."table"` for use in SQL text.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn answer_column(i: usize) -> String {
    format!("answer{}", i)
}

pub fn feedback_column(i: usize) -> String {
    format!("feedback{}", i)
}

/// Number of graded items: the largest k such that `answer1..answerk` and
/// `feedback1..feedbackk` are all present. Scanning stops at the first gap.
/// Names are matched case-insensitively; anything else is ignored.
pub fn item_count<I, S>(columns: I, max_items: Option<usize>) -> usize
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let cols: BTreeSet<String> = columns
        .into_iter()
        .map(|c| c.as_ref().trim().to_ascii_lowercase())
        .collect();
    let cap = max_items.unwrap_or(usize::MAX);

    let mut k = 0usize;
    while k < cap {
        let next = k + 1;
        if cols.contains(&answer_column(next)) && cols.contains(&feedback_column(next)) {
            k = next;
        } else {
            break;
        }
    }
    k
}

/// Typed description of one submission table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    #[serde(flatten)]
    pub table: TableRef,
    pub columns: BTreeSet<String>,
    pub item_count: usize,
    pub has_time: bool,
    pub has_opinion: bool,
}

impl TableSchema {
    pub fn from_columns(table: TableRef, columns: BTreeSet<String>, max_items: Option<usize>) -> Self {
        let item_count = item_count(&columns, max_items);
        Self {
            has_time: columns.contains(TIME_COLUMN),
            has_opinion: columns.contains(OPINION_COLUMN),
            table,
            columns,
            item_count,
        }
    }

    pub fn has_id(&self) -> bool {
        self.columns.contains(ID_COLUMN)
    }

    pub fn is_submission_table(&self) -> bool {
        REQUIRED_COLUMNS.iter().all(|c| self.columns.contains(*c))
    }
}

/// Item counts per table, computed once per request and handed to the
/// flattener instead of re-inspecting the schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaMap {
    counts: BTreeMap<TableRef, usize>,
}

impl SchemaMap {
    pub fn from_schemas<'a, I>(schemas: I) -> Self
    where
        I: IntoIterator<Item = &'a TableSchema>,
    {
        let mut map = Self::default();
        for s in schemas {
            map.insert(s.table.clone(), s.item_count);
        }
        map
    }

    pub fn insert(&mut self, table: TableRef, item_count: usize) {
        self.counts.insert(table, item_count);
    }

    /// 0 for tables the map does not know.
    pub fn item_count(&self, table: &TableRef) -> usize {
        self.counts.get(table).copied().unwrap_or(0)
    }

    /// Width every flattened row is padded to.
    pub fn max_items(&self) -> usize {
        self.counts.values().copied().max().unwrap_or(0)
    }
}

/// Lower-cased column names of a table; empty when the table does not exist.
pub fn table_columns(conn: &Connection, table: &TableRef) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1, ?2)")?;
    let names = stmt
        .query_map((&table.table, &table.schema), |r| r.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names.into_iter().map(|n| n.to_ascii_lowercase()).collect())
}

/// Any existing table keyed by `id` can be described. Tables without the
/// `answer<N>`/`feedback<N>` pattern come back with `item_count == 0`.
pub fn describe_table(
    conn: &Connection,
    table: &TableRef,
    max_items: Option<usize>,
) -> Result<TableSchema> {
    let columns = table_columns(conn, table)?;
    if columns.is_empty() {
        return Err(DashboardError::TableNotFound {
            schema: table.schema.clone(),
            table: table.table.clone(),
        });
    }
    let schema = TableSchema::from_columns(table.clone(), columns, max_items);
    if !schema.has_id() {
        return Err(DashboardError::MissingIdColumn {
            schema: table.schema.clone(),
            table: table.table.clone(),
        });
    }
    if schema.item_count == 0 {
        tracing::warn!(table = %schema.table, "no answer/feedback columns; no items to show");
    }
    tracing::debug!(
        table = %schema.table,
        item_count = schema.item_count,
        "described submission table"
    );
    Ok(schema)
}

/// Attached database names, `main` first. `temp` is skipped.
pub fn list_schemas(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_database_list ORDER BY seq")?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names.into_iter().filter(|n| n != "temp").collect())
}

fn table_priority(table: &str, preferred: &[String]) -> usize {
    preferred
        .iter()
        .position(|p| p.eq_ignore_ascii_case(table))
        .unwrap_or(preferred.len())
}

/// Every table carrying `id`, `answer1` and `feedback1`, in display order:
/// preferred names first (in the given order), then by schema and name.
pub fn list_submission_tables(
    conn: &Connection,
    preferred: &[String],
    max_items: Option<usize>,
) -> Result<Vec<TableSchema>> {
    let mut out = Vec::new();
    for schema in list_schemas(conn)? {
        let mut stmt = conn.prepare(
            "SELECT name FROM pragma_table_list
             WHERE schema = ?1 AND type = 'table' AND name NOT LIKE 'sqlite_%'",
        )?;
        let tables = stmt
            .query_map([&schema], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for table in tables {
            let table_ref = TableRef::new(schema.clone(), table);
            let columns = table_columns(conn, &table_ref)?;
            let described = TableSchema::from_columns(table_ref, columns, max_items);
            if described.is_submission_table() {
                out.push(described);
            }
        }
    }
    out.sort_by(|a, b| {
        let pa = table_priority(&a.table.table, preferred);
        let pb = table_priority(&b.table.table, preferred);
        pa.cmp(&pb).then_with(|| a.table.cmp(&b.table))
    });
    Ok(out)
}
