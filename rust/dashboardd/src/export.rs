use std::path::Path;

use crate::error::{DashboardError, Result};
use crate::flatten::NormalizedTable;
use crate::schema::TableRef;

/// Spreadsheet apps need the BOM to pick UTF-8 for Korean text.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub fn to_csv(table: &NormalizedTable, include_raw: bool) -> Result<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(UTF8_BOM.to_vec());
    wtr.write_record(table.columns(include_raw))?;
    for record in &table.records {
        wtr.write_record(table.cells(record, include_raw))?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    wtr.into_inner()
        .map_err(|e| DashboardError::Csv(csv::Error::from(e.into_error())))
}

/// Returns the number of data rows written.
pub fn write_csv(table: &NormalizedTable, include_raw: bool, path: &Path) -> Result<usize> {
    if table.is_empty() {
        tracing::warn!(path = %path.display(), "no submissions matched; writing header only");
    }
    let bytes = to_csv(table, include_raw)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| DashboardError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, bytes).map_err(|source| DashboardError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(
        path = %path.display(),
        rows = table.len(),
        include_raw,
        "exported submissions"
    );
    Ok(table.len())
}

/// `<schema>.<table>_dashboard.csv`; several tables are joined with `+`.
pub fn default_file_name(tables: &[TableRef]) -> String {
    let stem = tables
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join("+");
    format!("{}_dashboard.csv", stem)
}
