use serde_json::json;
use std::path::PathBuf;

use super::selection::{load_selection, optional_bool, optional_i64, optional_str, required_str};
use crate::export;
use crate::flatten::{item_labels, summary, NormalizedRecord};
use crate::ipc::error::{dashboard_err, err, ok};
use crate::ipc::types::{AppState, Request};

fn grid_row(record: &NormalizedRecord, summary_chars: usize) -> serde_json::Value {
    let items: Vec<serde_json::Value> = record
        .items
        .iter()
        .map(|it| {
            json!({
                "index": it.index,
                "graded": it.grading.is_graded(),
                "score": it.grading.score(),
                "max": it.grading.max(),
                "level": it.grading.level(),
                "feedbackSummary": summary(it.grading.feedback(), summary_chars),
            })
        })
        .collect();
    json!({
        "table": record.table.to_string(),
        "studentId": record.student_id,
        "submittedAt": record.submitted_at,
        "totalScore": record.total_score,
        "totalMax": record.total_max,
        "items": items,
        "opinionSummary": record
            .opinion
            .as_deref()
            .map(|o| summary(o, summary_chars))
            .unwrap_or_default(),
    })
}

fn handle_submissions_query(state: &mut AppState, req: &Request) -> serde_json::Value {
    let limit = match optional_i64(req, "limit") {
        Ok(v) => state.config.clamp_limit(v),
        Err(e) => return e,
    };
    let keyword = optional_str(req, "keyword").unwrap_or("");
    // The keyword matches decoded feedback, so it can only be applied after
    // reading every row.
    let row_limit = keyword.is_empty().then_some(limit);
    let selection = match load_selection(state, req, row_limit) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tables = selection.tables_json();
    let matched = selection.normalized.search(keyword);
    let matched_count = if row_limit.is_some() {
        selection.row_count
    } else {
        matched.len()
    };
    let shown = matched.truncate(limit);
    let rows: Vec<serde_json::Value> = shown
        .records
        .iter()
        .map(|r| grid_row(r, state.config.summary_chars))
        .collect();

    tracing::info!(
        matched = matched_count,
        shown = rows.len(),
        slots = shown.slots,
        "submissions query"
    );
    ok(
        &req.id,
        json!({
            "tables": tables,
            "itemCount": shown.slots,
            "itemLabels": item_labels(shown.slots),
            "matchedCount": matched_count,
            "limit": limit,
            "rows": rows
        }),
    )
}

fn handle_submissions_detail(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v.to_string(),
        Err(e) => return e,
    };
    let selection = match load_selection(state, req, None) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(record) = selection.normalized.find_student(&student_id) else {
        return ok(
            &req.id,
            json!({
                "found": false,
                "studentId": student_id
            }),
        );
    };

    let labels = item_labels(selection.normalized.slots);
    let items: Vec<serde_json::Value> = record
        .items
        .iter()
        .zip(labels.iter())
        .map(|(it, label)| {
            json!({
                "label": label,
                "index": it.index,
                "answer": it.answer,
                "grading": it.grading,
            })
        })
        .collect();
    ok(
        &req.id,
        json!({
            "found": true,
            "table": record.table,
            "studentId": record.student_id,
            "submittedAt": record.submitted_at,
            "opinion": record.opinion,
            "totalScore": record.total_score,
            "totalMax": record.total_max,
            "items": items
        }),
    )
}

fn handle_submissions_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let include_raw = match optional_bool(req, "includeRaw") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let keyword = optional_str(req, "keyword").unwrap_or("");
    let out_path = optional_str(req, "outPath").map(PathBuf::from);
    let selection = match load_selection(state, req, None) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let file_name = export::default_file_name(&selection.table_refs());
    let table = selection.normalized.search(keyword);

    match out_path {
        Some(path) => match export::write_csv(&table, include_raw, &path) {
            Ok(rows) => ok(
                &req.id,
                json!({
                    "path": path.to_string_lossy(),
                    "fileName": file_name,
                    "rowsExported": rows
                }),
            ),
            Err(e) => dashboard_err(&req.id, &e),
        },
        None => {
            let bytes = match export::to_csv(&table, include_raw) {
                Ok(v) => v,
                Err(e) => return dashboard_err(&req.id, &e),
            };
            match String::from_utf8(bytes) {
                Ok(csv) => ok(
                    &req.id,
                    json!({
                        "fileName": file_name,
                        "rowsExported": table.len(),
                        "csv": csv
                    }),
                ),
                Err(e) => err(&req.id, "export_failed", e.to_string(), None),
            }
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.query" => Some(handle_submissions_query(state, req)),
        "submissions.detail" => Some(handle_submissions_detail(state, req)),
        "submissions.exportCsv" => Some(handle_submissions_export_csv(state, req)),
        _ => None,
    }
}
