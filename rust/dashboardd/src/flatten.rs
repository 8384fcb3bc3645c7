use serde::Serialize;
use std::cmp::Ordering;

use crate::grading::{format_number, GradingResult, RubricFlags};
use crate::schema::{SchemaMap, TableRef};

/// One submission as read from the database, before decoding.
#[derive(Debug, Clone)]
pub struct SubmissionRow {
    pub table: TableRef,
    pub student_id: String,
    pub submitted_at: Option<String>,
    pub opinion: Option<String>,
    /// `answer1..answerk`, in order.
    pub answers: Vec<Option<String>>,
    /// `feedback1..feedbackk`, in order.
    pub payloads: Vec<Option<String>>,
}

impl SubmissionRow {
    pub fn item_count(&self) -> usize {
        self.answers.len().max(self.payloads.len())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    /// 1-based.
    pub index: usize,
    pub answer: String,
    pub payload: String,
    pub grading: GradingResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    pub table: TableRef,
    pub student_id: String,
    pub submitted_at: Option<String>,
    pub opinion: Option<String>,
    pub items: Vec<ItemView>,
    pub total_score: Option<f64>,
    pub total_max: Option<f64>,
}

impl NormalizedRecord {
    /// Case-insensitive substring match over the student id, the opinion,
    /// every answer and every decoded feedback text. `needle` must already be
    /// lower-cased.
    fn matches(&self, needle: &str) -> bool {
        let hit = |s: &str| s.to_lowercase().contains(needle);
        hit(&self.student_id)
            || self.opinion.as_deref().map(hit).unwrap_or(false)
            || self
                .items
                .iter()
                .any(|it| hit(&it.answer) || hit(it.grading.feedback()))
    }
}

/// Decode one row into exactly `slots` items. Missing trailing items are
/// padded with `Unavailable`.
pub fn normalize_row(row: &SubmissionRow, slots: usize, rubric: &RubricFlags) -> NormalizedRecord {
    let mut items = Vec::with_capacity(slots);
    let mut total = 0.0;
    let mut total_max = 0.0;
    let mut any_score = false;

    for idx in 0..slots {
        let index = idx + 1;
        let item = if idx < row.item_count() {
            let answer = row.answers.get(idx).cloned().flatten();
            let payload = row.payloads.get(idx).cloned().flatten();
            let mut grading = GradingResult::from_payload(payload.as_deref());
            rubric.apply(&row.table.table, index, &mut grading);
            ItemView {
                index,
                answer: answer.unwrap_or_default(),
                payload: payload.unwrap_or_default(),
                grading,
            }
        } else {
            ItemView {
                index,
                answer: String::new(),
                payload: String::new(),
                grading: GradingResult::padded(),
            }
        };

        if let Some(score) = item.grading.score() {
            any_score = true;
            total += score;
            total_max += item.grading.max().unwrap_or(0.0);
        }
        items.push(item);
    }

    NormalizedRecord {
        table: row.table.clone(),
        student_id: row.student_id.clone(),
        submitted_at: row.submitted_at.clone(),
        opinion: row.opinion.clone(),
        items,
        total_score: any_score.then_some(total),
        total_max: (any_score && total_max != 0.0).then_some(total_max),
    }
}

/// Rectangular set of normalized submissions.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedTable {
    pub slots: usize,
    pub records: Vec<NormalizedRecord>,
}

/// Numeric ids compare as numbers, so `9` sorts before `10`, and come
/// before any non-numeric id.
fn student_order(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Newest first; rows without a timestamp last; ties by student id.
fn record_order(a: &NormalizedRecord, b: &NormalizedRecord) -> Ordering {
    let by_time = match (&a.submitted_at, &b.submitted_at) {
        (Some(x), Some(y)) => y.cmp(x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time.then_with(|| student_order(&a.student_id, &b.student_id))
}

/// Normalize rows from one or more tables. Every record gets as many item
/// slots as the widest table in `schema` (or the widest row, if wider).
pub fn flatten(rows: &[SubmissionRow], schema: &SchemaMap, rubric: &RubricFlags) -> NormalizedTable {
    let widest_row = rows.iter().map(|r| r.item_count()).max().unwrap_or(0);
    let slots = schema.max_items().max(widest_row);
    let padded_rows = rows
        .iter()
        .filter(|r| schema.item_count(&r.table) < slots)
        .count();

    let mut records: Vec<NormalizedRecord> = rows
        .iter()
        .map(|r| normalize_row(r, slots, rubric))
        .collect();
    records.sort_by(record_order);

    let unavailable = records
        .iter()
        .flat_map(|r| r.items.iter())
        .filter(|it| !it.grading.is_graded())
        .count();
    tracing::debug!(
        rows = records.len(),
        slots,
        padded_rows,
        unavailable,
        "flattened submissions"
    );
    NormalizedTable { slots, records }
}

impl NormalizedTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Keep only rows matching `keyword`. A blank keyword keeps everything.
    pub fn search(mut self, keyword: &str) -> Self {
        let needle = keyword.trim().to_lowercase();
        if !needle.is_empty() {
            self.records.retain(|r| r.matches(&needle));
        }
        self
    }

    pub fn truncate(mut self, limit: usize) -> Self {
        self.records.truncate(limit);
        self
    }

    pub fn find_student(&self, student_id: &str) -> Option<&NormalizedRecord> {
        let id = student_id.trim();
        self.records.iter().find(|r| r.student_id == id)
    }

    pub fn columns(&self, include_raw: bool) -> Vec<String> {
        let mut cols: Vec<String> = ["table", "student_id", "submitted_at", "total_score", "total_max"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for i in 1..=self.slots {
            cols.push(format!("item{}_score", i));
            cols.push(format!("item{}_max", i));
            cols.push(format!("item{}_level", i));
            cols.push(format!("item{}_feedback", i));
        }
        cols.push("opinion".to_string());
        if include_raw {
            for i in 1..=self.slots {
                cols.push(format!("item{}_answer", i));
                cols.push(format!("item{}_payload", i));
                cols.push(format!("item{}_reason", i));
            }
        }
        cols
    }

    /// Cells in the order of `columns`; unavailable items render as empty.
    pub fn cells(&self, record: &NormalizedRecord, include_raw: bool) -> Vec<String> {
        let num = |v: Option<f64>| v.map(format_number).unwrap_or_default();
        let mut out = vec![
            record.table.to_string(),
            record.student_id.clone(),
            record.submitted_at.clone().unwrap_or_default(),
            num(record.total_score),
            num(record.total_max),
        ];
        for it in &record.items {
            out.push(num(it.grading.score()));
            out.push(num(it.grading.max()));
            out.push(it.grading.level().unwrap_or("").to_string());
            out.push(it.grading.feedback().to_string());
        }
        out.push(record.opinion.clone().unwrap_or_default());
        if include_raw {
            for it in &record.items {
                out.push(it.answer.clone());
                out.push(it.payload.clone());
                out.push(it.grading.reason().to_string());
            }
        }
        out
    }
}

/// First `max_chars` characters of `text`.
pub fn summary(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Tab labels for the detail view. Four-item papers number their middle
/// items as sub-questions.
pub fn item_labels(count: usize) -> Vec<String> {
    if count == 4 {
        return ["문항 1", "문항 2-1", "문항 2-2", "문항 3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
    }
    (1..=count).map(|i| format!("문항 {}", i)).collect()
}
