//! CSV ingest for the regression views.
//!
//! Columns are found by header keyword, rows are grouped by their condition
//! label, and rows whose numbers do not parse are skipped and counted.

use anyhow::{bail, Context, Result};
use numfit_core::regression::{fit_all, ModelResults, Sample};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

const X_KEYWORDS: [&str; 2] = ["velocidad", "speed"];
const Y_KEYWORDS: [&str; 3] = ["distancia", "frenado", "distance"];
const LABEL_KEYWORDS: [&str; 4] = ["condicion", "condition", "estado", "surface"];

/// Group used when the file has no condition column.
pub const UNLABELED_GROUP: &str = "all";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub groups: BTreeMap<String, Vec<Sample>>,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupFit {
    pub count: usize,
    pub models: ModelResults,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetFit {
    pub groups: BTreeMap<String, GroupFit>,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    x: usize,
    y: usize,
    label: Option<usize>,
}

fn normalize_header(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a UTF-8 BOM.
    name.trim().trim_start_matches('\u{feff}').to_lowercase()
}

fn find_column(headers: &csv::StringRecord, exact: &str, keywords: &[&str]) -> Option<usize> {
    let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
    normalized.iter().position(|h| h == exact).or_else(|| {
        normalized
            .iter()
            .position(|h| keywords.iter().any(|keyword| h.contains(keyword)))
    })
}

fn resolve_columns(headers: &csv::StringRecord) -> Result<Columns> {
    let Some(x) = find_column(headers, "x", &X_KEYWORDS) else {
        bail!("No speed column found (expected a header containing 'speed' or 'velocidad').");
    };
    let Some(y) = find_column(headers, "y", &Y_KEYWORDS) else {
        bail!("No distance column found (expected a header containing 'distance', 'distancia' or 'frenado').");
    };
    if x == y {
        bail!("Speed and distance resolve to the same column ({x}).");
    }
    let label = find_column(headers, "label", &LABEL_KEYWORDS);
    Ok(Columns { x, y, label })
}

/// Lower-cases a condition label and folds Spanish names onto English ones.
pub fn normalize_label(raw: &str) -> Option<String> {
    let label = raw.trim().to_lowercase();
    match label.as_str() {
        "" => None,
        "seco" => Some("dry".to_string()),
        "mojado" => Some("wet".to_string()),
        _ => Some(label),
    }
}

fn parse_number(field: Option<&str>) -> Option<f64> {
    field
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

pub fn parse_csv(text: &str) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers().context("Failed to read CSV header")?.clone();
    let columns = resolve_columns(&headers)?;

    let mut dataset = Dataset::default();
    for (index, record) in reader.records().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let record = record.with_context(|| format!("Malformed CSV row at line {line}"))?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }

        let x = parse_number(record.get(columns.x));
        let y = parse_number(record.get(columns.y));
        let label = match columns.label {
            Some(col) => record.get(col).and_then(normalize_label),
            None => Some(UNLABELED_GROUP.to_string()),
        };

        match (x, y, label) {
            (Some(x), Some(y), Some(label)) => {
                dataset
                    .groups
                    .entry(label.clone())
                    .or_default()
                    .push(Sample::labeled(x, y, label));
            }
            _ => {
                debug!(line, "skipping CSV row");
                dataset.skipped_rows += 1;
            }
        }
    }

    Ok(dataset)
}

/// Runs every regression model on each label group.
pub fn fit_dataset(dataset: &Dataset) -> DatasetFit {
    let groups = dataset
        .groups
        .iter()
        .map(|(label, samples)| {
            let fit = GroupFit {
                count: samples.len(),
                models: fit_all(samples),
            };
            (label.clone(), fit)
        })
        .collect();

    DatasetFit {
        groups,
        skipped_rows: dataset.skipped_rows,
    }
}
