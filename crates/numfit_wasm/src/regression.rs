//! Regression entry points for the comparison tables and cards.

use crate::dataset::{fit_dataset, parse_csv};
use numfit_core::regression::{fit_all, Sample};
use serde_wasm_bindgen::to_value;
use wasm_bindgen::prelude::*;

pub(crate) fn samples_from_columns(xs: &[f64], ys: &[f64]) -> Result<Vec<Sample>, String> {
    if xs.len() != ys.len() {
        return Err(format!(
            "x and y must have the same length (got {} and {}).",
            xs.len(),
            ys.len()
        ));
    }
    Ok(xs
        .iter()
        .zip(ys)
        .map(|(&x, &y)| Sample::new(x, y))
        .collect())
}

/// Fits all four models to paired `x`/`y` columns.
#[wasm_bindgen]
pub fn fit_samples(xs: Vec<f64>, ys: Vec<f64>) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let samples = samples_from_columns(&xs, &ys).map_err(|e| JsValue::from_str(&e))?;
    let results = fit_all(&samples);
    to_value(&results).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// Parses CSV text and fits all four models per condition group.
#[wasm_bindgen]
pub fn fit_csv(text: &str) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let dataset =
        parse_csv(text).map_err(|e| JsValue::from_str(&format!("Failed to load CSV: {:#}", e)))?;
    let report = fit_dataset(&dataset);
    to_value(&report).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}
