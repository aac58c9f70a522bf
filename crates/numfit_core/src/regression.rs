//! Least-squares fits of four curve families over a 2D sample set.
//!
//! Every model is fitted independently; a model that cannot be fitted comes
//! back as `None` without affecting the others.
//!
//! Exponential and power fits are solved as straight-line fits on
//! log-transformed data, yet their R² is scored against the untransformed
//! observations. The score therefore reflects real-scale error, and it is not
//! the quantity the log-space fit minimises.

use crate::goodness_of_fit::{adjusted_r_squared, r_squared};
use crate::linear_solver::solve_3x3;
use nalgebra::Matrix3x4;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Sample {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, label: None }
    }

    pub fn labeled(x: f64, y: f64, label: impl Into<String>) -> Self {
        Self {
            x,
            y,
            label: Some(label.into()),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Linear,
    Quadratic,
    Exponential,
    Power,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Linear,
        ModelKind::Quadratic,
        ModelKind::Exponential,
        ModelKind::Power,
    ];

    /// Number of fitted coefficients, used for adjusted R².
    pub fn parameter_count(self) -> usize {
        match self {
            ModelKind::Quadratic => 3,
            ModelKind::Linear | ModelKind::Exponential | ModelKind::Power => 2,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelKind::Linear => "linear",
            ModelKind::Quadratic => "quadratic",
            ModelKind::Exponential => "exponential",
            ModelKind::Power => "power",
        };
        f.write_str(name)
    }
}

/// Fitted coefficients, one variant per curve family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelParameters {
    /// `y = m x + b`
    Linear { m: f64, b: f64 },
    /// `y = a x² + b x + c`
    Quadratic { a: f64, b: f64, c: f64 },
    /// `y = a e^(b x)`
    Exponential { a: f64, b: f64 },
    /// `y = a x^b`
    Power { a: f64, b: f64 },
}

impl ModelParameters {
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelParameters::Linear { .. } => ModelKind::Linear,
            ModelParameters::Quadratic { .. } => ModelKind::Quadratic,
            ModelParameters::Exponential { .. } => ModelKind::Exponential,
            ModelParameters::Power { .. } => ModelKind::Power,
        }
    }

    /// Coefficients by name, in equation order.
    pub fn named(&self) -> Vec<(&'static str, f64)> {
        match *self {
            ModelParameters::Linear { m, b } => vec![("m", m), ("b", b)],
            ModelParameters::Quadratic { a, b, c } => vec![("a", a), ("b", b), ("c", c)],
            ModelParameters::Exponential { a, b } | ModelParameters::Power { a, b } => {
                vec![("a", a), ("b", b)]
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.named()
            .into_iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    pub fn predict(&self, x: f64) -> f64 {
        match *self {
            ModelParameters::Linear { m, b } => m * x + b,
            ModelParameters::Quadratic { a, b, c } => a * x * x + b * x + c,
            ModelParameters::Exponential { a, b } => a * (b * x).exp(),
            ModelParameters::Power { a, b } => a * x.powf(b),
        }
    }

    /// Display form with 4 decimals per coefficient.
    pub fn equation(&self) -> String {
        match *self {
            ModelParameters::Linear { m, b } => format!("y = {}x + {}", fixed4(m), fixed4(b)),
            ModelParameters::Quadratic { a, b, c } => format!(
                "y = {}x² + {}x + {}",
                fixed4(a),
                fixed4(b),
                fixed4(c)
            ),
            ModelParameters::Exponential { a, b } => {
                format!("y = {} * e^({}x)", fixed4(a), fixed4(b))
            }
            ModelParameters::Power { a, b } => format!("y = {} * x^{}", fixed4(a), fixed4(b)),
        }
    }
}

fn fixed4(value: f64) -> String {
    // Adding zero turns -0.0 into 0.0.
    format!("{:.4}", value + 0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub kind: ModelKind,
    pub parameters: ModelParameters,
    pub r2: f64,
    pub r2_adjusted: Option<f64>,
    pub equation: String,
}

impl ModelResult {
    /// Scores `parameters` against `samples` on the original scale.
    fn score(parameters: ModelParameters, samples: &[Sample]) -> Option<Self> {
        let kind = parameters.kind();
        let Some(r2) = r_squared(samples, |x| parameters.predict(x)) else {
            debug!(%kind, "R² undefined (zero total sum of squares)");
            return None;
        };
        if !r2.is_finite() {
            debug!(%kind, "model predicts non-finite values");
            return None;
        }
        Some(Self {
            kind,
            parameters,
            r2,
            r2_adjusted: adjusted_r_squared(r2, samples.len(), kind.parameter_count()),
            equation: parameters.equation(),
        })
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.parameters.predict(x)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResults {
    pub linear: Option<ModelResult>,
    pub quadratic: Option<ModelResult>,
    pub exponential: Option<ModelResult>,
    pub power: Option<ModelResult>,
}

impl ModelResults {
    pub fn get(&self, kind: ModelKind) -> Option<&ModelResult> {
        match kind {
            ModelKind::Linear => self.linear.as_ref(),
            ModelKind::Quadratic => self.quadratic.as_ref(),
            ModelKind::Exponential => self.exponential.as_ref(),
            ModelKind::Power => self.power.as_ref(),
        }
    }

    /// Fitted models in `ModelKind::ALL` order.
    pub fn iter(&self) -> impl Iterator<Item = &ModelResult> {
        ModelKind::ALL
            .into_iter()
            .filter_map(move |kind| self.get(kind))
    }
}

/// Fits every model family to `samples`.
///
/// Non-finite samples are skipped. An empty (or fully skipped) sample set
/// yields no models at all.
pub fn fit_all(samples: &[Sample]) -> ModelResults {
    let finite: Vec<Sample> = samples.iter().filter(|s| s.is_finite()).cloned().collect();
    if finite.len() != samples.len() {
        warn!(
            skipped = samples.len() - finite.len(),
            "skipping non-finite samples"
        );
    }
    if finite.is_empty() {
        return ModelResults::default();
    }

    let results = ModelResults {
        linear: fit_linear(&finite),
        quadratic: fit_quadratic(&finite),
        exponential: fit_exponential(&finite),
        power: fit_power(&finite),
    };
    for kind in ModelKind::ALL {
        if results.get(kind).is_none() {
            debug!(%kind, n = finite.len(), "model could not be fitted");
        }
    }
    results
}

/// Straight-line least squares on raw `(x, y)` pairs, returning `(slope, intercept)`.
fn least_squares_line(points: impl Iterator<Item = (f64, f64)>) -> Option<(f64, f64)> {
    let mut n = 0usize;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) = (0.0, 0.0, 0.0, 0.0);
    for (x, y) in points {
        n += 1;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }
    if n < 2 {
        return None;
    }

    let n = n as f64;
    let denominator = n * sum_x2 - sum_x * sum_x;
    // All x equal (up to cancellation error): the slope is undefined.
    if denominator.abs() <= n * f64::EPSILON * (n * sum_x2).abs() {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    Some((slope, intercept))
}

/// `y = m x + b`. Needs at least two samples with distinct `x`.
pub fn fit_linear(samples: &[Sample]) -> Option<ModelResult> {
    let (m, b) = least_squares_line(samples.iter().map(|s| (s.x, s.y)))?;
    ModelResult::score(ModelParameters::Linear { m, b }, samples)
}

/// `y = a x² + b x + c` from the normal equations. Needs at least three samples
/// and a regular normal-equations matrix.
pub fn fit_quadratic(samples: &[Sample]) -> Option<ModelResult> {
    if samples.len() < 3 {
        return None;
    }

    let n = samples.len() as f64;
    let (mut sum_x, mut sum_x2, mut sum_x3, mut sum_x4) = (0.0, 0.0, 0.0, 0.0);
    let (mut sum_y, mut sum_xy, mut sum_x2y) = (0.0, 0.0, 0.0);
    for s in samples {
        let x2 = s.x * s.x;
        sum_x += s.x;
        sum_x2 += x2;
        sum_x3 += x2 * s.x;
        sum_x4 += x2 * x2;
        sum_y += s.y;
        sum_xy += s.x * s.y;
        sum_x2y += x2 * s.y;
    }

    #[rustfmt::skip]
    let normal = Matrix3x4::new(
        n,      sum_x,  sum_x2, sum_y,
        sum_x,  sum_x2, sum_x3, sum_xy,
        sum_x2, sum_x3, sum_x4, sum_x2y,
    );
    let solution = solve_3x3(&normal)?;
    let (c, b, a) = (solution[0], solution[1], solution[2]);
    ModelResult::score(ModelParameters::Quadratic { a, b, c }, samples)
}

/// `y = a e^(b x)`, fitted as a line through `(x, ln y)` over the samples with `y > 0`.
pub fn fit_exponential(samples: &[Sample]) -> Option<ModelResult> {
    let transformed = samples
        .iter()
        .filter(|s| s.y > 0.0)
        .map(|s| (s.x, s.y.ln()));
    let (b, ln_a) = least_squares_line(transformed)?;
    ModelResult::score(ModelParameters::Exponential { a: ln_a.exp(), b }, samples)
}

/// `y = a x^b`, fitted as a line through `(ln x, ln y)` over the samples with
/// `x > 0` and `y > 0`.
pub fn fit_power(samples: &[Sample]) -> Option<ModelResult> {
    let transformed = samples
        .iter()
        .filter(|s| s.x > 0.0 && s.y > 0.0)
        .map(|s| (s.x.ln(), s.y.ln()));
    let (b, ln_a) = least_squares_line(transformed)?;
    ModelResult::score(ModelParameters::Power { a: ln_a.exp(), b }, samples)
}
