//! Fixed right-hand sides with known closed-form solutions.

use crate::error::ExpressionError;
use crate::traits::Derivative;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinEquation {
    /// `y' = -3x²y`
    CubicDecay,
    /// `y' = 4x + y`
    LinearForcing,
}

impl BuiltinEquation {
    pub const ALL: [BuiltinEquation; 2] =
        [BuiltinEquation::CubicDecay, BuiltinEquation::LinearForcing];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cubic_decay" => Some(BuiltinEquation::CubicDecay),
            "linear_forcing" => Some(BuiltinEquation::LinearForcing),
            _ => None,
        }
    }

    /// The right-hand side in the syntax accepted by `Expression::parse`.
    pub fn expression(self) -> &'static str {
        match self {
            BuiltinEquation::CubicDecay => "-3*x^2*y",
            BuiltinEquation::LinearForcing => "4*x + y",
        }
    }

    /// Exact solution through `(x0, y0)`, evaluated at `x`.
    pub fn exact(self, x0: f64, y0: f64, x: f64) -> f64 {
        match self {
            BuiltinEquation::CubicDecay => y0 * (x0.powi(3) - x.powi(3)).exp(),
            BuiltinEquation::LinearForcing => {
                let c = (y0 + 4.0 * x0 + 4.0) * (-x0).exp();
                -4.0 * x - 4.0 + c * x.exp()
            }
        }
    }
}

impl Derivative for BuiltinEquation {
    fn evaluate(&self, x: f64, y: f64) -> Result<f64, ExpressionError> {
        let value = match self {
            BuiltinEquation::CubicDecay => -3.0 * x * x * y,
            BuiltinEquation::LinearForcing => 4.0 * x + y,
        };
        if !value.is_finite() {
            return Err(ExpressionError::NonFinite { x, y, value });
        }
        Ok(value)
    }
}
