use crate::error::ExpressionError;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars by the expression VM.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Right-hand side of a scalar first-order ODE, `y' = f(x, y)`.
pub trait Derivative {
    /// Evaluates `f(x, y)`.
    /// Implementations backed by user input report failures instead of
    /// returning a placeholder value.
    fn evaluate(&self, x: f64, y: f64) -> Result<f64, ExpressionError>;
}

impl<F> Derivative for F
where
    F: Fn(f64, f64) -> f64,
{
    fn evaluate(&self, x: f64, y: f64) -> Result<f64, ExpressionError> {
        Ok(self(x, y))
    }
}

/// A trait for solvers that can step a scalar ODE forward.
pub trait Steppable {
    /// Intermediate quantities produced by one step.
    type Stages;

    /// Performs one step of size h.
    /// x: current abscissa (updated after step)
    /// y: current value (updated after step)
    fn step(
        &mut self,
        rhs: &impl Derivative,
        x: &mut f64,
        y: &mut f64,
        h: f64,
    ) -> Result<Self::Stages, ExpressionError>;
}
