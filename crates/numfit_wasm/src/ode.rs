//! RK2 midpoint runners exposed to the step-by-step derivation views.

use numfit_core::builtin::BuiltinEquation;
use numfit_core::equation_engine::Expression;
use numfit_core::error::{ExpressionError, OdeError};
use numfit_core::solvers::{MidpointRunner, RunPhase, StepperSettings, Trajectory};
use numfit_core::traits::Derivative;
use serde::Serialize;
use serde_wasm_bindgen::to_value;
use wasm_bindgen::prelude::*;

/// Either a user formula or one of the worked-example equations.
pub(crate) enum RhsSource {
    Expression(Expression),
    Builtin(BuiltinEquation),
}

impl RhsSource {
    pub(crate) fn from_expression(expression: &str) -> Result<Self, String> {
        Expression::parse(expression)
            .map(RhsSource::Expression)
            .map_err(|e| format!("Invalid expression: {e}"))
    }

    pub(crate) fn from_builtin(name: &str) -> Result<Self, String> {
        BuiltinEquation::from_name(name)
            .map(RhsSource::Builtin)
            .ok_or_else(|| format!("Unknown built-in equation: {name}"))
    }
}

impl Derivative for RhsSource {
    fn evaluate(&self, x: f64, y: f64) -> Result<f64, ExpressionError> {
        match self {
            RhsSource::Expression(expr) => expr.evaluate(x, y),
            RhsSource::Builtin(equation) => equation.evaluate(x, y),
        }
    }
}

fn settings_for(max_iterations: u32) -> StepperSettings {
    match max_iterations {
        0 => StepperSettings::default(),
        cap => StepperSettings {
            max_iterations: cap as usize,
            ..StepperSettings::default()
        },
    }
}

pub(crate) fn integrate(
    rhs: RhsSource,
    x0: f64,
    y0: f64,
    xf: f64,
    h: f64,
    max_iterations: u32,
) -> Result<Trajectory, String> {
    MidpointRunner::new(rhs, x0, y0, xf, h, settings_for(max_iterations))
        .map_err(|e| format!("Invalid step parameters: {e}"))?
        .run_to_end()
        .map_err(|e| format!("Integration failed: {e}"))
}

fn serialize<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    to_value(value).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// Integrates a user expression `f(x, y)`; `max_iterations = 0` keeps the default cap.
#[wasm_bindgen]
pub fn integrate_midpoint(
    expression: &str,
    x0: f64,
    y0: f64,
    xf: f64,
    h: f64,
    max_iterations: u32,
) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let rhs = RhsSource::from_expression(expression).map_err(|e| JsValue::from_str(&e))?;
    let trajectory =
        integrate(rhs, x0, y0, xf, h, max_iterations).map_err(|e| JsValue::from_str(&e))?;
    serialize(&trajectory)
}

/// Integrates one of the worked-example equations by name.
#[wasm_bindgen]
pub fn integrate_builtin(
    name: &str,
    x0: f64,
    y0: f64,
    xf: f64,
    h: f64,
    max_iterations: u32,
) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let rhs = RhsSource::from_builtin(name).map_err(|e| JsValue::from_str(&e))?;
    let trajectory =
        integrate(rhs, x0, y0, xf, h, max_iterations).map_err(|e| JsValue::from_str(&e))?;
    serialize(&trajectory)
}

/// Progress payload for the stepped runner.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct MidpointProgress {
    phase: RunPhase,
    steps: usize,
    max_iterations: usize,
    x: f64,
    y: f64,
}

#[wasm_bindgen]
pub struct WasmMidpointRunner {
    runner: MidpointRunner<RhsSource>,
}

impl WasmMidpointRunner {
    fn from_source(
        rhs: RhsSource,
        x0: f64,
        y0: f64,
        xf: f64,
        h: f64,
        max_iterations: u32,
    ) -> Result<Self, String> {
        let runner = MidpointRunner::new(rhs, x0, y0, xf, h, settings_for(max_iterations))
            .map_err(|e| format!("Invalid step parameters: {e}"))?;
        Ok(Self { runner })
    }

    pub(crate) fn advance(&mut self, batch_size: u32) -> Result<MidpointProgress, OdeError> {
        for _ in 0..batch_size {
            if self.runner.step()?.is_none() {
                break;
            }
        }
        Ok(self.progress())
    }

    pub(crate) fn progress(&self) -> MidpointProgress {
        let (x, y) = self.runner.current();
        MidpointProgress {
            phase: self.runner.phase(),
            steps: self.runner.steps_taken(),
            max_iterations: self.runner.max_iterations(),
            x,
            y,
        }
    }
}

#[wasm_bindgen]
impl WasmMidpointRunner {
    #[wasm_bindgen(constructor)]
    pub fn new(
        expression: &str,
        x0: f64,
        y0: f64,
        xf: f64,
        h: f64,
        max_iterations: u32,
    ) -> Result<WasmMidpointRunner, JsValue> {
        console_error_panic_hook::set_once();

        let rhs = RhsSource::from_expression(expression).map_err(|e| JsValue::from_str(&e))?;
        Self::from_source(rhs, x0, y0, xf, h, max_iterations).map_err(|e| JsValue::from_str(&e))
    }

    pub fn from_builtin(
        name: &str,
        x0: f64,
        y0: f64,
        xf: f64,
        h: f64,
        max_iterations: u32,
    ) -> Result<WasmMidpointRunner, JsValue> {
        console_error_panic_hook::set_once();

        let rhs = RhsSource::from_builtin(name).map_err(|e| JsValue::from_str(&e))?;
        Self::from_source(rhs, x0, y0, xf, h, max_iterations).map_err(|e| JsValue::from_str(&e))
    }

    pub fn is_done(&self) -> bool {
        self.runner.is_done()
    }

    pub fn run_steps(&mut self, batch_size: u32) -> Result<JsValue, JsValue> {
        let progress = self
            .advance(batch_size)
            .map_err(|e| JsValue::from_str(&format!("Integration failed: {}", e)))?;
        serialize(&progress)
    }

    pub fn get_progress(&self) -> Result<JsValue, JsValue> {
        serialize(&self.progress())
    }

    /// Records computed so far, including the initial condition.
    pub fn get_records(&self) -> Result<JsValue, JsValue> {
        serialize(&self.runner.records())
    }

    pub fn get_result(&self) -> Result<JsValue, JsValue> {
        let trajectory = self
            .runner
            .trajectory()
            .ok_or_else(|| JsValue::from_str("Integration has not finished yet."))?;
        serialize(&trajectory)
    }
}
