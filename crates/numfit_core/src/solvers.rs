use crate::error::{ExpressionError, InvalidStepError, OdeError};
use crate::traits::{Derivative, Steppable};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A run stops once `x` is within `h * TOLERANCE_FACTOR` of `xf`.
pub const TOLERANCE_FACTOR: f64 = 0.01;

/// Hard cap on the number of steps in one run.
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepperSettings {
    pub max_iterations: usize,
    pub tolerance_factor: f64,
}

impl Default for StepperSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance_factor: TOLERANCE_FACTOR,
        }
    }
}

/// Intermediate values of one midpoint step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MidpointStages {
    pub k1: f64,
    pub x_mid: f64,
    pub y_mid: f64,
    pub f_mid: f64,
}

/// 2nd-order Runge-Kutta, midpoint variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct MidpointStepper;

impl Steppable for MidpointStepper {
    type Stages = MidpointStages;

    fn step(
        &mut self,
        rhs: &impl Derivative,
        x: &mut f64,
        y: &mut f64,
        h: f64,
    ) -> Result<MidpointStages, ExpressionError> {
        let x0 = *x;
        let y0 = *y;

        // k1 = h * f(x, y)
        let k1 = h * rhs.evaluate(x0, y0)?;

        // f_mid = f(x + h/2, y + k1/2)
        let x_mid = x0 + h / 2.0;
        let y_mid = y0 + k1 / 2.0;
        let f_mid = rhs.evaluate(x_mid, y_mid)?;

        *y = y0 + h * f_mid;
        *x = x0 + h;

        Ok(MidpointStages {
            k1,
            x_mid,
            y_mid,
            f_mid,
        })
    }
}

/// One row of a trajectory.
///
/// Record 0 is the initial condition and carries no stage values. Record `n`
/// is the step that starts at `(x, y)` and lands on `(x_next, y_next)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub step_index: usize,
    pub x: f64,
    pub y: f64,
    pub k1: Option<f64>,
    pub x_mid: Option<f64>,
    pub y_mid: Option<f64>,
    pub f_mid: Option<f64>,
    pub x_next: f64,
    pub y_next: f64,
}

impl IterationRecord {
    fn initial(x: f64, y: f64) -> Self {
        Self {
            step_index: 0,
            x,
            y,
            k1: None,
            x_mid: None,
            y_mid: None,
            f_mid: None,
            x_next: x,
            y_next: y,
        }
    }

    fn from_step(
        step_index: usize,
        (x, y): (f64, f64),
        stages: MidpointStages,
        (x_next, y_next): (f64, f64),
    ) -> Self {
        Self {
            step_index,
            x,
            y,
            k1: Some(stages.k1),
            x_mid: Some(stages.x_mid),
            y_mid: Some(stages.y_mid),
            f_mid: Some(stages.f_mid),
            x_next,
            y_next,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// The iteration cap fired before `xf` was reached; the records are partial.
    IterationCapReached,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub records: Vec<IterationRecord>,
    pub status: RunStatus,
}

impl Trajectory {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Number of steps taken (records minus the initial condition).
    pub fn steps(&self) -> usize {
        self.records.len().saturating_sub(1)
    }

    /// The last computed `(x, y)`.
    pub fn final_point(&self) -> Option<(f64, f64)> {
        self.records.last().map(|r| (r.x_next, r.y_next))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Initialized,
    Stepping,
    Done,
}

/// Incremental RK2 integration from `x0` to `xf`.
///
/// Parameters are validated on construction; the initial record is present
/// from the start. Each `step` appends one record until the run is `Done`.
pub struct MidpointRunner<D: Derivative> {
    rhs: D,
    stepper: MidpointStepper,
    xf: f64,
    h: f64,
    tolerance: f64,
    max_iterations: usize,
    x: f64,
    y: f64,
    records: Vec<IterationRecord>,
    phase: RunPhase,
    status: Option<RunStatus>,
}

impl<D: Derivative> MidpointRunner<D> {
    pub fn new(
        rhs: D,
        x0: f64,
        y0: f64,
        xf: f64,
        h: f64,
        settings: StepperSettings,
    ) -> Result<Self, InvalidStepError> {
        if !(x0.is_finite() && y0.is_finite() && xf.is_finite() && h.is_finite()) {
            return Err(InvalidStepError::NonFinite { x0, y0, xf, h });
        }
        if h <= 0.0 {
            return Err(InvalidStepError::NonPositive { h });
        }
        if settings.max_iterations == 0 {
            return Err(InvalidStepError::ZeroIterationCap);
        }
        if !(settings.tolerance_factor.is_finite() && settings.tolerance_factor > 0.0) {
            return Err(InvalidStepError::InvalidTolerance(settings.tolerance_factor));
        }

        if xf < x0 {
            return Err(InvalidStepError::DirectionMismatch { x0, xf, h });
        }
        let tolerance = h * settings.tolerance_factor;

        Ok(Self {
            rhs,
            stepper: MidpointStepper,
            xf,
            h,
            tolerance,
            max_iterations: settings.max_iterations,
            x: x0,
            y: y0,
            records: vec![IterationRecord::initial(x0, y0)],
            phase: RunPhase::Initialized,
            status: None,
        })
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// `None` until the run is `Done`.
    pub fn status(&self) -> Option<RunStatus> {
        self.status
    }

    pub fn is_done(&self) -> bool {
        self.phase == RunPhase::Done
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn steps_taken(&self) -> usize {
        self.records.len() - 1
    }

    pub fn current(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Advances one step. Returns `None` once the run is `Done`.
    ///
    /// A failing right-hand side leaves the runner where it was.
    pub fn step(&mut self) -> Result<Option<&IterationRecord>, OdeError> {
        if self.phase == RunPhase::Initialized {
            self.phase = RunPhase::Stepping;
            self.update_phase();
        }
        if self.phase == RunPhase::Done {
            return Ok(None);
        }

        let start = (self.x, self.y);
        let (mut x, mut y) = start;
        let stages = self.stepper.step(&self.rhs, &mut x, &mut y, self.h)?;
        self.x = x;
        self.y = y;

        let record = IterationRecord::from_step(self.records.len(), start, stages, (x, y));
        self.records.push(record);
        self.update_phase();

        Ok(self.records.last())
    }

    /// Steps until `Done`.
    pub fn run_to_end(mut self) -> Result<Trajectory, OdeError> {
        while self.step()?.is_some() {}
        let status = self.status.unwrap_or(RunStatus::Completed);
        Ok(Trajectory {
            records: self.records,
            status,
        })
    }

    /// Snapshot of the records so far; `None` while the run is still going.
    pub fn trajectory(&self) -> Option<Trajectory> {
        self.status.map(|status| Trajectory {
            records: self.records.clone(),
            status,
        })
    }

    fn update_phase(&mut self) {
        if self.xf - self.x <= self.tolerance {
            self.phase = RunPhase::Done;
            self.status = Some(RunStatus::Completed);
            debug!(steps = self.steps_taken(), x = self.x, y = self.y, "reached xf");
        } else if self.steps_taken() >= self.max_iterations {
            self.phase = RunPhase::Done;
            self.status = Some(RunStatus::IterationCapReached);
            warn!(
                max_iterations = self.max_iterations,
                x = self.x,
                xf = self.xf,
                "iteration cap reached before xf"
            );
        }
    }
}

/// Integrates `y' = rhs(x, y)` from `(x0, y0)` to `xf` with step `h`.
pub fn run<D: Derivative>(rhs: D, x0: f64, y0: f64, xf: f64, h: f64) -> Result<Trajectory, OdeError> {
    run_with_settings(rhs, x0, y0, xf, h, StepperSettings::default())
}

pub fn run_with_settings<D: Derivative>(
    rhs: D,
    x0: f64,
    y0: f64,
    xf: f64,
    h: f64,
    settings: StepperSettings,
) -> Result<Trajectory, OdeError> {
    MidpointRunner::new(rhs, x0, y0, xf, h, settings)?.run_to_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation_engine::Expression;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T, OdeError>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn midpoint_step_matches_hand_computation() {
        let rhs = |x: f64, y: f64| 4.0 * x + y;
        let (mut x, mut y) = (1.0, 2.0);
        let stages = MidpointStepper
            .step(&rhs, &mut x, &mut y, 0.1)
            .expect("step should succeed");

        assert!((stages.k1 - 0.6).abs() < 1e-12);
        assert!((stages.x_mid - 1.05).abs() < 1e-12);
        assert!((stages.y_mid - 2.3).abs() < 1e-12);
        assert!((stages.f_mid - 6.5).abs() < 1e-12);
        assert!((x - 1.1).abs() < 1e-12);
        assert!((y - 2.65).abs() < 1e-12);
    }

    #[test]
    fn cubic_decay_reaches_xf_in_five_steps() {
        let rhs = |x: f64, y: f64| -3.0 * x * x * y;
        let trajectory = run(rhs, 0.0, 3.0, 0.5, 0.1).expect("run should succeed");

        assert!(trajectory.is_complete());
        assert_eq!(trajectory.steps(), 5);
        let (x, y) = trajectory.final_point().expect("final point");
        assert!((x - 0.5).abs() < 1e-9);
        let exact = 3.0 * (-0.125_f64).exp();
        assert!((y - exact).abs() < 1e-2, "y = {y}, exact = {exact}");
    }

    #[test]
    fn user_expression_matches_closure() {
        let expr = Expression::parse("-3*x^2*y").expect("expression should parse");
        let from_expr = run(expr, 0.0, 3.0, 0.5, 0.1).expect("run should succeed");
        let from_closure =
            run(|x: f64, y: f64| -3.0 * x * x * y, 0.0, 3.0, 0.5, 0.1).expect("run should succeed");

        assert_eq!(from_expr.records.len(), from_closure.records.len());
        for (a, b) in from_expr.records.iter().zip(&from_closure.records) {
            assert!((a.y_next - b.y_next).abs() < 1e-12);
        }
    }

    #[test]
    fn zero_rhs_keeps_y_constant() {
        let trajectory = run(|_: f64, _: f64| 0.0, -1.0, 7.25, 2.0, 0.25).expect("run");
        assert_eq!(trajectory.steps(), 12);
        for record in &trajectory.records {
            assert_eq!(record.y, 7.25);
            assert_eq!(record.y_next, 7.25);
        }
    }

    #[test]
    fn records_chain_and_start_with_initial_condition() {
        let trajectory = run(|x: f64, y: f64| x + y, 0.0, 1.0, 0.3, 0.1).expect("run");
        let first = trajectory.records[0];
        assert_eq!(first.step_index, 0);
        assert_eq!((first.x, first.y), (0.0, 1.0));
        assert_eq!((first.x_next, first.y_next), (0.0, 1.0));
        assert!(first.k1.is_none() && first.x_mid.is_none());
        assert!(first.y_mid.is_none() && first.f_mid.is_none());

        for pair in trajectory.records.windows(2) {
            assert_eq!(pair[1].step_index, pair[0].step_index + 1);
            assert_eq!(pair[1].x, pair[0].x_next);
            assert_eq!(pair[1].y, pair[0].y_next);
            assert!(pair[1].k1.is_some() && pair[1].f_mid.is_some());
        }
    }

    #[test]
    fn empty_interval_yields_only_initial_record() {
        let trajectory = run(|_: f64, y: f64| y, 2.0, 1.0, 2.0, 0.1).expect("run");
        assert!(trajectory.is_complete());
        assert_eq!(trajectory.records.len(), 1);
    }

    #[test]
    fn interval_not_multiple_of_h_stops_after_passing_xf() {
        let trajectory = run(|_: f64, _: f64| 1.0, 0.0, 0.0, 0.25, 0.1).expect("run");
        assert!(trajectory.is_complete());
        assert_eq!(trajectory.steps(), 3);
    }

    #[test]
    fn iteration_cap_is_reported() {
        let trajectory = run(|_: f64, _: f64| 1.0, 0.0, 0.0, 10.0, 0.001).expect("run");
        assert!(!trajectory.is_complete());
        assert_eq!(trajectory.status, RunStatus::IterationCapReached);
        assert_eq!(trajectory.steps(), DEFAULT_MAX_ITERATIONS);

        let settings = StepperSettings {
            max_iterations: 3,
            ..StepperSettings::default()
        };
        let trajectory =
            run_with_settings(|_: f64, _: f64| 1.0, 0.0, 0.0, 1.0, 0.1, settings).expect("run");
        assert_eq!(trajectory.status, RunStatus::IterationCapReached);
        assert_eq!(trajectory.records.len(), 4);
    }

    #[test]
    fn rejects_invalid_step_parameters() {
        let rhs = |_: f64, y: f64| y;
        assert_err_contains(run(rhs, 0.0, 1.0, 1.0, 0.0), "must be positive");
        assert_err_contains(run(rhs, 0.0, 1.0, 1.0, -0.1), "must be positive");
        assert_err_contains(run(rhs, 1.0, 1.0, 0.0, 0.1), "Direction mismatch");
        assert_err_contains(run(rhs, 0.0, 1.0, -0.5, 100.0), "Direction mismatch");
        assert_err_contains(run(rhs, 0.0, 1.0, -1e-12, 0.1), "Direction mismatch");
        assert_err_contains(run(rhs, 0.0, f64::NAN, 1.0, 0.1), "must be finite");

        let settings = StepperSettings {
            max_iterations: 0,
            ..StepperSettings::default()
        };
        assert_err_contains(
            run_with_settings(rhs, 0.0, 1.0, 1.0, 0.1, settings),
            "Iteration cap",
        );
    }

    #[test]
    fn expression_failures_propagate() {
        let expr = Expression::parse("1 / (x - 0.2)").expect("expression should parse");
        let result = run(expr, 0.0, 1.0, 1.0, 0.1);
        assert!(matches!(
            result,
            Err(OdeError::Expression(ExpressionError::NonFinite { .. }))
        ));
    }

    #[test]
    fn runner_moves_through_phases() {
        let mut runner =
            MidpointRunner::new(|_: f64, _: f64| 2.0, 0.0, 0.0, 0.2, 0.1, StepperSettings::default())
                .expect("runner");
        assert_eq!(runner.phase(), RunPhase::Initialized);
        assert_eq!(runner.records().len(), 1);
        assert_eq!(runner.status(), None);
        assert!(runner.trajectory().is_none());

        let record = *runner.step().expect("step").expect("record");
        assert_eq!(record.step_index, 1);
        assert!((record.y_next - 0.2).abs() < 1e-12);
        assert_eq!(runner.phase(), RunPhase::Stepping);

        runner.step().expect("step").expect("record");
        assert_eq!(runner.phase(), RunPhase::Done);
        assert_eq!(runner.status(), Some(RunStatus::Completed));
        assert!(runner.step().expect("step").is_none());
        assert_eq!(runner.trajectory().expect("trajectory").steps(), 2);
    }

    #[test]
    fn failed_step_leaves_runner_unchanged() {
        let expr = Expression::parse("log(0.05 - x)").expect("expression should parse");
        let mut runner =
            MidpointRunner::new(expr, 0.0, 0.0, 1.0, 0.1, StepperSettings::default())
                .expect("runner");
        assert!(runner.step().is_err());
        assert_eq!(runner.records().len(), 1);
        assert_eq!(runner.current(), (0.0, 0.0));
    }
}
