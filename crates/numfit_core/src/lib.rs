pub mod builtin;
pub mod equation_engine;
pub mod error;
pub mod goodness_of_fit;
pub mod linear_solver;
pub mod regression;
pub mod solvers;
/// The `numfit_core` crate provides the numerical engines behind numfit.
/// Every operation is a pure function of its inputs; nothing is cached between calls.
///
/// Key components:
/// - **Traits**: `Scalar` (numeric type abstraction), `Derivative` (ODE right-hand sides), `Steppable` (Solvers).
/// - **Equation Engine**: Parser, compiler and bytecode VM for user-defined `f(x, y)` expressions.
/// - **Solvers**: RK2 midpoint stepping with a step-by-step runner.
/// - **Regression**: Linear, quadratic, exponential and power least-squares fits scored by R².
pub mod traits;
