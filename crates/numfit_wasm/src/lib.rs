//! WASM bridge for numfit.
//!
//! The browser front end hands parsed inputs to these entry points and renders
//! the serialized results. CSV ingest lives here, not in the core.

pub mod dataset;
pub mod ode;
pub mod regression;

pub use ode::{integrate_builtin, integrate_midpoint, WasmMidpointRunner};
pub use regression::{fit_csv, fit_samples};
