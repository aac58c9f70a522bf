use thiserror::Error;

/// Failure to parse, compile or evaluate a user-supplied expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("Expression is empty.")]
    Empty,
    #[error("Unexpected character '{ch}' at position {position}.")]
    UnexpectedCharacter { ch: char, position: usize },
    #[error("Malformed number '{0}'.")]
    InvalidNumber(String),
    #[error("Unexpected token {0}.")]
    UnexpectedToken(String),
    #[error("Unexpected end of expression.")]
    UnexpectedEnd,
    #[error("Unbalanced parentheses: expected ')'.")]
    UnbalancedParentheses,
    #[error("Unknown symbol '{0}'. Only x and y are defined.")]
    UnknownSymbol(String),
    #[error("Unknown function '{0}'.")]
    UnknownFunction(String),
    #[error("Expression nests deeper than {0} levels.")]
    TooDeep(usize),
    #[error("Malformed bytecode: {0}")]
    MalformedBytecode(&'static str),
    #[error("Expression evaluated to a non-finite value ({value}) at x = {x}, y = {y}.")]
    NonFinite { x: f64, y: f64, value: f64 },
}

/// Stepping parameters rejected before any iteration runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidStepError {
    #[error("Step size h must be positive, got {h}.")]
    NonPositive { h: f64 },
    #[error("Stepping inputs must be finite (x0 = {x0}, y0 = {y0}, xf = {xf}, h = {h}).")]
    NonFinite { x0: f64, y0: f64, xf: f64, h: f64 },
    #[error("Direction mismatch: cannot reach xf = {xf} from x0 = {x0} with h = {h}.")]
    DirectionMismatch { x0: f64, xf: f64, h: f64 },
    #[error("Iteration cap must be at least 1.")]
    ZeroIterationCap,
    #[error("Tolerance factor must be positive and finite, got {0}.")]
    InvalidTolerance(f64),
}

/// Anything that can stop an RK2 run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OdeError {
    #[error(transparent)]
    InvalidStep(#[from] InvalidStepError),
    #[error("Right-hand side failed: {0}")]
    Expression(#[from] ExpressionError),
}
