use thiserror::Error;

/// Canonical quarry error taxonomy used across crates.
///
/// Classification guidance:
/// - [`QuarryError::InvalidShape`]: a plan tree that cannot exist (bad column index,
///   type mismatch between an operator and its input)
/// - [`QuarryError::Planning`]: name/type issues discovered while building expressions or plans
/// - [`QuarryError::Metadata`]: a metadata request that is structurally invalid
///   (unknown metadata is `Ok(None)`, never an error)
/// - [`QuarryError::Execution`]: runtime operator evaluation or channel failures
/// - [`QuarryError::Accumulator`]: aggregate state failures (user aggregate errors, overflow)
/// - [`QuarryError::Cancelled`]: cooperative cancellation observed by an execution unit
/// - [`QuarryError::InvalidConfig`]: catalog/config/environment contract violations
/// - [`QuarryError::Unsupported`]: valid request for behavior not implemented
/// - [`QuarryError::Io`]: raw filesystem failures from std APIs
#[derive(Debug, Error)]
pub enum QuarryError {
    /// Invalid or inconsistent configuration/catalog state.
    ///
    /// Examples:
    /// - malformed catalog JSON
    /// - invalid `QUARRY_*` environment values
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Expression or plan construction failures caused by names and types.
    #[error("planning error: {0}")]
    Planning(String),

    /// Structurally invalid operator tree.
    ///
    /// Examples:
    /// - `InputRef` index beyond the input row shape
    /// - non-boolean filter predicate
    /// - set operation over inputs of different arity
    #[error("invalid plan shape: {0}")]
    InvalidShape(String),

    /// Structurally invalid metadata request, such as a node that does not
    /// belong to the plan being analyzed.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Runtime execution failures after planning succeeded.
    #[error("execution error: {0}")]
    Execution(String),

    /// Aggregate accumulator failures.
    ///
    /// Examples:
    /// - user-defined aggregate `init`/`add`/`result` returned an error
    /// - integer overflow in a built-in `SUM`
    #[error("accumulator error: {0}")]
    Accumulator(String),

    /// Execution was cancelled before the unit finished emitting.
    #[error("execution cancelled")]
    Cancelled,

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a feature/shape not implemented in current version.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<serde_json::Error> for QuarryError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidConfig(format!("json: {value}"))
    }
}

/// Standard quarry result alias.
pub type Result<T> = std::result::Result<T, QuarryError>;
