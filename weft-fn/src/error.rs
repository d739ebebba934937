//! Function invocation errors.

use weft_store::StoreError;

/// Errors from invoking a composition function.
///
/// Terminal errors surface to the user and are not retried within the same
/// reconcile; transient ones requeue with backoff.
#[derive(Debug)]
pub enum FunctionError {
    /// The call itself is wrong (bad request, unimplemented protocol,
    /// missing TLS configuration). Retrying the same call cannot help.
    Terminal { function: String, message: String },
    /// The transport failed; the next reconcile retries.
    Transient { function: String, message: String },
    /// A step's requirements kept changing past the iteration cap.
    RequirementsUnstable { step: String },
    /// Resolving a requirement against the store failed.
    Fetch(StoreError),
}

impl FunctionError {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FunctionError::Terminal { .. } | FunctionError::RequirementsUnstable { .. }
        )
    }
}

impl std::fmt::Display for FunctionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionError::Terminal { function, message } => {
                write!(f, "Function {function} failed terminally: {message}")
            }
            FunctionError::Transient { function, message } => {
                write!(f, "Function {function} transport error: {message}")
            }
            FunctionError::RequirementsUnstable { step } => {
                write!(
                    f,
                    "Step {step}: extra resource requirements did not stabilize"
                )
            }
            FunctionError::Fetch(err) => write!(f, "Fetching extra resources: {err}"),
        }
    }
}

impl std::error::Error for FunctionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FunctionError::Fetch(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for FunctionError {
    fn from(err: StoreError) -> Self {
        FunctionError::Fetch(err)
    }
}
