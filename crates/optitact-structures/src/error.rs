use std::error::Error;
use std::fmt::{Display, Formatter};

/// Common error type for Optitact data operations.
///
/// Covers validation, serialization, and internal failures across the
/// tactile processing pipeline.
///
/// # Examples
/// ```
/// use optitact_structures::OptitactDataError;
///
/// fn validate_count(count: u32) -> Result<(), OptitactDataError> {
///     if count == 0 {
///         return Err(OptitactDataError::BadParameters("Count must be > 0".into()));
///     }
///     Ok(())
/// }
///
/// assert!(validate_count(0).is_err());
/// assert!(validate_count(5).is_ok());
/// ```
#[derive(Debug)]
pub enum OptitactDataError {
    /// Failed to deserialize bytes into data structures
    DeserializationError(String),
    /// Failed to serialize data structures into bytes
    SerializationError(String),
    /// Invalid parameters provided to a function
    BadParameters(String),
    /// A stage read a field that was never published, or published the wrong shape
    FieldContract(String),
    /// Internal error indicating a bug (please report)
    InternalError(String),
}

impl Display for OptitactDataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OptitactDataError::DeserializationError(msg) => {
                write!(f, "Failed to Deserialize Bytes: {}", msg)
            }
            OptitactDataError::SerializationError(msg) => {
                write!(f, "Failed to Serialize Bytes: {}", msg)
            }
            OptitactDataError::BadParameters(msg) => write!(f, "Bad Parameters: {}", msg),
            OptitactDataError::FieldContract(msg) => write!(f, "Field Contract Violation: {}", msg),
            OptitactDataError::InternalError(msg) => write!(
                f,
                "Internal Error, please raise an issue on Github: {}",
                msg
            ),
        }
    }
}
impl Error for OptitactDataError {}
