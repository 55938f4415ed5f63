//! Input checks that turn into 400 problem responses.

use crate::ProblemDetails;

/// Implemented by query and body types that carry constraints serde cannot
/// express. Handlers call it before touching the input.
pub trait Validate {
    /// `Err` holds the response to send back, usually a
    /// [`ProblemDetails::bad_request`].
    fn validate(&self) -> Result<(), Box<ProblemDetails>>;
}

/// Reject a missing or blank string field.
pub fn require_non_blank(field: &str, value: Option<&str>) -> Result<(), Box<ProblemDetails>> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(Box::new(ProblemDetails::bad_request(format!(
            "The '{}' parameter is required and cannot be empty",
            field
        )))),
    }
}
