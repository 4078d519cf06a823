use thiserror::Error;

/// Rejections a caller is expected to handle (as opposed to I/O or
/// database failures, which travel as plain `anyhow::Error`).
#[derive(Debug, Error, PartialEq)]
pub enum RollcallError {
    #[error("no face detected in image")]
    NoFace,

    #[error("{0} faces detected; exactly one person must be in the image")]
    MultipleFaces(usize),

    #[error("face is already enrolled for person {person_id} ({name}), distance {distance:.4}")]
    AlreadyEnrolled {
        person_id: i64,
        name: String,
        distance: f32,
    },

    #[error("person {0} not found")]
    PersonNotFound(i64),

    #[error("tolerance must be a finite number greater than zero, got {0}")]
    InvalidTolerance(f32),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("invalid attendance status '{0}', expected present, absent or leave")]
    InvalidStatus(String),

    #[error("invalid role '{0}', expected student or teacher")]
    InvalidRole(String),

    #[error("corrupt embedding blob of {0} bytes")]
    CorruptEmbedding(usize),
}

/// Reject tolerances that would make every or no face match.
pub fn validate_tolerance(tolerance: f32) -> Result<f32, RollcallError> {
    if tolerance.is_finite() && tolerance > 0.0 {
        Ok(tolerance)
    } else {
        Err(RollcallError::InvalidTolerance(tolerance))
    }
}
