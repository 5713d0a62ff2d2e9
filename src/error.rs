use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The detector found no usable face in the image.
    #[error("No face detected in image")]
    NoFaceDetected,

    /// Unknown identity name, face id or stored vector.
    #[error("{0} not found")]
    NotFound(String),

    /// The similarity index refused to return this many neighbors.
    #[error("index cannot return {requested} results")]
    IndexCapacityExceeded { requested: usize },

    /// Malformed request; `invalid` lists the offending names, if any.
    #[error("{message}")]
    Validation {
        message: String,
        invalid: Vec<String>,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            invalid: Vec::new(),
        }
    }
}
