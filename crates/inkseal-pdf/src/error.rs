use thiserror::Error;

/// Errors surfaced while stamping a document or generating its audit trail.
#[derive(Error, Debug)]
pub enum PdfError {
    #[error("Failed to parse PDF: {0}")]
    Parse(String),

    #[error("PDF exceeds maximum size of {limit} bytes (got {size})")]
    TooLarge { size: usize, limit: usize },

    #[error("Invalid signature image for spot '{spot_key}': {reason}")]
    Image { spot_key: String, reason: String },

    #[error("PDF operation failed: {0}")]
    Operation(String),
}

impl From<lopdf::Error> for PdfError {
    fn from(err: lopdf::Error) -> Self {
        PdfError::Operation(err.to_string())
    }
}
