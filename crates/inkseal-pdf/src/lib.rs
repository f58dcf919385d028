//! PDF finalization for signed documents: burn submitted marks into page
//! content and append a rendered audit trail.

pub mod document;
pub mod error;
pub mod image;
pub mod metrics;
pub mod stamp;
pub mod trail;

#[cfg(test)]
mod testutil;

pub use document::PdfDocument;
pub use error::PdfError;
pub use stamp::{stamp, StampOutput, StampWarning, MAX_BASE_PDF_BYTES};
pub use trail::{append_audit_trail, TrailOptions};
