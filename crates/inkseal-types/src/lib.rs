//! Shared types for the document annotation & finalization engine
//!
//! This crate holds the pure model layer: spot geometry and the two
//! coordinate frames, the signer/submission data model, and the
//! hash-chained audit event log. No I/O lives here.

pub mod audit;
pub mod geometry;
pub mod model;

pub use audit::{hash_document, AuditChain, AuditEvent, AuditEventKind};
pub use geometry::{authoring_to_pdf, pdf_to_authoring};
pub use model::{
    is_truthy_checkbox, FieldType, ModelError, SignatureAsset, Signer, SignerStatus, Spot,
    SpotKind, TextFieldValue,
};
