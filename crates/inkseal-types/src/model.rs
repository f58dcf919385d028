//! Data model for spots, signers, and signer-submitted values

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// PNG magic bytes; signature images are PNG-only at this boundary.
pub const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("spot {0} has non-positive dimensions")]
    EmptySpot(String),

    #[error("spot {0} has page index 0 (pages are 1-based)")]
    ZeroPage(String),

    #[error("duplicate spot key: {0}")]
    DuplicateSpotKey(String),

    #[error("duplicate signer token for {0}")]
    DuplicateSignerToken(String),

    #[error("signature image for spot {0} is not a PNG")]
    NotPng(String),
}

/// The kind of action a spot solicits from its signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotKind {
    Signature,
    Initial,
    Text,
    Date,
    Checkbox,
}

impl SpotKind {
    /// Whether this spot is filled by an image rather than a text value.
    pub fn takes_image(self) -> bool {
        matches!(self, SpotKind::Signature | SpotKind::Initial)
    }
}

/// One fillable rectangular region on one page of a document.
///
/// Coordinates are PDF points in the authoring frame (top-left origin,
/// y down); `page` is 1-based. Spots are configured once and immutable
/// for the lifetime of the signing flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spot {
    pub spot_key: String,
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub kind: SpotKind,
    pub signer_role: String,
}

impl Spot {
    /// Check the per-spot invariants: positive extent, 1-based page.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.w <= 0.0 || self.h <= 0.0 {
            return Err(ModelError::EmptySpot(self.spot_key.clone()));
        }
        if self.page == 0 {
            return Err(ModelError::ZeroPage(self.spot_key.clone()));
        }
        Ok(())
    }
}

/// Validate a full spot list: each spot's invariants plus key uniqueness.
pub fn validate_spots(spots: &[Spot]) -> Result<(), ModelError> {
    let mut seen = std::collections::HashSet::new();
    for spot in spots {
        spot.validate()?;
        if !seen.insert(spot.spot_key.as_str()) {
            return Err(ModelError::DuplicateSpotKey(spot.spot_key.clone()));
        }
    }
    Ok(())
}

/// A submitted signature or initial image, bound to one spot.
///
/// At most one asset exists per spot key; the stamping path never
/// overwrites a filled spot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureAsset {
    pub spot_key: String,
    pub image: Vec<u8>,
    pub signed_at: Option<DateTime<Utc>>,
    pub signer_role: String,
    pub signer_email: String,
}

impl SignatureAsset {
    /// Reject non-PNG payloads before they reach the stamping engine.
    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.image.starts_with(&PNG_MAGIC) {
            return Err(ModelError::NotPng(self.spot_key.clone()));
        }
        Ok(())
    }
}

/// Which text-like value a [`TextFieldValue`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Date,
    Checkbox,
}

/// A submitted text, date, or checkbox value, bound to one spot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextFieldValue {
    pub spot_key: String,
    pub value: String,
    pub field_type: FieldType,
}

impl TextFieldValue {
    /// Checkbox truthiness for this value.
    pub fn is_checked(&self) -> bool {
        is_truthy_checkbox(&self.value)
    }
}

/// Recognized truthy checkbox literals. Everything else is falsy.
pub fn is_truthy_checkbox(value: &str) -> bool {
    matches!(value, "true" | "on" | "1")
}

/// Whether a signer has filled every spot required of their role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerStatus {
    Pending,
    Completed,
}

impl std::fmt::Display for SignerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignerStatus::Pending => write!(f, "pending"),
            SignerStatus::Completed => write!(f, "completed"),
        }
    }
}

/// One party required to act on a document.
///
/// `token` is the signer's capability to act and must be unique within a
/// document. `order_index` is the intended signing sequence; it is
/// advisory display order and does not gate submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signer {
    pub email: String,
    pub name: String,
    pub role: String,
    pub token: String,
    pub order_index: u32,
    pub status: SignerStatus,
}

/// Validate a signer list: token uniqueness.
pub fn validate_signers(signers: &[Signer]) -> Result<(), ModelError> {
    let mut seen = std::collections::HashSet::new();
    for signer in signers {
        if !seen.insert(signer.token.as_str()) {
            return Err(ModelError::DuplicateSignerToken(signer.email.clone()));
        }
    }
    Ok(())
}
