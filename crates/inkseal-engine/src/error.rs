use thiserror::Error;

use inkseal_pdf::PdfError;
use inkseal_types::model::ModelError;

/// Errors from the completion state machine.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("No signer holds this token")]
    UnknownSigner,

    #[error("No spot named '{0}' exists on this document")]
    UnknownSpot(String),

    #[error("Role '{role}' may not fill spot '{spot_key}'")]
    PermissionDenied { role: String, spot_key: String },

    #[error("Spot '{0}' already holds a submission")]
    SpotAlreadyFilled(String),

    #[error("Spot '{spot_key}' takes {expected}, not {got}")]
    KindMismatch {
        spot_key: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("Spot '{spot_key}' is assigned to role '{role}', which no signer holds")]
    UnassignedRole { spot_key: String, role: String },

    #[error("Document has not been sent to its signers yet")]
    NotSent,

    #[error("Document is already completed")]
    AlreadyCompleted,

    #[error("Not every required spot has a submission")]
    NotReady,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Pdf(#[from] PdfError),
}

/// Errors from the mobile hand-off session store.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No session exists for this token")]
    NotFound,

    #[error("Session has expired")]
    Expired,

    #[error("Session was already completed")]
    AlreadyCompleted,

    #[error(transparent)]
    Model(#[from] ModelError),
}
