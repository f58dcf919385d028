//! Document completion engine: the multi-signer state machine and the
//! mobile hand-off session store, driving the stamping and audit-trail
//! rendering in `inkseal-pdf`.

pub mod error;
pub mod flow;
pub mod session;

pub use error::{FlowError, SessionError};
pub use flow::{DocumentStatus, FinalizedDocument, SigningFlow, SubmissionOutcome};
pub use session::{HandoffSession, HandoffStatus, PollOutcome, SessionStore};
