//! Short-lived hand-off sessions for capturing a signature on a second
//! device.
//!
//! The desktop creates a session, shows its token (typically as a QR
//! code), and polls; the phone completes it once with a drawn PNG.
//! Expiry is lazy: a session past its deadline flips to Expired the next
//! time anything touches it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use inkseal_types::model::{SignatureAsset, Signer};

use crate::error::SessionError;

pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffStatus {
    Pending,
    Completed,
    Expired,
}

#[derive(Debug, Clone)]
pub struct HandoffSession {
    pub token: String,
    pub document_id: String,
    pub signer_email: String,
    pub signer_role: String,
    pub spot_key: String,
    pub status: HandoffStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    asset: Option<SignatureAsset>,
}

/// What the polling device sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Completed(SignatureAsset),
    Expired,
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, HandoffSession>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        SessionStore::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            sessions: Mutex::new(HashMap::new()),
            ttl: Duration::minutes(DEFAULT_SESSION_TTL_MINUTES),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        SessionStore {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Open a session for one signer and one spot. The returned token is
    /// unguessable and doubles as the session id.
    pub fn create(&self, document_id: &str, signer: &Signer, spot_key: &str) -> HandoffSession {
        let now = Utc::now();
        let session = HandoffSession {
            token: Uuid::new_v4().to_string(),
            document_id: document_id.to_owned(),
            signer_email: signer.email.clone(),
            signer_role: signer.role.clone(),
            spot_key: spot_key.to_owned(),
            status: HandoffStatus::Pending,
            created_at: now,
            expires_at: now + self.ttl,
            completed_at: None,
            asset: None,
        };
        debug!(token = %session.token, spot_key, "hand-off session created");
        self.lock()
            .insert(session.token.clone(), session.clone());
        session
    }

    /// Desktop-side poll. Returns the captured asset once the phone has
    /// completed the session.
    pub fn poll(&self, token: &str) -> Result<PollOutcome, SessionError> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(token).ok_or(SessionError::NotFound)?;
        expire_if_due(session);
        Ok(match session.status {
            HandoffStatus::Pending => PollOutcome::Pending,
            HandoffStatus::Expired => PollOutcome::Expired,
            HandoffStatus::Completed => match &session.asset {
                Some(asset) => PollOutcome::Completed(asset.clone()),
                // Completed implies a stored asset.
                None => PollOutcome::Expired,
            },
        })
    }

    /// Phone-side completion with the drawn PNG. Single use: a second
    /// call fails even with identical bytes.
    pub fn complete(&self, token: &str, image: Vec<u8>) -> Result<SignatureAsset, SessionError> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(token).ok_or(SessionError::NotFound)?;
        expire_if_due(session);
        match session.status {
            HandoffStatus::Expired => return Err(SessionError::Expired),
            HandoffStatus::Completed => return Err(SessionError::AlreadyCompleted),
            HandoffStatus::Pending => {}
        }
        let now = Utc::now();
        let asset = SignatureAsset {
            spot_key: session.spot_key.clone(),
            image,
            signed_at: Some(now),
            signer_role: session.signer_role.clone(),
            signer_email: session.signer_email.clone(),
        };
        asset.validate()?;
        session.status = HandoffStatus::Completed;
        session.completed_at = Some(now);
        session.asset = Some(asset.clone());
        info!(token, spot_key = %session.spot_key, "hand-off session completed");
        Ok(asset)
    }

    /// Abandon a pending session so its token stops working.
    pub fn cancel(&self, token: &str) -> Result<(), SessionError> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(token).ok_or(SessionError::NotFound)?;
        expire_if_due(session);
        match session.status {
            HandoffStatus::Completed => Err(SessionError::AlreadyCompleted),
            _ => {
                session.status = HandoffStatus::Expired;
                Ok(())
            }
        }
    }

    /// Drop every session past its deadline. Completed sessions stay
    /// until then so the desktop can still collect the asset. Callers may
    /// run this on a timer; correctness never depends on it thanks to
    /// lazy expiry.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| s.status != HandoffStatus::Expired && s.expires_at > now);
        before - sessions.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HandoffSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn expire_if_due(session: &mut HandoffSession) {
    if session.status == HandoffStatus::Pending && Utc::now() >= session.expires_at {
        session.status = HandoffStatus::Expired;
    }
}
