//! Tamper-evident audit log for document events

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Metadata keys with meaning to the audit trail renderer.
pub mod meta {
    pub const SIGNER_NAME: &str = "signer_name";
    pub const SIGNER_EMAIL: &str = "signer_email";
    pub const SPOT_KEY: &str = "spot_key";
    pub const CONTENT_HASH: &str = "content_hash";
    pub const RECIPIENT: &str = "recipient";
}

/// Kinds of auditable document events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    Created,
    Sent,
    Viewed,
    ConsentGiven,
    SignatureCaptured,
    SignerCompleted,
    NotificationSent,
    Completed,
}

impl AuditEventKind {
    /// Human label used on the rendered audit trail.
    pub fn label(self) -> &'static str {
        match self {
            AuditEventKind::Created => "Document Created",
            AuditEventKind::Sent => "Document Sent",
            AuditEventKind::Viewed => "Document Viewed",
            AuditEventKind::ConsentGiven => "Consent Given",
            AuditEventKind::SignatureCaptured => "Signature Captured",
            AuditEventKind::SignerCompleted => "Signer Completed",
            AuditEventKind::NotificationSent => "Notification Sent",
            AuditEventKind::Completed => "Document Completed",
        }
    }
}

/// A single audit log entry. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub kind: AuditEventKind,
    pub created_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Free-form detail map (signer name/email, spot key, content hash).
    /// BTreeMap so hashing and rendering order are stable.
    pub metadata: BTreeMap<String, String>,
    pub previous_hash: Option<String>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, previous_hash: Option<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            kind,
            created_at: Utc::now(),
            ip: None,
            user_agent: None,
            metadata: BTreeMap::new(),
            previous_hash,
        }
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Compute the hash of this event (for chain linking)
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.event_id.as_bytes());
        hasher.update(self.created_at.to_rfc3339().as_bytes());
        hasher.update(format!("{:?}", self.kind).as_bytes());
        if let Some(ref ip) = self.ip {
            hasher.update(ip.as_bytes());
        }
        for (k, v) in &self.metadata {
            hasher.update(k.as_bytes());
            hasher.update(v.as_bytes());
        }
        if let Some(ref prev) = self.previous_hash {
            hasher.update(prev.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Chain of audit events with hash linking
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AuditChain {
    pub events: Vec<AuditEvent>,
    pub document_id: String,
    pub created_at: String,
}

impl AuditChain {
    /// Create a new audit chain for a document
    pub fn new(document_id: &str) -> Self {
        Self {
            events: Vec::new(),
            document_id: document_id.to_string(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    /// Get the hash of the last event (for linking)
    pub fn last_hash(&self) -> Option<String> {
        self.events.last().map(|e| e.compute_hash())
    }

    /// Append a bare event of the given kind, linked to the previous hash.
    pub fn append(&mut self, kind: AuditEventKind) -> &AuditEvent {
        let event = AuditEvent::new(kind, self.last_hash());
        self.push(event)
    }

    /// Append a pre-built event, overriding its link to keep the chain
    /// intact.
    pub fn push(&mut self, mut event: AuditEvent) -> &AuditEvent {
        event.previous_hash = self.last_hash();
        self.events.push(event);
        self.events.last().unwrap()
    }

    /// Verify the integrity of the chain
    pub fn verify(&self) -> Result<(), String> {
        let mut expected_prev: Option<String> = None;

        for (i, event) in self.events.iter().enumerate() {
            if event.previous_hash != expected_prev {
                return Err(format!(
                    "Chain broken at event {}: expected prev {:?}, got {:?}",
                    i, expected_prev, event.previous_hash
                ));
            }
            expected_prev = Some(event.compute_hash());
        }

        Ok(())
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize audit chain: {}", e))
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("Failed to deserialize audit chain: {}", e))
    }
}

/// Compute SHA-256 hash of document bytes
pub fn hash_document(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
