//! Multi-signer completion state machine.
//!
//! A document moves Created -> Sent -> Completed. Submissions are keyed by
//! spot and checked against the submitting signer's role; completion is
//! always recomputed from the authoritative submission set, never cached.
//! Finalization claims the Completed state with a compare-and-swap, so
//! concurrent callers produce exactly one finalized document.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{info, warn};

use inkseal_pdf::{append_audit_trail, stamp, StampWarning, TrailOptions};
use inkseal_types::audit::{hash_document, meta, AuditChain, AuditEvent, AuditEventKind};
use inkseal_types::model::{
    validate_signers, validate_spots, SignatureAsset, Signer, SignerStatus, Spot, SpotKind,
    TextFieldValue,
};

use crate::error::FlowError;

const CREATED: u8 = 0;
const SENT: u8 = 1;
const COMPLETED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Created,
    Sent,
    Completed,
}

/// What a successful submission meant for overall progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Recorded; the signer still has open spots.
    Recorded,
    /// This signer just filled their last spot.
    SignerCompleted,
    /// Every spot on the document is now filled.
    DocumentReady,
}

#[derive(Debug)]
enum Submission {
    Image(SignatureAsset),
    Value(TextFieldValue),
}

/// The finalized document and the hash recorded in its completion event.
#[derive(Debug)]
pub struct FinalizedDocument {
    pub pdf: Vec<u8>,
    pub content_hash: String,
    pub warnings: Vec<StampWarning>,
}

#[derive(Debug)]
pub struct SigningFlow {
    document_id: String,
    title: String,
    spots: Vec<Spot>,
    signers: Vec<Signer>,
    status: AtomicU8,
    submissions: Mutex<HashMap<String, Submission>>,
    audit: Mutex<AuditChain>,
}

impl SigningFlow {
    pub fn new(
        document_id: &str,
        title: &str,
        spots: Vec<Spot>,
        signers: Vec<Signer>,
    ) -> Result<Self, FlowError> {
        validate_spots(&spots)?;
        validate_signers(&signers)?;
        for spot in &spots {
            if !signers.iter().any(|s| s.role == spot.signer_role) {
                return Err(FlowError::UnassignedRole {
                    spot_key: spot.spot_key.clone(),
                    role: spot.signer_role.clone(),
                });
            }
        }
        let mut audit = AuditChain::new(document_id);
        audit.append(AuditEventKind::Created);
        info!(document_id, spots = spots.len(), signers = signers.len(), "flow created");
        Ok(SigningFlow {
            document_id: document_id.to_owned(),
            title: title.to_owned(),
            spots,
            signers,
            status: AtomicU8::new(CREATED),
            submissions: Mutex::new(HashMap::new()),
            audit: Mutex::new(audit),
        })
    }

    pub fn status(&self) -> DocumentStatus {
        match self.status.load(Ordering::SeqCst) {
            CREATED => DocumentStatus::Created,
            SENT => DocumentStatus::Sent,
            _ => DocumentStatus::Completed,
        }
    }

    /// Move the document to Sent and record a notification per signer.
    /// Calling again while Sent is a no-op.
    pub fn mark_sent(&self) -> Result<(), FlowError> {
        match self
            .status
            .compare_exchange(CREATED, SENT, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                let mut audit = self.lock_audit();
                audit.append(AuditEventKind::Sent);
                for signer in &self.signers {
                    let event =
                        AuditEvent::new(AuditEventKind::NotificationSent, audit.last_hash())
                            .with_meta(meta::RECIPIENT, signer.email.clone());
                    audit.push(event);
                }
                Ok(())
            }
            Err(SENT) => Ok(()),
            Err(_) => Err(FlowError::AlreadyCompleted),
        }
    }

    fn signer_for_token(&self, token: &str) -> Result<&Signer, FlowError> {
        self.signers
            .iter()
            .find(|s| s.token == token)
            .ok_or(FlowError::UnknownSigner)
    }

    fn spot_for_key(&self, spot_key: &str) -> Result<&Spot, FlowError> {
        self.spots
            .iter()
            .find(|s| s.spot_key == spot_key)
            .ok_or_else(|| FlowError::UnknownSpot(spot_key.to_owned()))
    }

    pub fn record_view(
        &self,
        token: &str,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(), FlowError> {
        self.record_signer_event(AuditEventKind::Viewed, token, ip, user_agent)
    }

    pub fn record_consent(
        &self,
        token: &str,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(), FlowError> {
        self.record_signer_event(AuditEventKind::ConsentGiven, token, ip, user_agent)
    }

    /// Record that an out-of-band notification (email, SMS) went out.
    pub fn record_notification(&self, recipient: &str) {
        let mut audit = self.lock_audit();
        let event = AuditEvent::new(AuditEventKind::NotificationSent, audit.last_hash())
            .with_meta(meta::RECIPIENT, recipient.to_owned());
        audit.push(event);
    }

    fn record_signer_event(
        &self,
        kind: AuditEventKind,
        token: &str,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(), FlowError> {
        let signer = self.signer_for_token(token)?;
        let mut audit = self.lock_audit();
        let event = AuditEvent::new(kind, audit.last_hash())
            .with_ip(ip)
            .with_user_agent(user_agent)
            .with_meta(meta::SIGNER_NAME, signer.name.clone())
            .with_meta(meta::SIGNER_EMAIL, signer.email.clone());
        audit.push(event);
        Ok(())
    }

    /// Record a drawn signature or initials image for one spot.
    pub fn submit_signature(
        &self,
        token: &str,
        asset: SignatureAsset,
    ) -> Result<SubmissionOutcome, FlowError> {
        let signer = self.check_submittable(token, &asset.spot_key, |kind| {
            if kind.takes_image() {
                Ok(())
            } else {
                Err(("an image", "a field value"))
            }
        })?;
        asset.validate()?;
        let image_hash = hash_document(&asset.image);
        let spot_key = asset.spot_key.clone();
        self.record_submission(signer, &spot_key, Submission::Image(asset), image_hash)
    }

    /// Record a typed text, date, or checkbox value for one spot.
    pub fn submit_value(
        &self,
        token: &str,
        value: TextFieldValue,
    ) -> Result<SubmissionOutcome, FlowError> {
        let signer = self.check_submittable(token, &value.spot_key, |kind| {
            if kind.takes_image() {
                Err(("a field value", "an image"))
            } else {
                Ok(())
            }
        })?;
        let value_hash = hash_document(value.value.as_bytes());
        let spot_key = value.spot_key.clone();
        self.record_submission(signer, &spot_key, Submission::Value(value), value_hash)
    }

    fn check_submittable(
        &self,
        token: &str,
        spot_key: &str,
        kind_check: impl FnOnce(SpotKind) -> Result<(), (&'static str, &'static str)>,
    ) -> Result<&Signer, FlowError> {
        match self.status.load(Ordering::SeqCst) {
            CREATED => return Err(FlowError::NotSent),
            COMPLETED => return Err(FlowError::AlreadyCompleted),
            _ => {}
        }
        let signer = self.signer_for_token(token)?;
        let spot = self.spot_for_key(spot_key)?;
        if spot.signer_role != signer.role {
            warn!(spot_key, role = %signer.role, "submission rejected: role mismatch");
            return Err(FlowError::PermissionDenied {
                role: signer.role.clone(),
                spot_key: spot_key.to_owned(),
            });
        }
        if let Err((got, expected)) = kind_check(spot.kind) {
            return Err(FlowError::KindMismatch {
                spot_key: spot_key.to_owned(),
                expected,
                got,
            });
        }
        Ok(signer)
    }

    fn record_submission(
        &self,
        signer: &Signer,
        spot_key: &str,
        submission: Submission,
        content_hash: String,
    ) -> Result<SubmissionOutcome, FlowError> {
        // Submission map and audit chain are updated under the same lock
        // scope so event order matches submission order.
        let mut submissions = self.lock_submissions();
        if submissions.contains_key(spot_key) {
            return Err(FlowError::SpotAlreadyFilled(spot_key.to_owned()));
        }
        submissions.insert(spot_key.to_owned(), submission);
        let signer_done = self
            .spots
            .iter()
            .filter(|s| s.signer_role == signer.role)
            .all(|s| submissions.contains_key(&s.spot_key));
        let all_done = self
            .spots
            .iter()
            .all(|s| submissions.contains_key(&s.spot_key));

        let mut audit = self.lock_audit();
        let event = AuditEvent::new(AuditEventKind::SignatureCaptured, audit.last_hash())
            .with_meta(meta::SIGNER_NAME, signer.name.clone())
            .with_meta(meta::SIGNER_EMAIL, signer.email.clone())
            .with_meta(meta::SPOT_KEY, spot_key.to_owned())
            .with_meta(meta::CONTENT_HASH, content_hash);
        audit.push(event);
        if signer_done {
            let event = AuditEvent::new(AuditEventKind::SignerCompleted, audit.last_hash())
                .with_meta(meta::SIGNER_NAME, signer.name.clone())
                .with_meta(meta::SIGNER_EMAIL, signer.email.clone());
            audit.push(event);
        }
        info!(spot_key, signer = %signer.email, signer_done, all_done, "submission recorded");

        Ok(if all_done {
            SubmissionOutcome::DocumentReady
        } else if signer_done {
            SubmissionOutcome::SignerCompleted
        } else {
            SubmissionOutcome::Recorded
        })
    }

    /// Completion is derived from the submission set, not stored.
    pub fn signer_status(&self, token: &str) -> Result<SignerStatus, FlowError> {
        let signer = self.signer_for_token(token)?;
        let submissions = self.lock_submissions();
        let done = self
            .spots
            .iter()
            .filter(|s| s.signer_role == signer.role)
            .all(|s| submissions.contains_key(&s.spot_key));
        Ok(if done {
            SignerStatus::Completed
        } else {
            SignerStatus::Pending
        })
    }

    pub fn is_ready(&self) -> bool {
        let submissions = self.lock_submissions();
        self.spots
            .iter()
            .all(|s| submissions.contains_key(&s.spot_key))
    }

    /// Snapshot of the audit chain so far.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.lock_audit().events.clone()
    }

    pub fn verify_audit_chain(&self) -> Result<(), String> {
        self.lock_audit().verify()
    }

    /// Produce the finalized document: stamp every submission into the
    /// base PDF, record the completion event, and append the audit trail.
    ///
    /// Exactly one caller wins the Sent -> Completed transition; every
    /// other concurrent or later call gets `Ok(None)`. A stamping or
    /// trail failure rolls the document back to Sent so finalization can
    /// be retried.
    pub fn finalize(
        &self,
        base_pdf: &[u8],
        options: &TrailOptions,
    ) -> Result<Option<FinalizedDocument>, FlowError> {
        if !self.is_ready() {
            return Err(FlowError::NotReady);
        }
        match self
            .status
            .compare_exchange(SENT, COMPLETED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {}
            Err(CREATED) => return Err(FlowError::NotSent),
            Err(_) => return Ok(None),
        }

        let (assets, values) = self.collect_submissions();
        let stamped = match stamp(base_pdf, &self.spots, &assets, &values) {
            Ok(out) => out,
            Err(err) => {
                self.status.store(SENT, Ordering::SeqCst);
                return Err(err.into());
            }
        };
        let content_hash = hash_document(&stamped.pdf);

        let events = {
            let mut audit = self.lock_audit();
            let event = AuditEvent::new(AuditEventKind::Completed, audit.last_hash())
                .with_meta(meta::CONTENT_HASH, content_hash.clone());
            audit.push(event);
            audit.events.clone()
        };

        let mut trail_options = options.clone();
        if trail_options.document_id.is_empty() {
            trail_options.document_id = self.document_id.clone();
        }
        if trail_options.title.is_empty() {
            trail_options.title = self.title.clone();
        }
        if trail_options.original_hash.is_none() {
            trail_options.original_hash = Some(hash_document(base_pdf));
        }

        let pdf = match append_audit_trail(&stamped.pdf, &events, &trail_options) {
            Ok(pdf) => pdf,
            Err(err) => {
                // Retract the completion record and allow a retry.
                self.lock_audit().events.pop();
                self.status.store(SENT, Ordering::SeqCst);
                return Err(err.into());
            }
        };
        info!(document_id = %self.document_id, content_hash = %content_hash, "document finalized");

        Ok(Some(FinalizedDocument {
            pdf,
            content_hash,
            warnings: stamped.warnings,
        }))
    }

    fn collect_submissions(&self) -> (Vec<SignatureAsset>, Vec<TextFieldValue>) {
        let submissions = self.lock_submissions();
        let mut assets = Vec::new();
        let mut values = Vec::new();
        // Spot declaration order keeps stamping deterministic.
        for spot in &self.spots {
            match submissions.get(&spot.spot_key) {
                Some(Submission::Image(asset)) => assets.push(asset.clone()),
                Some(Submission::Value(value)) => values.push(value.clone()),
                None => {}
            }
        }
        (assets, values)
    }

    fn lock_submissions(&self) -> MutexGuard<'_, HashMap<String, Submission>> {
        self.submissions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_audit(&self) -> MutexGuard<'_, AuditChain> {
        self.audit.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkseal_types::model::FieldType;
    use pretty_assertions::assert_eq;

    fn spots() -> Vec<Spot> {
        vec![
            Spot {
                spot_key: "sig-1".to_owned(),
                page: 1,
                x: 100.0,
                y: 200.0,
                w: 200.0,
                h: 50.0,
                kind: SpotKind::Signature,
                signer_role: "tenant".to_owned(),
            },
            Spot {
                spot_key: "cb-1".to_owned(),
                page: 1,
                x: 100.0,
                y: 300.0,
                w: 20.0,
                h: 20.0,
                kind: SpotKind::Checkbox,
                signer_role: "landlord".to_owned(),
            },
        ]
    }

    fn signers() -> Vec<Signer> {
        vec![
            Signer {
                email: "tenant@example.com".to_owned(),
                name: "Terry Tenant".to_owned(),
                role: "tenant".to_owned(),
                token: "tok-tenant".to_owned(),
                order_index: 0,
                status: SignerStatus::Pending,
            },
            Signer {
                email: "landlord@example.com".to_owned(),
                name: "Lee Landlord".to_owned(),
                role: "landlord".to_owned(),
                token: "tok-landlord".to_owned(),
                order_index: 1,
                status: SignerStatus::Pending,
            },
        ]
    }

    fn png_asset(spot_key: &str, role: &str) -> SignatureAsset {
        let mut image = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut image, 4, 2);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&[255u8; 32]).unwrap();
        }
        SignatureAsset {
            spot_key: spot_key.to_owned(),
            image,
            signed_at: None,
            signer_role: role.to_owned(),
            signer_email: format!("{role}@example.com"),
        }
    }

    fn checkbox_value(spot_key: &str, raw: &str) -> TextFieldValue {
        TextFieldValue {
            spot_key: spot_key.to_owned(),
            value: raw.to_owned(),
            field_type: FieldType::Checkbox,
        }
    }

    fn sent_flow() -> SigningFlow {
        let flow = SigningFlow::new("doc-1", "Lease", spots(), signers()).unwrap();
        flow.mark_sent().unwrap();
        flow
    }

    #[test]
    fn rejects_spots_for_missing_roles() {
        let mut bad = spots();
        bad[0].signer_role = "witness".to_owned();
        let err = SigningFlow::new("doc-1", "Lease", bad, signers()).unwrap_err();
        assert!(matches!(err, FlowError::UnassignedRole { .. }));
    }

    #[test]
    fn submissions_require_sent_state() {
        let flow = SigningFlow::new("doc-1", "Lease", spots(), signers()).unwrap();
        let err = flow
            .submit_signature("tok-tenant", png_asset("sig-1", "tenant"))
            .unwrap_err();
        assert!(matches!(err, FlowError::NotSent));
    }

    #[test]
    fn tracks_per_signer_progress() {
        let flow = sent_flow();
        assert_eq!(
            flow.signer_status("tok-tenant").unwrap(),
            SignerStatus::Pending
        );
        let outcome = flow
            .submit_signature("tok-tenant", png_asset("sig-1", "tenant"))
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::SignerCompleted);
        assert_eq!(
            flow.signer_status("tok-tenant").unwrap(),
            SignerStatus::Completed
        );
        assert!(!flow.is_ready());

        let outcome = flow
            .submit_value("tok-landlord", checkbox_value("cb-1", "true"))
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::DocumentReady);
        assert!(flow.is_ready());
    }

    #[test]
    fn enforces_roles_and_kinds() {
        let flow = sent_flow();
        let err = flow
            .submit_signature("tok-landlord", png_asset("sig-1", "landlord"))
            .unwrap_err();
        assert!(matches!(err, FlowError::PermissionDenied { .. }));

        let err = flow
            .submit_value("tok-tenant", checkbox_value("sig-1", "true"))
            .unwrap_err();
        assert!(matches!(err, FlowError::KindMismatch { .. }));

        let err = flow
            .submit_signature("tok-landlord", png_asset("cb-1", "landlord"))
            .unwrap_err();
        assert!(matches!(err, FlowError::KindMismatch { .. }));
    }

    #[test]
    fn rejects_double_fill_and_bad_tokens() {
        let flow = sent_flow();
        flow.submit_signature("tok-tenant", png_asset("sig-1", "tenant"))
            .unwrap();
        let err = flow
            .submit_signature("tok-tenant", png_asset("sig-1", "tenant"))
            .unwrap_err();
        assert!(matches!(err, FlowError::SpotAlreadyFilled(_)));

        let err = flow
            .submit_signature("tok-stranger", png_asset("sig-1", "tenant"))
            .unwrap_err();
        assert!(matches!(err, FlowError::UnknownSigner));
    }

    #[test]
    fn audit_chain_records_the_journey() {
        let flow = sent_flow();
        flow.record_view("tok-tenant", Some("203.0.113.9".to_owned()), None)
            .unwrap();
        flow.record_consent("tok-tenant", Some("203.0.113.9".to_owned()), None)
            .unwrap();
        flow.submit_signature("tok-tenant", png_asset("sig-1", "tenant"))
            .unwrap();

        let events = flow.audit_events();
        let kinds: Vec<AuditEventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AuditEventKind::Created,
                AuditEventKind::Sent,
                AuditEventKind::NotificationSent,
                AuditEventKind::NotificationSent,
                AuditEventKind::Viewed,
                AuditEventKind::ConsentGiven,
                AuditEventKind::SignatureCaptured,
                AuditEventKind::SignerCompleted,
            ]
        );
        flow.verify_audit_chain().unwrap();
    }

    #[test]
    fn finalize_before_ready_is_an_error() {
        let flow = sent_flow();
        let err = flow
            .finalize(b"%PDF-", &TrailOptions::default())
            .unwrap_err();
        assert!(matches!(err, FlowError::NotReady));
        assert_eq!(flow.status(), DocumentStatus::Sent);
    }

    #[test]
    fn failed_finalize_rolls_back_to_sent() {
        let flow = sent_flow();
        flow.submit_signature("tok-tenant", png_asset("sig-1", "tenant"))
            .unwrap();
        flow.submit_value("tok-landlord", checkbox_value("cb-1", "on"))
            .unwrap();

        // Not a parsable PDF, so stamping fails after the CAS.
        let err = flow
            .finalize(b"not a pdf", &TrailOptions::default())
            .unwrap_err();
        assert!(matches!(err, FlowError::Pdf(_)));
        assert_eq!(flow.status(), DocumentStatus::Sent);
        // No completion event leaked into the chain.
        assert!(flow
            .audit_events()
            .iter()
            .all(|e| e.kind != AuditEventKind::Completed));
        flow.verify_audit_chain().unwrap();
    }
}
