//! Render the audit trail as appended pages.
//!
//! Trail pages are always US Letter, whatever the size of the signed
//! document. Layout is a single downward cursor; every block reserves its
//! full height up front, so a block never straddles a page break.

use chrono::{DateTime, Utc};
use lopdf::content::Operation;
use lopdf::{dictionary, Dictionary, Object, ObjectId};
use tracing::{debug, warn};

use inkseal_types::audit::{hash_document, meta, AuditEvent, AuditEventKind};

use crate::document::PdfDocument;
use crate::error::PdfError;
use crate::image::embed_png;
use crate::metrics::{text_width, truncate_to_width, wrap_to_width};

pub const PAGE_WIDTH: f64 = 612.0;
pub const PAGE_HEIGHT: f64 = 792.0;
pub const MARGIN: f64 = 50.0;
pub const LINE_HEIGHT: f64 = 14.0;

const CONTENT_WIDTH: f64 = PAGE_WIDTH - 2.0 * MARGIN;
const TITLE_SIZE: f64 = 18.0;
const HEADING_SIZE: f64 = 12.0;
const BODY_SIZE: f64 = 10.0;
const SMALL_SIZE: f64 = 9.0;
const LOGO_HEIGHT: f64 = 24.0;
const RULE_HEIGHT: f64 = 8.0;
const BLOCK_GAP: f64 = 4.0;
const META_INDENT: f64 = 12.0;

const BODY_FONT: &str = "F1";
const BOLD_FONT: &str = "F2";
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Identity and branding fields shown in the trail header.
#[derive(Debug, Clone)]
pub struct TrailOptions {
    pub document_id: String,
    pub title: String,
    pub product_name: String,
    pub sender_name: String,
    pub sender_email: String,
    pub sender_verified: bool,
    /// SHA-256 of the document before any marks were applied. When absent
    /// the hash of the stamped input is shown instead.
    pub original_hash: Option<String>,
    pub logo_png: Option<Vec<u8>>,
    /// Pinned generation timestamp; defaults to now.
    pub generated_at: Option<DateTime<Utc>>,
}

impl Default for TrailOptions {
    fn default() -> Self {
        TrailOptions {
            document_id: String::new(),
            title: String::new(),
            product_name: "Inkseal".to_owned(),
            sender_name: String::new(),
            sender_email: String::new(),
            sender_verified: false,
            original_hash: None,
            logo_png: None,
            generated_at: None,
        }
    }
}

/// Append the audit trail to an already-stamped document and return the
/// final bytes. Events are rendered oldest first regardless of input
/// order.
pub fn append_audit_trail(
    stamped_pdf: &[u8],
    events: &[AuditEvent],
    options: &TrailOptions,
) -> Result<Vec<u8>, PdfError> {
    let mut doc = PdfDocument::from_bytes(stamped_pdf)?;
    let helvetica = doc.helvetica();
    let bold = doc.helvetica_bold();

    let mut ordered: Vec<&AuditEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.created_at);

    let hash_line = match &options.original_hash {
        Some(hash) => ("Original document SHA-256:", hash.clone()),
        None => ("Signed document SHA-256:", hash_document(stamped_pdf)),
    };

    {
        let mut writer = TrailWriter {
            doc: &mut doc,
            cursor: LayoutCursor::new(PAGE_HEIGHT - MARGIN, MARGIN),
            ops: Vec::new(),
            xobjects: Vec::new(),
            pages_written: 0,
            helvetica,
            bold,
        };
        writer.header(options);
        writer.document_info(options, hash_line)?;
        writer.events(&ordered)?;
        writer.footer(options)?;
        writer.finish()?;
    }
    debug!(events = ordered.len(), "appended audit trail");

    doc.save_to_bytes()
}

/// Downward layout cursor with a hard bottom margin.
struct LayoutCursor {
    y: f64,
    top: f64,
    bottom: f64,
}

impl LayoutCursor {
    fn new(top: f64, bottom: f64) -> Self {
        LayoutCursor { y: top, top, bottom }
    }

    fn fits(&self, height: f64) -> bool {
        self.y - height >= self.bottom
    }

    fn advance(&mut self, height: f64) {
        self.y -= height;
    }

    fn reset(&mut self) {
        self.y = self.top;
    }
}

struct TrailWriter<'a> {
    doc: &'a mut PdfDocument,
    cursor: LayoutCursor,
    ops: Vec<Operation>,
    /// XObjects referenced by the page currently being laid out.
    xobjects: Vec<(String, ObjectId)>,
    pages_written: usize,
    helvetica: ObjectId,
    bold: ObjectId,
}

impl TrailWriter<'_> {
    /// Start a new page if the next block would cross the bottom margin.
    fn ensure_space(&mut self, height: f64) -> Result<(), PdfError> {
        if !self.cursor.fits(height) {
            self.flush_page()?;
        }
        Ok(())
    }

    fn flush_page(&mut self) -> Result<(), PdfError> {
        let mut resources = dictionary! {
            "Font" => dictionary! {
                BODY_FONT => Object::Reference(self.helvetica),
                BOLD_FONT => Object::Reference(self.bold),
            },
        };
        if !self.xobjects.is_empty() {
            let mut xobjects = Dictionary::new();
            for (name, id) in self.xobjects.drain(..) {
                xobjects.set(name, Object::Reference(id));
            }
            resources.set("XObject", Object::Dictionary(xobjects));
        }
        let ops = std::mem::take(&mut self.ops);
        self.doc
            .append_page(PAGE_WIDTH, PAGE_HEIGHT, ops, resources)?;
        self.pages_written += 1;
        self.cursor.reset();
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PdfError> {
        if !self.ops.is_empty() || self.pages_written == 0 {
            self.flush_page()?;
        }
        Ok(())
    }

    fn push_text(&mut self, x: f64, baseline: f64, font: &str, size: f64, text: &str) {
        self.ops.push(Operation::new("BT", vec![]));
        self.ops.push(Operation::new(
            "Tf",
            vec![
                Object::Name(font.as_bytes().to_vec()),
                Object::Real(size as f32),
            ],
        ));
        self.ops.push(Operation::new(
            "Td",
            vec![Object::Real(x as f32), Object::Real(baseline as f32)],
        ));
        self.ops
            .push(Operation::new("Tj", vec![Object::string_literal(text)]));
        self.ops.push(Operation::new("ET", vec![]));
    }

    /// One full-height text line at the given indent.
    fn line(&mut self, indent: f64, font: &str, size: f64, text: &str) {
        let baseline = self.cursor.y - size;
        self.push_text(MARGIN + indent, baseline, font, size, text);
        self.cursor.advance(LINE_HEIGHT);
    }

    fn rule(&mut self) {
        let y = self.cursor.y - RULE_HEIGHT / 2.0;
        self.ops.push(Operation::new("q", vec![]));
        self.ops
            .push(Operation::new("G", vec![Object::Real(0.6)]));
        self.ops
            .push(Operation::new("w", vec![Object::Real(0.5)]));
        self.ops.push(Operation::new(
            "m",
            vec![Object::Real(MARGIN as f32), Object::Real(y as f32)],
        ));
        self.ops.push(Operation::new(
            "l",
            vec![
                Object::Real((PAGE_WIDTH - MARGIN) as f32),
                Object::Real(y as f32),
            ],
        ));
        self.ops.push(Operation::new("S", vec![]));
        self.ops.push(Operation::new("Q", vec![]));
        self.cursor.advance(RULE_HEIGHT);
    }

    fn header(&mut self, options: &TrailOptions) {
        let mut title_x = MARGIN;
        if let Some(logo) = &options.logo_png {
            match embed_png(self.doc.inner_mut(), logo, "trail-logo") {
                Ok(img) => {
                    let width = LOGO_HEIGHT * img.width as f64 / img.height.max(1) as f64;
                    let y = self.cursor.y - LOGO_HEIGHT;
                    self.ops.push(Operation::new("q", vec![]));
                    self.ops.push(Operation::new(
                        "cm",
                        vec![
                            Object::Real(width as f32),
                            Object::Real(0.0),
                            Object::Real(0.0),
                            Object::Real(LOGO_HEIGHT as f32),
                            Object::Real(MARGIN as f32),
                            Object::Real(y as f32),
                        ],
                    ));
                    self.ops.push(Operation::new(
                        "Do",
                        vec![Object::Name(b"Logo".to_vec())],
                    ));
                    self.ops.push(Operation::new("Q", vec![]));
                    self.xobjects.push(("Logo".to_owned(), img.object_id));
                    title_x = MARGIN + width + 8.0;
                }
                Err(err) => warn!(%err, "skipping undecodable trail logo"),
            }
        }
        let baseline = self.cursor.y - TITLE_SIZE;
        self.push_text(title_x, baseline, BOLD_FONT, TITLE_SIZE, "AUDIT TRAIL");
        self.cursor.advance(LOGO_HEIGHT.max(TITLE_SIZE) + 4.0);
        self.line(0.0, BODY_FONT, SMALL_SIZE, &options.product_name);
        self.cursor.advance(BLOCK_GAP);
    }

    fn heading(&mut self, text: &str) {
        self.line(0.0, BOLD_FONT, HEADING_SIZE, text);
    }

    fn document_info(
        &mut self,
        options: &TrailOptions,
        hash_line: (&str, String),
    ) -> Result<(), PdfError> {
        let sender = if options.sender_verified {
            format!(
                "Sender: {} <{}> (email verified)",
                options.sender_name, options.sender_email
            )
        } else {
            format!("Sender: {} <{}>", options.sender_name, options.sender_email)
        };
        let generated = options.generated_at.unwrap_or_else(Utc::now);
        let mut lines = vec![
            format!("Document ID: {}", options.document_id),
            format!("Title: {}", options.title),
            sender,
            format!("Generated: {}", generated.format(TS_FORMAT)),
            hash_line.0.to_owned(),
            hash_line.1,
        ];
        if options.original_hash.is_some() {
            lines.push(
                "This hash covers the document before any signatures were applied.".to_owned(),
            );
        }
        // Heading and body travel together across page breaks.
        self.ensure_space(LINE_HEIGHT * (lines.len() + 1) as f64 + BLOCK_GAP)?;
        self.heading("Document Information");
        for line in lines {
            let fitted = truncate_to_width(&line, BODY_SIZE, CONTENT_WIDTH);
            self.line(0.0, BODY_FONT, BODY_SIZE, &fitted);
        }
        self.cursor.advance(BLOCK_GAP);
        Ok(())
    }

    fn events(&mut self, ordered: &[&AuditEvent]) -> Result<(), PdfError> {
        self.ensure_space(LINE_HEIGHT * 2.0)?;
        self.heading("Signing Activity");
        for event in ordered {
            self.event_block(event)?;
        }
        Ok(())
    }

    fn event_block(&mut self, event: &AuditEvent) -> Result<(), PdfError> {
        let meta_lines = event_meta_lines(event);
        let height =
            RULE_HEIGHT + LINE_HEIGHT * (1 + meta_lines.len()) as f64 + BLOCK_GAP;
        self.ensure_space(height)?;

        self.rule();
        let timestamp = event.created_at.format(TS_FORMAT).to_string();
        let ts_x = PAGE_WIDTH - MARGIN - text_width(&timestamp, SMALL_SIZE);
        let baseline = self.cursor.y - BODY_SIZE;
        self.push_text(MARGIN, baseline, BOLD_FONT, BODY_SIZE, event.kind.label());
        self.push_text(ts_x, baseline, BODY_FONT, SMALL_SIZE, &timestamp);
        self.cursor.advance(LINE_HEIGHT);

        for line in meta_lines {
            let fitted = truncate_to_width(&line, SMALL_SIZE, CONTENT_WIDTH - META_INDENT);
            self.line(META_INDENT, BODY_FONT, SMALL_SIZE, &fitted);
        }
        self.cursor.advance(BLOCK_GAP);
        Ok(())
    }

    fn footer(&mut self, options: &TrailOptions) -> Result<(), PdfError> {
        let notice = format!(
            "This audit trail was generated automatically by {} and is \
             cryptographically linked to the document it describes. Event \
             hashes form a chain; altering any recorded event invalidates \
             every event after it.",
            options.product_name
        );
        let lines = wrap_to_width(&notice, SMALL_SIZE, CONTENT_WIDTH);
        self.ensure_space(RULE_HEIGHT + LINE_HEIGHT * lines.len() as f64)?;
        self.rule();
        for line in lines {
            self.line(0.0, BODY_FONT, SMALL_SIZE, &line);
        }
        Ok(())
    }
}

fn event_meta_lines(event: &AuditEvent) -> Vec<String> {
    let mut lines = Vec::new();
    match (
        event.metadata.get(meta::SIGNER_NAME),
        event.metadata.get(meta::SIGNER_EMAIL),
    ) {
        (Some(name), Some(email)) => lines.push(format!("Signer: {name} <{email}>")),
        (Some(name), None) => lines.push(format!("Signer: {name}")),
        (None, Some(email)) => lines.push(format!("Signer: {email}")),
        (None, None) => {}
    }
    if let Some(spot_key) = event.metadata.get(meta::SPOT_KEY) {
        lines.push(format!("Field: {spot_key}"));
    }
    if let Some(recipient) = event.metadata.get(meta::RECIPIENT) {
        lines.push(format!("Notified: {recipient}"));
    }
    match (&event.ip, &event.user_agent) {
        (Some(ip), Some(ua)) => lines.push(format!("From {ip} ({ua})")),
        (Some(ip), None) => lines.push(format!("From {ip}")),
        (None, Some(ua)) => lines.push(format!("From unknown address ({ua})")),
        (None, None) => {}
    }
    // The full content hash only appears on the completion record.
    if event.kind == AuditEventKind::Completed {
        if let Some(hash) = event.metadata.get(meta::CONTENT_HASH) {
            lines.push(format!("Content hash (SHA-256): {hash}"));
        }
    }
    lines
}
