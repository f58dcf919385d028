//! Burn signature images, field values, and checkbox marks into page
//! content streams.
//!
//! Marks are drawn as ordinary page content rather than annotations, so
//! the result renders identically everywhere and cannot be toggled off or
//! repositioned by a viewer. Resource names are derived from submission
//! order, which keeps repeated runs over the same inputs byte-stable.

use chrono::{DateTime, Utc};
use lopdf::content::Operation;
use lopdf::{Object, ObjectId};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use inkseal_types::geometry::authoring_to_pdf;
use inkseal_types::model::{SignatureAsset, Spot, SpotKind, TextFieldValue};

use crate::document::PdfDocument;
use crate::error::PdfError;
use crate::image::embed_png;
use crate::metrics::truncate_to_width;

/// Upper bound on input documents; anything larger is rejected before
/// parsing.
pub const MAX_BASE_PDF_BYTES: usize = 32 * 1024 * 1024;

/// Caption line under each signature image.
pub const CAPTION_FONT_SIZE: f64 = 8.0;
const CAPTION_GAP: f64 = 2.0;
/// Captions whose baseline would land below this re-flow above the image.
const CAPTION_MIN_Y: f64 = 4.0;

/// Horizontal and vertical inset for text field values inside their box.
const TEXT_INSET: f64 = 4.0;
/// Text values never exceed this size regardless of box height.
const MAX_TEXT_SIZE: f64 = 12.0;

/// Checkbox mark side as a fraction of the smaller box dimension.
const CHECK_SCALE: f64 = 0.6;

/// Font resource name registered on every page that receives text.
const FONT_RES_NAME: &str = "FInkseal";

/// Non-fatal conditions encountered while stamping. The output is still
/// produced; these describe inputs that were skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StampWarning {
    UnknownSpot { spot_key: String },
    PageOutOfRange { spot_key: String, page: u32 },
}

impl fmt::Display for StampWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StampWarning::UnknownSpot { spot_key } => {
                write!(f, "no spot named '{spot_key}' exists on this document")
            }
            StampWarning::PageOutOfRange { spot_key, page } => {
                write!(f, "spot '{spot_key}' targets page {page}, which does not exist")
            }
        }
    }
}

/// A stamped document plus any skipped-input warnings.
#[derive(Debug)]
pub struct StampOutput {
    pub pdf: Vec<u8>,
    pub warnings: Vec<StampWarning>,
}

/// Burn every submitted signature and field value into the document.
///
/// Unknown spot keys and out-of-range pages are skipped with a warning;
/// undecodable images and malformed PDFs abort the whole operation, so a
/// partial stamp is never returned.
pub fn stamp(
    base_pdf: &[u8],
    spots: &[Spot],
    assets: &[SignatureAsset],
    values: &[TextFieldValue],
) -> Result<StampOutput, PdfError> {
    if base_pdf.len() > MAX_BASE_PDF_BYTES {
        return Err(PdfError::TooLarge {
            size: base_pdf.len(),
            limit: MAX_BASE_PDF_BYTES,
        });
    }
    let mut doc = PdfDocument::from_bytes(base_pdf)?;
    let spot_index: BTreeMap<&str, &Spot> =
        spots.iter().map(|s| (s.spot_key.as_str(), s)).collect();

    let mut warnings = Vec::new();
    // Ops accumulate per page and flush once, keeping one content rewrite
    // per touched page.
    let mut page_ops: BTreeMap<u32, Vec<Operation>> = BTreeMap::new();
    let mut pages_with_text: Vec<u32> = Vec::new();
    // Images are stamped in submission order; the fallback timestamp is
    // taken once so every caption in a run agrees.
    let fallback_signed_at = Utc::now();

    for (index, asset) in assets.iter().enumerate() {
        let Some((spot, page_id)) = resolve_spot(&doc, &spot_index, &asset.spot_key, &mut warnings)
        else {
            continue;
        };
        let image = embed_png(doc.inner_mut(), &asset.image, &asset.spot_key)?;
        let name = format!("ImgSpot{index}");
        doc.set_page_resource(page_id, "XObject", &name, image.object_id)?;

        let mb = doc.media_box(page_id);
        let (pdf_x, pdf_y) = place(spot, mb);
        let ops = page_ops.entry(spot.page).or_default();
        ops.extend(image_ops(&name, pdf_x, pdf_y, spot.w, spot.h));
        let signed_at = asset.signed_at.unwrap_or(fallback_signed_at);
        ops.extend(caption_ops(pdf_x, pdf_y, spot.h, mb, signed_at));
        pages_with_text.push(spot.page);
        debug!(spot_key = %asset.spot_key, page = spot.page, "stamped signature image");
    }

    for value in values {
        let Some((spot, page_id)) = resolve_spot(&doc, &spot_index, &value.spot_key, &mut warnings)
        else {
            continue;
        };
        let mb = doc.media_box(page_id);
        let (pdf_x, pdf_y) = place(spot, mb);
        let ops = page_ops.entry(spot.page).or_default();
        if spot.kind == SpotKind::Checkbox {
            if value.is_checked() {
                ops.extend(checkmark_ops(pdf_x, pdf_y, spot.w, spot.h));
            }
        } else {
            ops.extend(value_ops(&value.value, pdf_x, pdf_y, spot.w, spot.h));
            pages_with_text.push(spot.page);
        }
    }

    // One shared Helvetica object backs captions and values on every page.
    pages_with_text.sort_unstable();
    pages_with_text.dedup();
    if !pages_with_text.is_empty() {
        let font = doc.helvetica();
        for page in &pages_with_text {
            if let Some(page_id) = doc.page_id(*page) {
                doc.set_page_resource(page_id, "Font", FONT_RES_NAME, font)?;
            }
        }
    }

    for (page, ops) in page_ops {
        if let Some(page_id) = doc.page_id(page) {
            doc.append_to_page_content(page_id, ops)?;
        }
    }

    Ok(StampOutput {
        pdf: doc.save_to_bytes()?,
        warnings,
    })
}

fn resolve_spot<'a>(
    doc: &PdfDocument,
    spot_index: &BTreeMap<&str, &'a Spot>,
    spot_key: &str,
    warnings: &mut Vec<StampWarning>,
) -> Option<(&'a Spot, ObjectId)> {
    let Some(spot) = spot_index.get(spot_key).copied() else {
        warn!(spot_key, "submission references an unknown spot; skipping");
        warnings.push(StampWarning::UnknownSpot {
            spot_key: spot_key.to_owned(),
        });
        return None;
    };
    let Some(page_id) = doc.page_id(spot.page) else {
        warn!(spot_key, page = spot.page, "spot page out of range; skipping");
        warnings.push(StampWarning::PageOutOfRange {
            spot_key: spot_key.to_owned(),
            page: spot.page,
        });
        return None;
    };
    Some((spot, page_id))
}

/// Lower-left corner of a spot in PDF user space, honoring a non-zero
/// media box origin.
fn place(spot: &Spot, media_box: [f64; 4]) -> (f64, f64) {
    let page_height = media_box[3] - media_box[1];
    let (x, y) = authoring_to_pdf(spot.x, spot.y, spot.h, page_height);
    (media_box[0] + x, media_box[1] + y)
}

fn image_ops(name: &str, x: f64, y: f64, w: f64, h: f64) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                Object::Real(w as f32),
                Object::Real(0.0),
                Object::Real(0.0),
                Object::Real(h as f32),
                Object::Real(x as f32),
                Object::Real(y as f32),
            ],
        ),
        Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
        Operation::new("Q", vec![]),
    ]
}

fn caption_ops(
    x: f64,
    y: f64,
    h: f64,
    media_box: [f64; 4],
    signed_at: DateTime<Utc>,
) -> Vec<Operation> {
    let below = y - CAPTION_GAP - CAPTION_FONT_SIZE;
    let baseline = if below >= media_box[1] + CAPTION_MIN_Y {
        below
    } else {
        // No room underneath; flow above the image instead.
        let above = y + h + CAPTION_GAP;
        above.min(media_box[3] - CAPTION_FONT_SIZE)
    };
    let caption = format!("Signed: {}", signed_at.format("%b %-d, %Y %H:%M:%S UTC"));
    text_ops(&caption, x, baseline, CAPTION_FONT_SIZE)
}

fn value_ops(value: &str, x: f64, y: f64, w: f64, h: f64) -> Vec<Operation> {
    let font_size = MAX_TEXT_SIZE.min(h * 0.6);
    let fitted = truncate_to_width(value, font_size, w - 2.0 * TEXT_INSET);
    text_ops(&fitted, x + TEXT_INSET, y + TEXT_INSET, font_size)
}

fn text_ops(text: &str, x: f64, baseline: f64, font_size: f64) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new("g", vec![Object::Real(0.0)]),
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![
                Object::Name(FONT_RES_NAME.as_bytes().to_vec()),
                Object::Real(font_size as f32),
            ],
        ),
        Operation::new(
            "Td",
            vec![Object::Real(x as f32), Object::Real(baseline as f32)],
        ),
        Operation::new("Tj", vec![Object::string_literal(text)]),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ]
}

/// Two stroked segments forming a check, sized to the box and drawn from
/// its centered mark square.
fn checkmark_ops(x: f64, y: f64, w: f64, h: f64) -> Vec<Operation> {
    let side = CHECK_SCALE * w.min(h);
    let x0 = x + (w - side) / 2.0;
    let y0 = y + (h - side) / 2.0;
    let width = (side * 0.1).max(1.5);
    let pt = |fx: f64, fy: f64| {
        vec![
            Object::Real((x0 + fx * side) as f32),
            Object::Real((y0 + fy * side) as f32),
        ]
    };
    vec![
        Operation::new("q", vec![]),
        Operation::new("G", vec![Object::Real(0.0)]),
        Operation::new("w", vec![Object::Real(width as f32)]),
        Operation::new("m", pt(0.2, 0.5)),
        Operation::new("l", pt(0.4, 0.3)),
        Operation::new("l", pt(0.8, 0.8)),
        Operation::new("S", vec![]),
        Operation::new("Q", vec![]),
    ]
}
