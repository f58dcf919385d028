use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::error::PdfError;

/// US Letter fallback when a page carries no MediaBox anywhere in its
/// ancestor chain.
pub const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Wrapper around a loaded `lopdf::Document` with the page-level helpers
/// the stamping and audit-trail code needs.
pub struct PdfDocument {
    doc: Document,
    helvetica: Option<ObjectId>,
    helvetica_bold: Option<ObjectId>,
}

impl PdfDocument {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PdfError> {
        let doc = Document::load_mem(bytes).map_err(|e| PdfError::Parse(e.to_string()))?;
        debug!(pages = doc.get_pages().len(), "loaded PDF document");
        Ok(PdfDocument {
            doc,
            helvetica: None,
            helvetica_bold: None,
        })
    }

    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    /// Object id for a 1-based page number.
    pub fn page_id(&self, page: u32) -> Option<ObjectId> {
        self.doc.get_pages().get(&page).copied()
    }

    pub fn inner(&self) -> &Document {
        &self.doc
    }

    pub fn inner_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    /// MediaBox for a page, following Parent links for inherited values.
    pub fn media_box(&self, page_id: ObjectId) -> [f64; 4] {
        let mut current = page_id;
        for _ in 0..32 {
            let Ok(dict) = self.doc.get_dictionary(current) else {
                break;
            };
            if let Ok(obj) = dict.get(b"MediaBox") {
                if let Some(rect) = parse_rect(obj, &self.doc) {
                    return rect;
                }
            }
            match dict.get(b"Parent").and_then(Object::as_reference) {
                Ok(parent) => current = parent,
                Err(_) => break,
            }
        }
        DEFAULT_MEDIA_BOX
    }

    pub fn page_height(&self, page_id: ObjectId) -> f64 {
        let mb = self.media_box(page_id);
        mb[3] - mb[1]
    }

    /// Standard Helvetica font object, created on first use.
    pub fn helvetica(&mut self) -> ObjectId {
        if let Some(id) = self.helvetica {
            return id;
        }
        let id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        self.helvetica = Some(id);
        id
    }

    pub fn helvetica_bold(&mut self) -> ObjectId {
        if let Some(id) = self.helvetica_bold {
            return id;
        }
        let id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
        });
        self.helvetica_bold = Some(id);
        id
    }

    /// Resolved copy of a page's Resources dictionary. Handles inline
    /// dictionaries, indirect references, and inheritance from the page
    /// tree; returns an empty dictionary when none is found.
    fn resolved_resources(&self, page_id: ObjectId) -> Dictionary {
        let mut current = page_id;
        for _ in 0..32 {
            let Ok(dict) = self.doc.get_dictionary(current) else {
                break;
            };
            match dict.get(b"Resources") {
                Ok(Object::Reference(id)) => {
                    if let Ok(res) = self.doc.get_dictionary(*id) {
                        return res.clone();
                    }
                }
                Ok(Object::Dictionary(res)) => return res.clone(),
                _ => {}
            }
            match dict.get(b"Parent").and_then(Object::as_reference) {
                Ok(parent) => current = parent,
                Err(_) => break,
            }
        }
        Dictionary::new()
    }

    /// Register a named entry in one category (Font, XObject, ...) of a
    /// page's Resources. The resolved resources are written back inline on
    /// the page so shared or inherited dictionaries are never mutated.
    pub fn set_page_resource(
        &mut self,
        page_id: ObjectId,
        category: &str,
        name: &str,
        target: ObjectId,
    ) -> Result<(), PdfError> {
        let mut resources = self.resolved_resources(page_id);
        let mut entries: Dictionary = match resources.get(category.as_bytes()) {
            Ok(Object::Reference(id)) => self.doc.get_dictionary(*id)?.clone(),
            Ok(Object::Dictionary(d)) => d.clone(),
            _ => Dictionary::new(),
        };
        entries.set(name, Object::Reference(target));
        resources.set(category, Object::Dictionary(entries));

        let page = self
            .doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)?;
        page.set("Resources", Object::Dictionary(resources));
        Ok(())
    }

    /// Append operations after a page's existing content so the new marks
    /// render on top of whatever is already there.
    pub fn append_to_page_content(
        &mut self,
        page_id: ObjectId,
        operations: Vec<Operation>,
    ) -> Result<(), PdfError> {
        let mut content = self.doc.get_and_decode_page_content(page_id)?;
        content.operations.extend(operations);
        let encoded = content
            .encode()
            .map_err(|e| PdfError::Operation(format!("failed to encode content: {e}")))?;
        self.doc.change_page_content(page_id, encoded)?;
        Ok(())
    }

    /// Append a brand-new page to the end of the document's page tree.
    pub fn append_page(
        &mut self,
        width: f64,
        height: f64,
        operations: Vec<Operation>,
        resources: Dictionary,
    ) -> Result<ObjectId, PdfError> {
        let content = Content { operations };
        let encoded = content
            .encode()
            .map_err(|e| PdfError::Operation(format!("failed to encode content: {e}")))?;
        let content_id = self
            .doc
            .add_object(Stream::new(Dictionary::new(), encoded));

        let pages_root = self.pages_root()?;
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_root),
            "MediaBox" => vec![
                Object::Real(0.0),
                Object::Real(0.0),
                Object::Real(width as f32),
                Object::Real(height as f32),
            ],
            "Resources" => Object::Dictionary(resources),
            "Contents" => Object::Reference(content_id),
        });

        let mut kids = match self.doc.get_dictionary(pages_root)?.get(b"Kids") {
            Ok(Object::Reference(id)) => self.doc.get_object(*id)?.as_array()?.clone(),
            Ok(Object::Array(arr)) => arr.clone(),
            _ => Vec::new(),
        };
        kids.push(Object::Reference(page_id));

        let root = self
            .doc
            .get_object_mut(pages_root)
            .and_then(Object::as_dict_mut)?;
        let count = root
            .get(b"Count")
            .and_then(Object::as_i64)
            .unwrap_or(kids.len() as i64 - 1);
        root.set("Kids", Object::Array(kids));
        root.set("Count", count + 1);
        Ok(page_id)
    }

    fn pages_root(&self) -> Result<ObjectId, PdfError> {
        let catalog = self.doc.catalog()?;
        let pages = catalog.get(b"Pages").and_then(Object::as_reference)?;
        Ok(pages)
    }

    pub fn save_to_bytes(&mut self) -> Result<Vec<u8>, PdfError> {
        let mut out = Vec::new();
        self.doc
            .save_to(&mut out)
            .map_err(|e| PdfError::Operation(format!("failed to serialize PDF: {e}")))?;
        Ok(out)
    }
}

fn parse_rect(obj: &Object, doc: &Document) -> Option<[f64; 4]> {
    let arr = match obj {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_array().ok()?,
        Object::Array(arr) => arr,
        _ => return None,
    };
    if arr.len() != 4 {
        return None;
    }
    let mut rect = [0.0; 4];
    for (i, value) in arr.iter().enumerate() {
        rect[i] = as_number(value)?;
    }
    Some(rect)
}

fn as_number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(n) => Some(*n as f64),
        Object::Real(n) => Some(*n as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::minimal_pdf;
    use pretty_assertions::assert_eq;

    #[test]
    fn loads_pages_and_media_box() {
        let bytes = minimal_pdf(612.0, 792.0, 2);
        let doc = PdfDocument::from_bytes(&bytes).unwrap();
        assert_eq!(doc.page_count(), 2);
        let page = doc.page_id(1).unwrap();
        assert_eq!(doc.media_box(page), [0.0, 0.0, 612.0, 792.0]);
        assert_eq!(doc.page_height(page), 792.0);
        assert!(doc.page_id(3).is_none());
    }

    #[test]
    fn missing_media_box_falls_back_to_letter() {
        let bytes = minimal_pdf(612.0, 792.0, 1);
        let mut doc = PdfDocument::from_bytes(&bytes).unwrap();
        let page = doc.page_id(1).unwrap();
        doc.inner_mut()
            .get_object_mut(page)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .remove(b"MediaBox");
        // Parent Pages node has none either, so the default applies.
        assert_eq!(doc.media_box(page), DEFAULT_MEDIA_BOX);
    }

    #[test]
    fn registers_resources_and_appends_content() {
        let bytes = minimal_pdf(612.0, 792.0, 1);
        let mut doc = PdfDocument::from_bytes(&bytes).unwrap();
        let page = doc.page_id(1).unwrap();
        let font = doc.helvetica();
        doc.set_page_resource(page, "Font", "Fx", font).unwrap();
        doc.append_to_page_content(
            page,
            vec![
                Operation::new("q", vec![]),
                Operation::new("Q", vec![]),
            ],
        )
        .unwrap();

        let out = doc.save_to_bytes().unwrap();
        let reloaded = PdfDocument::from_bytes(&out).unwrap();
        let page = reloaded.page_id(1).unwrap();
        let resources = reloaded.resolved_resources(page);
        let fonts = resources.get(b"Font").unwrap().as_dict().unwrap();
        assert!(fonts.has(b"Fx"));
        // The original entry survives alongside the new one.
        assert!(fonts.has(b"F1"));
        let content = reloaded
            .inner()
            .get_and_decode_page_content(page)
            .unwrap();
        assert_eq!(content.operations.last().unwrap().operator, "Q");
    }

    #[test]
    fn appends_page_to_tree() {
        let bytes = minimal_pdf(612.0, 792.0, 1);
        let mut doc = PdfDocument::from_bytes(&bytes).unwrap();
        doc.append_page(612.0, 792.0, vec![], Dictionary::new())
            .unwrap();
        let out = doc.save_to_bytes().unwrap();
        let reloaded = PdfDocument::from_bytes(&out).unwrap();
        assert_eq!(reloaded.page_count(), 2);
        assert_eq!(reloaded.media_box(reloaded.page_id(2).unwrap())[2], 612.0);
    }
}
