//! Coordinate transformation between the authoring and PDF coordinate systems
//!
//! Authoring frame: origin top-left, y grows downward (how a human places a
//! box on a page preview). PDF native frame: origin bottom-left, y grows
//! upward (how content streams are drawn). Every component that draws or
//! hit-tests a spot goes through these two functions; nobody recomputes the
//! flip inline.

/// Convert an authoring-frame box to its PDF-frame bottom-left draw origin.
///
/// `(x, y)` is the box's top-left corner in the authoring frame, `h` its
/// height, and `page_height` the page's height in points.
pub fn authoring_to_pdf(x: f64, y: f64, h: f64, page_height: f64) -> (f64, f64) {
    (x, page_height - y - h)
}

/// Convert a PDF-frame bottom-left draw origin back to the authoring-frame
/// top-left corner. Exact inverse of [`authoring_to_pdf`].
pub fn pdf_to_authoring(pdf_x: f64, pdf_y: f64, h: f64, page_height: f64) -> (f64, f64) {
    (pdf_x, page_height - pdf_y - h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letter_page_example() {
        // A 200x50 box with its top-left at (100, 200) on a 792pt page
        // draws from (100, 542).
        let (x, y) = authoring_to_pdf(100.0, 200.0, 50.0, 792.0);
        assert_eq!(x, 100.0);
        assert_eq!(y, 542.0);
    }

    #[test]
    fn test_top_edge() {
        // Box flush with the page top: its draw origin is one box-height
        // below the page top.
        let (_, y) = authoring_to_pdf(0.0, 0.0, 50.0, 792.0);
        assert_eq!(y, 742.0);
    }

    #[test]
    fn test_bottom_edge() {
        // Box whose bottom touches the page bottom draws at y = 0.
        let (_, y) = authoring_to_pdf(0.0, 742.0, 50.0, 792.0);
        assert_eq!(y, 0.0);
    }

    #[test]
    fn test_inverse() {
        let (px, py) = authoring_to_pdf(72.5, 310.25, 24.0, 792.0);
        let (x, y) = pdf_to_authoring(px, py, 24.0, 792.0);
        assert_eq!((x, y), (72.5, 310.25));
    }
}
