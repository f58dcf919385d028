//! Text measurement for the standard Helvetica face.
//!
//! Widths are the AFM advance widths for the printable ASCII range,
//! expressed in thousandths of the font size. Characters outside the
//! table fall back to the width of a digit, which keeps estimates
//! conservative for the occasional accented name.

/// Ellipsis appended when a value is truncated to fit its box.
pub const ELLIPSIS: &str = "...";

/// Minimum number of original characters kept before truncation gives up.
pub const MIN_KEPT_CHARS: usize = 3;

/// Advance widths for ASCII 32..=126, in 1/1000 of the font size.
#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, // ' ' ! " # $ % & ' ( )
    389, 584, 278, 333, 278, 278, 556, 556, 556, 556, // * + , - . / 0 1 2 3
    556, 556, 556, 556, 556, 556, 278, 278, 584, 584, // 4 5 6 7 8 9 : ; < =
    584, 556, 1015, 667, 667, 722, 722, 667, 611, 778, // > ? @ A B C D E F G
    722, 278, 500, 667, 556, 833, 722, 778, 667, 778, // H I J K L M N O P Q
    722, 667, 611, 722, 667, 944, 667, 667, 611, 278, // R S T U V W X Y Z [
    278, 278, 469, 556, 333, 556, 556, 500, 556, 556, // \ ] ^ _ ` a b c d e
    278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // f g h i j k l m n o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, // p q r s t u v w x y
    500, 334, 260, 334, 584,                          // z { | } ~
];

const FALLBACK_WIDTH: u16 = 556;

fn char_width(c: char) -> u16 {
    let code = c as u32;
    if (32..=126).contains(&code) {
        HELVETICA_WIDTHS[(code - 32) as usize]
    } else {
        FALLBACK_WIDTH
    }
}

/// Rendered width of `text` at `font_size`, in points.
pub fn text_width(text: &str, font_size: f64) -> f64 {
    let units: u64 = text.chars().map(|c| char_width(c) as u64).sum();
    units as f64 * font_size / 1000.0
}

/// Shorten `text` so it renders within `max_width` points, replacing the
/// tail with an ellipsis. At least [`MIN_KEPT_CHARS`] original characters
/// are kept even when the result still overflows; strings that short are
/// returned unchanged.
pub fn truncate_to_width(text: &str, font_size: f64, max_width: f64) -> String {
    if text_width(text, font_size) <= max_width {
        return text.to_owned();
    }
    let mut kept: Vec<char> = text.chars().collect();
    if kept.len() <= MIN_KEPT_CHARS {
        return text.to_owned();
    }
    while kept.len() > MIN_KEPT_CHARS {
        let candidate: String = kept.iter().collect::<String>() + ELLIPSIS;
        if text_width(&candidate, font_size) <= max_width {
            return candidate;
        }
        kept.pop();
    }
    kept.into_iter().collect::<String>() + ELLIPSIS
}

/// Greedy word wrap to a maximum rendered width. Words that alone exceed
/// the width get a line of their own rather than being split.
pub fn wrap_to_width(text: &str, font_size: f64, max_width: f64) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_owned()
        } else {
            format!("{current} {word}")
        };
        if text_width(&candidate, font_size) <= max_width || current.is_empty() {
            current = candidate;
        } else {
            lines.push(current);
            current = word.to_owned();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
