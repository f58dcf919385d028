//! PNG decoding into PDF image XObjects.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use png::{BitDepth, ColorType};
use std::io::Write;

use crate::error::PdfError;

/// An image XObject registered in the document, plus its pixel dimensions
/// for aspect-ratio-preserving placement.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedImage {
    pub object_id: ObjectId,
    pub width: u32,
    pub height: u32,
}

/// Decode a PNG and add it to the document as an image XObject.
///
/// Alpha channels are split out into a grayscale SMask so transparency in
/// hand-drawn signatures composites correctly over page content. Both
/// streams are Flate-compressed.
pub fn embed_png(doc: &mut Document, data: &[u8], spot_key: &str) -> Result<EmbeddedImage, PdfError> {
    let image_err = |reason: String| PdfError::Image {
        spot_key: spot_key.to_owned(),
        reason,
    };

    let decoder = png::Decoder::new(data);
    let mut reader = decoder
        .read_info()
        .map_err(|e| image_err(format!("invalid PNG: {e}")))?;
    let mut pixels = vec![0u8; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut pixels)
        .map_err(|e| image_err(format!("failed to decode PNG frame: {e}")))?;
    pixels.truncate(info.buffer_size());

    let (color_space, bits, alpha_stride) = match (info.bit_depth, info.color_type) {
        (BitDepth::Eight, ColorType::Grayscale) => ("DeviceGray", 8u16, None),
        (BitDepth::Eight, ColorType::Rgb) => ("DeviceRGB", 8, None),
        (BitDepth::Eight, ColorType::GrayscaleAlpha) => ("DeviceGray", 8, Some(1usize)),
        (BitDepth::Eight, ColorType::Rgba) => ("DeviceRGB", 8, Some(3)),
        (BitDepth::One, ColorType::Grayscale) => ("DeviceGray", 1, None),
        (BitDepth::Two, ColorType::Grayscale) => ("DeviceGray", 2, None),
        (BitDepth::Four, ColorType::Grayscale) => ("DeviceGray", 4, None),
        (depth, color) => {
            return Err(image_err(format!(
                "unsupported PNG format: {color:?} at {depth:?} bits"
            )));
        }
    };

    let mut smask_id = None;
    let samples = if let Some(color_bytes) = alpha_stride {
        // Interleaved color+alpha rows: peel the alpha byte off each pixel.
        let stride = color_bytes + 1;
        let mut color = Vec::with_capacity(pixels.len() / stride * color_bytes);
        let mut alpha = Vec::with_capacity(pixels.len() / stride);
        for px in pixels.chunks_exact(stride) {
            color.extend_from_slice(&px[..color_bytes]);
            alpha.push(px[color_bytes]);
        }
        let mask_dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => info.width as i64,
            "Height" => info.height as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        };
        smask_id = Some(doc.add_object(stream_with(mask_dict, &alpha, spot_key)?));
        color
    } else {
        pixels
    };

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => info.width as i64,
        "Height" => info.height as i64,
        "ColorSpace" => color_space,
        "BitsPerComponent" => bits as i64,
        "Filter" => "FlateDecode",
    };
    if let Some(mask) = smask_id {
        dict.set("SMask", Object::Reference(mask));
    }
    let object_id = doc.add_object(stream_with(dict, &samples, spot_key)?);

    Ok(EmbeddedImage {
        object_id,
        width: info.width,
        height: info.height,
    })
}

fn stream_with(
    dict: lopdf::Dictionary,
    data: &[u8],
    spot_key: &str,
) -> Result<Stream, PdfError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| PdfError::Image {
            spot_key: spot_key.to_owned(),
            reason: format!("compression failed: {e}"),
        })
        .map(|compressed| Stream::new(dict, compressed).with_compression(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sample_gray_png, sample_png};
    use pretty_assertions::assert_eq;

    #[test]
    fn embeds_rgba_with_smask() {
        let mut doc = Document::with_version("1.7");
        let img = embed_png(&mut doc, &sample_png(4, 2), "sig-1").unwrap();
        assert_eq!((img.width, img.height), (4, 2));
        let stream = doc.get_object(img.object_id).unwrap().as_stream().unwrap();
        assert_eq!(
            stream.dict.get(b"ColorSpace").unwrap().as_name().unwrap(),
            b"DeviceRGB"
        );
        let mask = stream.dict.get(b"SMask").unwrap().as_reference().unwrap();
        let mask_stream = doc.get_object(mask).unwrap().as_stream().unwrap();
        assert_eq!(
            mask_stream.dict.get(b"Width").unwrap().as_i64().unwrap(),
            4
        );
    }

    #[test]
    fn embeds_grayscale_without_smask() {
        let mut doc = Document::with_version("1.7");
        let img = embed_png(&mut doc, &sample_gray_png(3, 3), "sig-2").unwrap();
        let stream = doc.get_object(img.object_id).unwrap().as_stream().unwrap();
        assert_eq!(
            stream.dict.get(b"ColorSpace").unwrap().as_name().unwrap(),
            b"DeviceGray"
        );
        assert!(stream.dict.get(b"SMask").is_err());
    }

    #[test]
    fn rejects_non_png_bytes() {
        let mut doc = Document::with_version("1.7");
        let err = embed_png(&mut doc, b"%PDF-1.7 not an image", "sig-3").unwrap_err();
        assert!(matches!(err, PdfError::Image { ref spot_key, .. } if spot_key == "sig-3"));
    }
}
