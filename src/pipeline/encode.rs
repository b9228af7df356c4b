//! Image encoding for the multimodal request body.
//!
//! Rendered PDF pages are PNG-encoded once, when they are normalised; photos
//! keep their original bytes and MIME type. Either way the request carries
//! base64 `ImageData`.

use crate::pipeline::normalize::NormalizedPage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Lossless PNG bytes for a rasterised page.
///
/// JPEG artefacts around pen strokes make digits ambiguous (1/7, 3/8), so
/// rendered pages are never re-encoded lossily.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Wrap a normalised page as a base64 image attachment.
pub fn encode_page(page: &NormalizedPage) -> ImageData {
    let b64 = STANDARD.encode(&page.content);
    debug!(
        "Encoded {} page {} → {} bytes base64",
        page.source_filename,
        page.page_index + 1,
        b64.len()
    );
    ImageData::new(b64, page.mime_type.as_str()).with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn png_bytes_have_png_magic() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let bytes = png_bytes(&img).expect("encode should succeed");
        assert_eq!(&bytes[..4], b"\x89PNG");
    }

    #[test]
    fn encode_page_keeps_mime_type() {
        let page = NormalizedPage {
            content: vec![0xFF, 0xD8, 0xFF, 0xE0],
            mime_type: "image/jpeg".into(),
            source_filename: "scan.jpg".into(),
            page_index: 0,
        };
        let data = encode_page(&page);
        assert_eq!(data.mime_type, "image/jpeg");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, page.content);
    }
}
