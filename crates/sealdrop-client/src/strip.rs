//! Image metadata stripping by decode + re-encode
//!
//! PNG and WebP keep their format, GIF passes through untouched (re-encoding
//! would drop animation frames), everything else becomes JPEG.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use tracing::{debug, warn};

use sealdrop_core::{ShareError, ShareResult};

#[derive(Debug)]
pub struct StrippedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    /// False when the input was passed through unchanged.
    pub reencoded: bool,
}

impl StrippedImage {
    /// Filename matching the output format, e.g. `scan.bmp` → `scan.jpg`.
    pub fn rename(&self, name: &str) -> String {
        if !self.reencoded || self.format != ImageFormat::Jpeg {
            return name.to_string();
        }
        let path = Path::new(name);
        let already_jpeg = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"));
        if already_jpeg {
            return name.to_string();
        }
        match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) if !stem.is_empty() => format!("{stem}.jpg"),
            _ => format!("{name}.jpg"),
        }
    }
}

/// Decode and re-encode `bytes`, dropping EXIF, XMP, ICC and text chunks.
///
/// EXIF orientation is applied to the pixels before the tags are dropped.
pub fn strip_metadata(bytes: &[u8], jpeg_quality: u8) -> ShareResult<StrippedImage> {
    let format = image::guess_format(bytes)
        .map_err(|e| ShareError::Reencode(format!("unrecognised image: {e}")))?;

    if format == ImageFormat::Gif {
        return Ok(StrippedImage {
            bytes: bytes.to_vec(),
            format,
            reencoded: false,
        });
    }

    let reencode_err = |e: image::ImageError| ShareError::Reencode(e.to_string());

    let mut decoder = ImageReader::with_format(Cursor::new(bytes), format)
        .into_decoder()
        .map_err(reencode_err)?;
    let orientation = decoder.orientation().map_err(reencode_err)?;
    let mut img = DynamicImage::from_decoder(decoder).map_err(reencode_err)?;
    img.apply_orientation(orientation);

    let mut out = Cursor::new(Vec::new());
    let output_format = match format {
        ImageFormat::Png => {
            img.write_to(&mut out, ImageFormat::Png).map_err(reencode_err)?;
            ImageFormat::Png
        }
        ImageFormat::WebP => {
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_to(&mut out, ImageFormat::WebP)
                .map_err(reencode_err)?;
            ImageFormat::WebP
        }
        _ => {
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut out, jpeg_quality)
                .encode_image(&rgb)
                .map_err(reencode_err)?;
            ImageFormat::Jpeg
        }
    };

    let bytes = out.into_inner();
    debug!(?format, ?output_format, size = bytes.len(), "image re-encoded");
    Ok(StrippedImage {
        bytes,
        format: output_format,
        reencoded: true,
    })
}

/// [`strip_metadata`], falling back to the original bytes on failure.
pub fn strip_or_passthrough(name: &str, bytes: Vec<u8>, jpeg_quality: u8) -> (String, Vec<u8>) {
    match strip_metadata(&bytes, jpeg_quality) {
        Ok(stripped) => (stripped.rename(name), stripped.bytes),
        Err(e) => {
            warn!(file = name, "metadata strip failed, uploading original bytes: {e}");
            (name.to_string(), bytes)
        }
    }
}
