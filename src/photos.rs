use image::{ImageFormat, ImageOutputFormat};
use std::io::Cursor;
use thiserror::Error;

/// Bounding box of export thumbnails, in pixels
pub const THUMBNAIL_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("upload {0} is empty")]
    Empty(String),
    #[error("upload {name} is not an image: {reason}")]
    NotAnImage { name: String, reason: String },
    #[error("could not encode thumbnail: {0}")]
    Encode(String),
}

/// An uploaded file that decoded as an image
#[derive(Debug, Clone)]
pub struct ValidatedPhoto {
    pub file_name: String,
    pub extension: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Check that an upload is a decodable image and work out its extension
///
/// The extension of `file_name` wins when it has one; otherwise the detected
/// format decides.
///
/// # Arguments
/// * `file_name` - Name reported by the browser (may be empty)
/// * `bytes` - Raw file content
///
/// # Returns
/// * `Result<ValidatedPhoto, PhotoError>` - The upload with its storage extension and MIME type
pub fn validate_upload(file_name: &str, bytes: Vec<u8>) -> Result<ValidatedPhoto, PhotoError> {
    if bytes.is_empty() {
        return Err(PhotoError::Empty(file_name.to_string()));
    }
    let not_an_image = |e: image::ImageError| PhotoError::NotAnImage {
        name: file_name.to_string(),
        reason: e.to_string(),
    };
    let format = image::guess_format(&bytes).map_err(not_an_image)?;
    image::load_from_memory_with_format(&bytes, format).map_err(not_an_image)?;

    let extension = extension_of(file_name).unwrap_or_else(|| {
        format
            .extensions_str()
            .first()
            .copied()
            .unwrap_or("bin")
            .to_string()
    });

    Ok(ValidatedPhoto {
        file_name: file_name.to_string(),
        extension,
        content_type: content_type(format),
        bytes,
    })
}

fn extension_of(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// MIME type stored alongside an object of the given format
pub fn content_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Storage path of the `index`-th file of a batch: `{project}/{millis}_{index}.{ext}`
///
/// # Examples
/// ```
/// use maintenance::photos::object_path;
///
/// assert_eq!(object_path("Tower", 1700000000000, 2, "jpg"), "Tower/1700000000000_2.jpg");
/// ```
pub fn object_path(project: &str, millis: i64, index: usize, extension: &str) -> String {
    format!("{}/{}_{}.{}", project, millis, index, extension)
}

/// Shrink a photo to fit within [`THUMBNAIL_SIZE`] and encode it as PNG
pub fn thumbnail_png(bytes: &[u8]) -> Result<Vec<u8>, PhotoError> {
    let img = image::load_from_memory(bytes).map_err(|e| PhotoError::NotAnImage {
        name: "thumbnail source".to_string(),
        reason: e.to_string(),
    })?;
    let thumb = img.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE);

    let mut buffer = Cursor::new(Vec::new());
    thumb
        .write_to(&mut buffer, ImageOutputFormat::Png)
        .map_err(|e| PhotoError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageOutputFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn upload_keeps_its_own_extension() {
        let photo = validate_upload("pump.JPG", png(4, 4)).unwrap();
        assert_eq!(photo.extension, "jpg");
        assert_eq!(photo.content_type, "image/png");
    }

    #[test]
    fn format_decides_missing_extension() {
        let photo = validate_upload("camera-upload", png(4, 4)).unwrap();
        assert_eq!(photo.extension, "png");
    }

    #[test]
    fn rejects_non_images() {
        assert!(matches!(
            validate_upload("notes.txt", b"plain text".to_vec()),
            Err(PhotoError::NotAnImage { .. })
        ));
        assert!(matches!(
            validate_upload("empty.png", Vec::new()),
            Err(PhotoError::Empty(_))
        ));
    }

    #[test]
    fn thumbnail_fits_box_and_keeps_aspect() {
        let thumb = thumbnail_png(&png(300, 150)).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.dimensions(), (100, 50));
        assert_eq!(image::guess_format(&thumb).unwrap(), ImageFormat::Png);
    }
}
