use std::path::Path;

use thiserror::Error;

pub const ALLOWED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Lower-cased extension of an accepted upload, without the leading dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageExtension(String);

impl ImageExtension {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn mime(&self) -> &'static str {
        match self.0.as_str() {
            "png" => "image/png",
            "webp" => "image/webp",
            _ => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unsupported file type")]
    UnsupportedMediaType,
}

pub fn validate_upload_name(file_name: Option<&str>) -> Result<ImageExtension, ValidationError> {
    let extension = file_name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or(ValidationError::UnsupportedMediaType)?;

    if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(ImageExtension(extension))
    } else {
        Err(ValidationError::UnsupportedMediaType)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_allowed_extensions_in_any_case() {
        for name in [
            "photo.jpg",
            "photo.JPG",
            "scan.jpeg",
            "scan.JpEg",
            "img.png",
            "IMG.PNG",
            "pic.webp",
            "pic.WEBP",
            "dir/nested.name.png",
        ] {
            let ext = validate_upload_name(Some(name)).expect("extension should be accepted");
            assert_eq!(ext.as_str(), ext.as_str().to_ascii_lowercase());
        }
        assert_eq!(
            validate_upload_name(Some("IMG.PNG")).map(|e| e.mime()),
            Ok("image/png")
        );
        assert_eq!(
            validate_upload_name(Some("a.jpeg")).map(|e| e.mime()),
            Ok("image/jpeg")
        );
    }

    #[test]
    fn rejects_missing_or_disallowed_extensions() {
        for name in [
            None,
            Some(""),
            Some("   "),
            Some("photo"),
            Some("photo."),
            Some(".png"),
            Some("photo.gif"),
            Some("photo.png.exe"),
            Some("archive.tar.gz"),
        ] {
            assert_eq!(
                validate_upload_name(name),
                Err(ValidationError::UnsupportedMediaType),
                "{name:?} should be rejected"
            );
        }
    }
}
