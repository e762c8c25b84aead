use crate::service::MediaKind;

/// Accepted image content types and the file extension stored objects get.
const IMAGE_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/tiff", "tiff"),
    ("image/heic", "heic"),
    ("image/heif", "heif"),
];

const VIDEO_TYPES: &[(&str, &str)] = &[
    ("video/mp4", "mp4"),
    ("video/quicktime", "mov"),
    ("video/webm", "webm"),
    ("video/x-matroska", "mkv"),
];

/// Content types the `image` crate can sniff. HEIC/HEIF are excluded, they
/// are validated by the conversion step instead.
const SNIFFABLE: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/tiff",
];

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("unsupported content type `{content_type}`")]
    UnsupportedContentType { content_type: String },
    #[error("upload is empty")]
    Empty,
    #[error("{kind} of {size_bytes} bytes exceeds the limit of {max_bytes} bytes")]
    TooLarge {
        kind: MediaKind,
        size_bytes: u64,
        max_bytes: u64,
    },
    #[error("payload does not match declared content type `{declared}` (detected `{detected}`)")]
    ContentMismatch { declared: String, detected: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedUpload {
    pub kind: MediaKind,
    pub extension: &'static str,
    /// Canonical form of the declared content type.
    pub content_type: &'static str,
}

/// Checks the declared content type against the allow-list, enforces the
/// per-kind size limit and, where the format is sniffable, verifies the
/// payload magic bytes agree with the declaration.
pub fn validate(
    content_type: &str,
    bytes: &[u8],
    image_max_bytes: u64,
    video_max_bytes: u64,
) -> Result<ValidatedUpload, ValidationError> {
    let declared = normalize(content_type);

    let (kind, extension, canonical, max_bytes) =
        if let Some((canonical, ext)) = lookup(IMAGE_TYPES, &declared) {
            (MediaKind::Image, ext, canonical, image_max_bytes)
        } else if let Some((canonical, ext)) = lookup(VIDEO_TYPES, &declared) {
            (MediaKind::Video, ext, canonical, video_max_bytes)
        } else {
            return Err(ValidationError::UnsupportedContentType {
                content_type: declared,
            });
        };

    if bytes.is_empty() {
        return Err(ValidationError::Empty);
    }
    let size_bytes = bytes.len() as u64;
    if size_bytes > max_bytes {
        return Err(ValidationError::TooLarge {
            kind,
            size_bytes,
            max_bytes,
        });
    }

    if SNIFFABLE.contains(&canonical) {
        let detected = image::guess_format(bytes)
            .ok()
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        if detected != canonical {
            return Err(ValidationError::ContentMismatch {
                declared: declared.clone(),
                detected,
            });
        }
    }

    Ok(ValidatedUpload {
        kind,
        extension,
        content_type: canonical,
    })
}

/// Lowercases and strips parameters, e.g. `image/JPEG; charset=x` to
/// `image/jpeg`.
fn normalize(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn lookup(
    table: &'static [(&'static str, &'static str)],
    declared: &str,
) -> Option<(&'static str, &'static str)> {
    table
        .iter()
        .find(|(mime, _)| *mime == declared)
        .copied()
}
