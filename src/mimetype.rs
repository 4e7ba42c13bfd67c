//! Mimetype to file extension mapping for decrypted cache files.
//!
//! Transcoders (ffmpeg, imagemagick) pick their decoder from the extension.

/// Extension used when the mimetype is unknown or absent.
pub const DEFAULT_EXTENSION: &str = "bin";

const EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/pjpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/avif", "avif"),
    ("image/heic", "heic"),
    ("image/heif", "heif"),
    ("image/tiff", "tiff"),
    ("image/bmp", "bmp"),
    ("image/svg+xml", "svg"),
    ("video/mp4", "mp4"),
    ("video/webm", "webm"),
    ("video/quicktime", "mov"),
    ("video/x-matroska", "mkv"),
    ("video/x-msvideo", "avi"),
    ("video/mpeg", "mpeg"),
    ("video/3gpp", "3gp"),
    ("video/ogg", "ogv"),
    ("audio/mpeg", "mp3"),
    ("audio/ogg", "ogg"),
    ("audio/wav", "wav"),
    ("audio/flac", "flac"),
    ("audio/mp4", "m4a"),
    ("application/pdf", "pdf"),
    ("text/plain", "txt"),
];

/// Extension for `mimetype`, ignoring parameters such as `; charset=utf-8`.
pub fn extension_for(mimetype: Option<&str>) -> &'static str {
    let Some(mimetype) = mimetype else {
        return DEFAULT_EXTENSION;
    };
    let essence = mimetype
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(mime, _)| *mime == essence)
        .map(|(_, ext)| *ext)
        .unwrap_or(DEFAULT_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_types() {
        assert_eq!(extension_for(Some("image/jpeg")), "jpg");
        assert_eq!(extension_for(Some("video/quicktime")), "mov");
        assert_eq!(extension_for(Some("Text/Plain; charset=utf-8")), "txt");
    }

    #[test]
    fn test_unknown_and_missing_fall_back() {
        assert_eq!(extension_for(Some("application/x-unknown")), "bin");
        assert_eq!(extension_for(None), "bin");
    }
}
