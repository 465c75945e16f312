use base64::Engine;

use crate::openai::ExtractError;

const DEFAULT_MIME: &str = "image/png";

/// Build a `data:` URL that the vision API accepts as an inline image.
pub fn encode_image(data: &[u8], filename: Option<&str>) -> Result<String, ExtractError> {
    if data.is_empty() {
        return Err(ExtractError::EmptyImage);
    }
    let mime = filename.map(mime_from_filename).unwrap_or(DEFAULT_MIME);
    let b64 = base64::engine::general_purpose::STANDARD.encode(data);
    Ok(format!("data:{};base64,{}", mime, b64))
}

fn mime_from_filename(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => DEFAULT_MIME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_buffer_is_rejected() {
        let err = encode_image(&[], Some("shot.png")).unwrap_err();
        assert!(matches!(err, ExtractError::EmptyImage));
    }

    #[test]
    fn encodes_bytes_as_data_url() {
        let url = encode_image(b"hello", Some("cart.jpg")).unwrap();
        assert_eq!(url, "data:image/jpeg;base64,aGVsbG8=");
    }

    #[test]
    fn extension_lookup_is_case_insensitive() {
        let url = encode_image(b"x", Some("SCREENSHOT.JPEG")).unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn unknown_extension_defaults_to_png() {
        let url = encode_image(b"x", Some("listing.heic")).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn missing_filename_defaults_to_png() {
        let url = encode_image(b"x", None).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }
}
