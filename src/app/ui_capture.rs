use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8, 0xFF];

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(PNG_SIGNATURE) {
        Some("image/png")
    } else if bytes.starts_with(JPEG_SIGNATURE) {
        Some("image/jpeg")
    } else {
        None
    }
}

/// Encodes a device screenshot for the layout viewer. `snapshot_display` writes JPEG,
/// older images write PNG.
pub fn image_bytes_to_data_url(bytes: &[u8]) -> Result<String, String> {
    if bytes.len() <= JPEG_SIGNATURE.len() {
        return Err("Screenshot data is empty".to_string());
    }
    let mime = sniff_mime(bytes).ok_or_else(|| "Screenshot data is not a PNG or JPEG".to_string())?;
    let encoded = STANDARD.encode(bytes);
    Ok(format!("data:{mime};base64,{encoded}"))
}
