//! QR provisioning bitmap rendering.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Luma};
use qrcode::QrCode;

use cobro_core::QrImage;

use crate::SessionError;

const MIN_QR_SIDE: u32 = 300;

/// Render the raw QR payload into a PNG plus its data-URL form.
pub fn render(data: &str) -> Result<QrImage, SessionError> {
    let code = QrCode::new(data.as_bytes()).map_err(|e| SessionError::Qr(e.to_string()))?;
    let bitmap = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_QR_SIDE, MIN_QR_SIDE)
        .build();

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(
            bitmap.as_raw(),
            bitmap.width(),
            bitmap.height(),
            ExtendedColorType::L8,
        )
        .map_err(|e| SessionError::Qr(e.to_string()))?;

    let data_url = format!("data:image/png;base64,{}", STANDARD.encode(&png));
    Ok(QrImage { data_url, png })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_png_and_data_url() {
        let qr = render("2@abcdef1234567890").unwrap();
        assert!(qr.data_url.starts_with("data:image/png;base64,"));
        // PNG magic bytes.
        assert_eq!(&qr.png[..4], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn empty_payload_does_not_panic() {
        // The backend occasionally emits an empty refresh; rendering may
        // reject it but must not panic.
        let _ = render("");
    }
}
