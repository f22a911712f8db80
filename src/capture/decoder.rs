use color_eyre::{eyre::eyre, Result};
use zune_jpeg::JpegDecoder;

/// Decode one MJPEG frame to packed RGB. Returns pixels, width and height.
pub fn decode_mjpeg(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let mut decoder = JpegDecoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| eyre!("MJPEG decode failed: {:?}", e))?;
    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| eyre!("MJPEG frame has no dimensions"))?;

    if pixels.len() != width * height * 3 {
        return Err(eyre!(
            "expected RGB output for {}x{}, got {} bytes",
            width,
            height,
            pixels.len()
        ));
    }
    Ok((pixels, width as u32, height as u32))
}
