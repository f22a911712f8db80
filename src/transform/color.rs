//! Color space conversion into luminance and display-ready RGBA

use crate::capture::{Frame, PixelFormat};

/// BT.601 luma in 8.8 fixed point. The weights sum to 256 so white maps to 255.
#[inline]
pub fn luma_bt601(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32 + 128) >> 8) as u8
}

/// Full-range BT.601 YUV to RGB in 10-bit fixed point.
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = (y as i32) << 10;
    let u = u as i32 - 128;
    let v = v as i32 - 128;
    let r = (y + 1436 * v + 512) >> 10;
    let g = (y - 352 * u - 731 * v + 512) >> 10;
    let b = (y + 1815 * u + 512) >> 10;
    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Fill `luma` (tightly packed, `width * height`) from any supported format.
/// The frame must already be validated.
pub fn extract_luma(frame: &Frame, luma: &mut [u8]) {
    let width = frame.meta.width as usize;
    let height = frame.meta.height as usize;

    for (y, out) in luma.chunks_exact_mut(width).take(height).enumerate() {
        let row = frame.row(y);
        match frame.meta.format {
            // Y plane is already luminance
            PixelFormat::Gray8 | PixelFormat::Nv12 | PixelFormat::Nv21 => {
                out.copy_from_slice(row);
            }
            PixelFormat::Rgb24 => {
                for (o, p) in out.iter_mut().zip(row.chunks_exact(3)) {
                    *o = luma_bt601(p[0], p[1], p[2]);
                }
            }
            PixelFormat::Bgr24 => {
                for (o, p) in out.iter_mut().zip(row.chunks_exact(3)) {
                    *o = luma_bt601(p[2], p[1], p[0]);
                }
            }
            PixelFormat::Rgba32 => {
                for (o, p) in out.iter_mut().zip(row.chunks_exact(4)) {
                    *o = luma_bt601(p[0], p[1], p[2]);
                }
            }
            PixelFormat::Yuyv => {
                for (o, p) in out.iter_mut().zip(row.chunks_exact(2)) {
                    *o = p[0];
                }
            }
        }
    }
}

/// Convert any supported format to tightly packed RGBA (`width * height * 4`).
pub fn write_rgba(frame: &Frame, rgba: &mut [u8]) {
    let width = frame.meta.width as usize;
    let height = frame.meta.height as usize;
    let stride = frame.meta.stride as usize;

    for (y, out) in rgba.chunks_exact_mut(width * 4).take(height).enumerate() {
        let row = frame.row(y);
        match frame.meta.format {
            PixelFormat::Gray8 => {
                for (o, &g) in out.chunks_exact_mut(4).zip(row) {
                    o.copy_from_slice(&[g, g, g, 255]);
                }
            }
            PixelFormat::Rgb24 => {
                for (o, p) in out.chunks_exact_mut(4).zip(row.chunks_exact(3)) {
                    o.copy_from_slice(&[p[0], p[1], p[2], 255]);
                }
            }
            PixelFormat::Bgr24 => {
                for (o, p) in out.chunks_exact_mut(4).zip(row.chunks_exact(3)) {
                    o.copy_from_slice(&[p[2], p[1], p[0], 255]);
                }
            }
            PixelFormat::Rgba32 => out.copy_from_slice(row),
            PixelFormat::Yuyv => {
                // Y0 U Y1 V covers two pixels
                for (o, p) in out.chunks_exact_mut(8).zip(row.chunks_exact(4)) {
                    let [r0, g0, b0] = yuv_to_rgb(p[0], p[1], p[3]);
                    let [r1, g1, b1] = yuv_to_rgb(p[2], p[1], p[3]);
                    o.copy_from_slice(&[r0, g0, b0, 255, r1, g1, b1, 255]);
                }
            }
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                let chroma_start = stride * height + (y / 2) * stride;
                let chroma = &frame.data[chroma_start..chroma_start + width];
                let vu_order = frame.meta.format == PixelFormat::Nv21;
                for (x, o) in out.chunks_exact_mut(4).enumerate() {
                    let pair = &chroma[(x / 2) * 2..(x / 2) * 2 + 2];
                    let (u, v) = if vu_order {
                        (pair[1], pair[0])
                    } else {
                        (pair[0], pair[1])
                    };
                    let [r, g, b] = yuv_to_rgb(row[x], u, v);
                    o.copy_from_slice(&[r, g, b, 255]);
                }
            }
        }
    }
}
