//! Sobel gradient magnitude and edge thresholding

use crate::EdgeStyle;

/// Value written for an edge pixel in binary output.
pub const EDGE: u8 = 255;
/// Candidate marker used while tracing hysteresis; never left in the output.
const WEAK: u8 = 1;

/// 3x3 Sobel gradient magnitude, rounded. Window reads outside the frame clamp
/// to the nearest valid pixel. Largest possible value is `ceil(1020 * sqrt 2)`.
pub fn sobel_magnitude(luma: &[u8], magnitude: &mut [u16], width: usize, height: usize) {
    let px = |x: usize, y: usize| luma[y * width + x] as i32;

    for y in 0..height {
        let ym = y.saturating_sub(1);
        let yp = (y + 1).min(height - 1);
        for x in 0..width {
            let xm = x.saturating_sub(1);
            let xp = (x + 1).min(width - 1);

            let gx = (px(xp, ym) + 2 * px(xp, y) + px(xp, yp))
                - (px(xm, ym) + 2 * px(xm, y) + px(xm, yp));
            let gy = (px(xm, yp) + 2 * px(x, yp) + px(xp, yp))
                - (px(xm, ym) + 2 * px(x, ym) + px(xp, ym));

            let sq = (gx * gx + gy * gy) as u32;
            magnitude[y * width + x] = (sq as f32).sqrt().round() as u16;
        }
    }
}

/// Thresholds applied to the gradient magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeThreshold {
    pub style: EdgeStyle,
    pub low: u16,
    /// Only consulted for [`EdgeStyle::Hysteresis`]
    pub high: u16,
}

/// Turn a magnitude plane into an 8-bit edge map. `stack` is reusable scratch
/// for tracing connected weak pixels.
pub fn threshold(
    magnitude: &[u16],
    edges: &mut [u8],
    width: usize,
    rule: EdgeThreshold,
    stack: &mut Vec<usize>,
) {
    let EdgeThreshold { style, low, high } = rule;
    match style {
        EdgeStyle::Binary => {
            for (e, &m) in edges.iter_mut().zip(magnitude) {
                *e = if m >= low { EDGE } else { 0 };
            }
        }
        EdgeStyle::Scaled => {
            for (e, &m) in edges.iter_mut().zip(magnitude) {
                *e = if m >= low { m.min(255) as u8 } else { 0 };
            }
        }
        EdgeStyle::Hysteresis => hysteresis(magnitude, edges, width, (low, high), stack),
    }
}

fn hysteresis(
    magnitude: &[u16],
    edges: &mut [u8],
    width: usize,
    (low, high): (u16, u16),
    stack: &mut Vec<usize>,
) {
    let height = edges.len() / width;
    stack.clear();
    for (i, (e, &m)) in edges.iter_mut().zip(magnitude).enumerate() {
        *e = if m >= high {
            stack.push(i);
            EDGE
        } else if m >= low {
            WEAK
        } else {
            0
        };
    }

    // Promote weak pixels 8-connected to a strong one
    while let Some(i) = stack.pop() {
        let (x, y) = (i % width, i / width);
        for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                let n = ny * width + nx;
                if edges[n] == WEAK {
                    edges[n] = EDGE;
                    stack.push(n);
                }
            }
        }
    }

    for e in edges.iter_mut().filter(|e| **e == WEAK) {
        *e = 0;
    }
}
