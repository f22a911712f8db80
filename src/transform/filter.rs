//! Separable binomial smoothing (discrete Gaussian approximation)

/// Largest supported radius; a radius of 4 is a 9-tap kernel.
pub const MAX_RADIUS: usize = 4;

/// Row `2 * radius` of Pascal's triangle. Taps sum to `4^radius`.
pub fn binomial_kernel(radius: usize) -> ([u32; 2 * MAX_RADIUS + 1], usize) {
    let taps = 2 * radius + 1;
    let mut kernel = [0u32; 2 * MAX_RADIUS + 1];
    kernel[0] = 1;
    for n in 1..taps {
        for k in (1..=n).rev() {
            kernel[k] += kernel[k - 1];
        }
    }
    (kernel, taps)
}

/// Blur `plane` in place: horizontal pass into `tmp`, vertical pass back.
///
/// Both buffers are `width * height`. Samples outside the frame replicate the
/// nearest edge pixel. `radius == 0` leaves the plane untouched.
pub fn smooth_in_place(plane: &mut [u8], tmp: &mut [u8], width: usize, height: usize, radius: usize) {
    if radius == 0 {
        return;
    }
    let radius = radius.min(MAX_RADIUS);
    let (kernel, taps) = binomial_kernel(radius);
    let kernel = &kernel[..taps];
    let shift = 2 * radius as u32; // log2(4^radius)
    let round = 1u32 << (shift - 1);

    for y in 0..height {
        let row = &plane[y * width..(y + 1) * width];
        let out = &mut tmp[y * width..(y + 1) * width];
        for (x, o) in out.iter_mut().enumerate() {
            let mut acc = 0u32;
            for (k, &w) in kernel.iter().enumerate() {
                let sx = (x + k).saturating_sub(radius).min(width - 1);
                acc += w * row[sx] as u32;
            }
            *o = ((acc + round) >> shift).min(255) as u8;
        }
    }

    for y in 0..height {
        for x in 0..width {
            let mut acc = 0u32;
            for (k, &w) in kernel.iter().enumerate() {
                let sy = (y + k).saturating_sub(radius).min(height - 1);
                acc += w * tmp[sy * width + x] as u32;
            }
            plane[y * width + x] = ((acc + round) >> shift).min(255) as u8;
        }
    }
}
