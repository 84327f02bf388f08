//! Content-sharpness statistic and its two control mappings.
//!
//! The statistic is the mean absolute high-pass response of the luma: each
//! interior pixel minus its 5×5 binomial-smoothed neighborhood, accumulated
//! over every decoded frame of the GOP and normalized per pixel.

#[cfg(test)]
mod tests;

/// Smoothing kernel applied separably in both directions; the weights sum
/// to 16 per axis, so the 2-D response is normalized by 256.
const KERNEL: [u32; 5] = [1, 4, 6, 4, 1];
const BORDER: usize = 2;
const SCALE_BITS: u32 = 8;
const HALF_SCALE: u32 = 1 << (SCALE_BITS - 1);

/// Sum of absolute high-pass responses over the interior of one luma plane.
pub fn plane_energy(luma: &[u8], stride: usize, width: usize, height: usize) -> i64 {
    if width <= 2 * BORDER || height <= 2 * BORDER {
        return 0;
    }

    // Ring of the last five horizontally smoothed rows.
    let mut rows = vec![0u32; 5 * width];
    let mut acc = 0i64;

    for y in 0..height {
        {
            let src = &luma[y * stride..y * stride + width];
            let dst = &mut rows[(y % 5) * width..(y % 5) * width + width];
            for x in BORDER..width - BORDER {
                dst[x] = KERNEL
                    .iter()
                    .zip(&src[x - BORDER..=x + BORDER])
                    .map(|(&k, &p)| k * u32::from(p))
                    .sum();
            }
        }

        // Rows y-4..=y are resident, centered on cy.
        if y + 1 >= 5 {
            let cy = y - BORDER;
            for x in BORDER..width - BORDER {
                let mut sum = 0u32;
                for (j, &k) in KERNEL.iter().enumerate() {
                    sum += k * rows[((cy + j - BORDER) % 5) * width + x];
                }
                let smoothed = i64::from((sum + HALF_SCALE) >> SCALE_BITS);
                acc += (i64::from(luma[cy * stride + x]) - smoothed).abs();
            }
        }
    }

    acc
}

/// Mean high-pass energy per pixel across a GOP.
pub fn per_pixel(total: i64, frames: u64, width: u32, height: u32) -> f64 {
    if frames == 0 || width == 0 || height == 0 {
        return 0.0;
    }
    total as f64 / frames as f64 / f64::from(width) / f64::from(height)
}

/// Unsharpen amount suggested by the sharpness statistic; the grid search
/// in stage 0 uses this as its upper stopping bound.
pub fn unsharpen_hint(sharpness: f64) -> f64 {
    let s = sharpness.clamp(0.1, 0.8);
    let factor = (((0.8 - s) / 0.7) * ((0.8 - s) / 0.7) * 6.0).max(1.0);
    factor * s
}

/// Adaptive-quantization strength for the final pass: soft content gets
/// more AQ, sharp content approaches the floor of 1.0.
pub fn aq_strength(sharpness: f64) -> f64 {
    let s = sharpness.clamp(0.1, 0.8);
    (0.5 + (0.8 - s) / 0.7).max(1.0)
}
