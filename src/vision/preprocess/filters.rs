//! Non-local means denoising
//!
//! Works on interleaved 8-bit buffers (`channels` = 1 or 3) so the same code
//! serves grayscale and color images.

/// Radius of the comparison patch for non-local means
const NLM_PATCH_RADIUS: isize = 1;
/// Radius of the search window for non-local means
const NLM_SEARCH_RADIUS: isize = 5;

/// Non-local means denoising with filter strength `h`
pub fn non_local_means(src: &[u8], width: usize, height: usize, channels: usize, h: f64) -> Vec<u8> {
    let mut out = src.to_vec();
    if width == 0 || height == 0 || h <= 0.0 {
        return out;
    }

    let w = width as isize;
    let hgt = height as isize;
    let at = |x: isize, y: isize, c: usize| -> f64 {
        let x = x.clamp(0, w - 1) as usize;
        let y = y.clamp(0, hgt - 1) as usize;
        src[(y * width + x) * channels + c] as f64
    };
    let patch_len = ((2 * NLM_PATCH_RADIUS + 1).pow(2) as usize * channels) as f64;
    let h2 = h * h;

    for y in 0..hgt {
        for x in 0..w {
            let mut acc = [0.0f64; 3];
            let mut weight_sum = 0.0;

            for sy in (y - NLM_SEARCH_RADIUS).max(0)..=(y + NLM_SEARCH_RADIUS).min(hgt - 1) {
                for sx in (x - NLM_SEARCH_RADIUS).max(0)..=(x + NLM_SEARCH_RADIUS).min(w - 1) {
                    let mut dist = 0.0;
                    for py in -NLM_PATCH_RADIUS..=NLM_PATCH_RADIUS {
                        for px in -NLM_PATCH_RADIUS..=NLM_PATCH_RADIUS {
                            for c in 0..channels {
                                let d = at(x + px, y + py, c) - at(sx + px, sy + py, c);
                                dist += d * d;
                            }
                        }
                    }
                    let weight = (-(dist / patch_len) / h2).exp();
                    for (c, slot) in acc.iter_mut().enumerate().take(channels) {
                        *slot += weight * at(sx, sy, c);
                    }
                    weight_sum += weight;
                }
            }

            let idx = (y as usize * width + x as usize) * channels;
            for c in 0..channels {
                out[idx + c] = (acc[c] / weight_sum).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}
