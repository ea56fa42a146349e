//! Contrast-limited adaptive histogram equalization
//!
//! Per-tile clipped histograms are turned into lookup tables, and every pixel
//! is mapped by bilinear interpolation between the four nearest tile LUTs.

use image::{GrayImage, RgbImage};

const BINS: usize = 256;

/// Equalize a luminance image with the given clip limit and tile grid
pub fn equalize(gray: &GrayImage, clip_limit: f64, grid_size: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tiles_x = grid_size.clamp(1, width) as usize;
    let tiles_y = grid_size.clamp(1, height) as usize;
    let w = width as usize;
    let h = height as usize;
    let raw = gray.as_raw();

    let x_bounds: Vec<usize> = (0..=tiles_x).map(|i| i * w / tiles_x).collect();
    let y_bounds: Vec<usize> = (0..=tiles_y).map(|i| i * h / tiles_y).collect();

    let mut luts = vec![[0u8; BINS]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let mut hist = [0u32; BINS];
            for y in y_bounds[ty]..y_bounds[ty + 1] {
                let row = &raw[y * w + x_bounds[tx]..y * w + x_bounds[tx + 1]];
                for &v in row {
                    hist[v as usize] += 1;
                }
            }
            let area = ((x_bounds[tx + 1] - x_bounds[tx]) * (y_bounds[ty + 1] - y_bounds[ty])) as u32;
            luts[ty * tiles_x + tx] = tile_lut(&mut hist, area, clip_limit);
        }
    }

    let tile_w = w as f64 / tiles_x as f64;
    let tile_h = h as f64 / tiles_y as f64;
    let last_x = tiles_x as isize - 1;
    let last_y = tiles_y as isize - 1;

    let mut out = GrayImage::new(width, height);
    let out_raw: &mut [u8] = &mut out;

    for y in 0..h {
        let tyf = (y as f64 + 0.5) / tile_h - 0.5;
        let ty1 = tyf.floor() as isize;
        let ya = tyf - ty1 as f64;
        let ty2 = (ty1 + 1).min(last_y) as usize;
        let ty1 = ty1.max(0) as usize;

        for x in 0..w {
            let txf = (x as f64 + 0.5) / tile_w - 0.5;
            let tx1 = txf.floor() as isize;
            let xa = txf - tx1 as f64;
            let tx2 = (tx1 + 1).min(last_x) as usize;
            let tx1 = tx1.max(0) as usize;

            let v = raw[y * w + x] as usize;
            let top = luts[ty1 * tiles_x + tx1][v] as f64 * (1.0 - xa)
                + luts[ty1 * tiles_x + tx2][v] as f64 * xa;
            let bottom = luts[ty2 * tiles_x + tx1][v] as f64 * (1.0 - xa)
                + luts[ty2 * tiles_x + tx2][v] as f64 * xa;
            let value = top * (1.0 - ya) + bottom * ya;

            out_raw[y * w + x] = value.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Clip a tile histogram, redistribute the excess and build its CDF lookup table
fn tile_lut(hist: &mut [u32; BINS], area: u32, clip_limit: f64) -> [u8; BINS] {
    let mut lut = [0u8; BINS];
    if area == 0 {
        for (i, v) in lut.iter_mut().enumerate() {
            *v = i as u8;
        }
        return lut;
    }

    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f64 / BINS as f64) as u32).max(1);

        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }

        let batch = excess / BINS as u32;
        let mut residual = excess % BINS as u32;
        for bin in hist.iter_mut() {
            *bin += batch;
        }
        if residual > 0 {
            let step = (BINS as u32 / residual).max(1) as usize;
            let mut i = 0;
            while i < BINS && residual > 0 {
                hist[i] += 1;
                residual -= 1;
                i += step;
            }
        }
    }

    let scale = 255.0 / area as f64;
    let mut sum = 0u32;
    for (i, &count) in hist.iter().enumerate() {
        sum += count;
        lut[i] = (sum as f64 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Equalize only the luminance of an RGB image, keeping chroma
pub fn equalize_rgb(rgb: &RgbImage, clip_limit: f64, grid_size: u32) -> RgbImage {
    let (width, height) = rgb.dimensions();
    let pixels = (width * height) as usize;

    let mut luma = GrayImage::new(width, height);
    let mut chroma = Vec::with_capacity(pixels);
    for (src, dst) in rgb.pixels().zip(luma.pixels_mut()) {
        let [r, g, b] = src.0.map(f64::from);
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        let cb = 128.0 - 0.168736 * r - 0.331264 * g + 0.5 * b;
        let cr = 128.0 + 0.5 * r - 0.418688 * g - 0.081312 * b;
        dst.0 = [y.round().clamp(0.0, 255.0) as u8];
        chroma.push((cb, cr));
    }

    let equalized = equalize(&luma, clip_limit, grid_size);

    let mut out = RgbImage::new(width, height);
    for ((dst, src), (cb, cr)) in out.pixels_mut().zip(equalized.pixels()).zip(chroma) {
        let y = f64::from(src.0[0]);
        let r = y + 1.402 * (cr - 128.0);
        let g = y - 0.344136 * (cb - 128.0) - 0.714136 * (cr - 128.0);
        let b = y + 1.772 * (cb - 128.0);
        dst.0 = [r, g, b].map(|c| c.round().clamp(0.0, 255.0) as u8);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_uniform_image_stays_uniform() {
        let img = GrayImage::from_pixel(32, 32, Luma([90]));
        let out = equalize(&img, 2.0, 8);
        let first = out.get_pixel(0, 0).0[0];
        assert!(out.pixels().all(|p| p.0[0] == first));
    }

    #[test]
    fn test_stretches_low_contrast_ramp() {
        // Values packed into 100..=115
        let img = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x / 4) as u8]));
        let out = equalize(&img, 40.0, 2);

        let (min, max) = out.pixels().fold((255u8, 0u8), |(lo, hi), p| {
            (lo.min(p.0[0]), hi.max(p.0[0]))
        });
        assert!(max - min > 100, "range {min}..{max} was not stretched");
    }

    #[test]
    fn test_preserves_dimensions_with_uneven_tiles() {
        let img = GrayImage::from_fn(37, 13, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]));
        let out = equalize(&img, 2.0, 8);
        assert_eq!(out.dimensions(), (37, 13));
    }

    #[test]
    fn test_grey_rgb_stays_grey() {
        let img = RgbImage::from_fn(16, 16, |x, _| {
            let v = 80 + x as u8;
            Rgb([v, v, v])
        });
        let out = equalize_rgb(&img, 2.0, 4);
        for p in out.pixels() {
            let [r, g, b] = p.0;
            assert!(r.abs_diff(g) <= 1 && g.abs_diff(b) <= 1);
        }
    }
}
