//! Executors for each preprocessing step type
//!
//! Grayscale images stay single channel through every executor except
//! SCALE, which preserves whatever color type it was given. Color inputs
//! are worked on as RGB.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::contrast::otsu_level;
use imageproc::filter::bilateral::GaussianEuclideanColorDistance;
use imageproc::filter::{bilateral_filter, box_filter, gaussian_blur_f32, median_filter};
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask};
use thiserror::Error;

use super::clahe;
use super::filters;
use super::step::{PreprocessingStep, StepType};

/// Largest side any executor will produce
pub const MAX_OUTPUT_SIDE: u32 = 16_384;

/// Why a single step could not run
#[derive(Debug, Error)]
pub enum StepError {
    #[error("image has no pixels")]
    EmptyImage,

    #[error("output of {width}x{height} exceeds the {MAX_OUTPUT_SIDE}px limit")]
    TooLarge { width: u64, height: u64 },

    #[error("unsupported value '{value}' for parameter '{name}'")]
    InvalidParam { name: &'static str, value: String },

    #[error("pixel buffer does not match image dimensions")]
    BufferMismatch,
}

/// Run one step on `image`, returning the transformed image
pub fn execute(step: &PreprocessingStep, image: &DynamicImage) -> Result<DynamicImage, StepError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(StepError::EmptyImage);
    }

    match step.step_type() {
        StepType::Scale => scale(step, image),
        StepType::Grayscale => Ok(DynamicImage::ImageLuma8(image.to_luma8())),
        StepType::AutoInvert => Ok(auto_invert(step, image)),
        StepType::Contrast => Ok(contrast(step, image)),
        StepType::Clahe => Ok(local_contrast(step, image)),
        StepType::Sharpen => Ok(sharpen(step, image)),
        StepType::Denoise => denoise(step, image),
        StepType::Binarize => binarize(step, image),
        StepType::Morphology => morphology(step, image),
        StepType::Padding => padding(step, image),
    }
}

/// Working copy as either single-channel or RGB
enum Working {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl Working {
    fn from_image(image: &DynamicImage) -> Self {
        if image.color().has_color() {
            Working::Rgb(image.to_rgb8())
        } else {
            Working::Gray(image.to_luma8())
        }
    }

    fn into_image(self) -> DynamicImage {
        match self {
            Working::Gray(img) => DynamicImage::ImageLuma8(img),
            Working::Rgb(img) => DynamicImage::ImageRgb8(img),
        }
    }

    /// Apply a raw interleaved-buffer filter, keeping the channel layout
    fn map_raw<F>(self, f: F) -> Result<DynamicImage, StepError>
    where
        F: FnOnce(&[u8], usize, usize, usize) -> Vec<u8>,
    {
        match self {
            Working::Gray(img) => {
                let (w, h) = img.dimensions();
                let out = f(img.as_raw(), w as usize, h as usize, 1);
                GrayImage::from_raw(w, h, out)
                    .map(DynamicImage::ImageLuma8)
                    .ok_or(StepError::BufferMismatch)
            }
            Working::Rgb(img) => {
                let (w, h) = img.dimensions();
                let out = f(img.as_raw(), w as usize, h as usize, 3);
                RgbImage::from_raw(w, h, out)
                    .map(DynamicImage::ImageRgb8)
                    .ok_or(StepError::BufferMismatch)
            }
        }
    }
}

fn scale(step: &PreprocessingStep, image: &DynamicImage) -> Result<DynamicImage, StepError> {
    let factor = step.float("factor");
    if factor <= 1.0 {
        return Ok(image.clone());
    }

    let width = (image.width() as f64 * factor).floor() as u64;
    let height = (image.height() as f64 * factor).floor() as u64;
    if width > MAX_OUTPUT_SIDE as u64 || height > MAX_OUTPUT_SIDE as u64 {
        return Err(StepError::TooLarge { width, height });
    }

    let filter = match step.choice("interpolation").as_str() {
        "nearest" => FilterType::Nearest,
        "bilinear" => FilterType::Triangle,
        "bicubic" => FilterType::CatmullRom,
        _ => FilterType::Lanczos3,
    };

    Ok(image.resize_exact(width as u32, height as u32, filter))
}

fn mean_luma(image: &DynamicImage) -> f64 {
    let gray = image.to_luma8();
    let raw = gray.as_raw();
    if raw.is_empty() {
        return 0.0;
    }
    raw.iter().map(|&v| u64::from(v)).sum::<u64>() as f64 / raw.len() as f64
}

/// Inverts bright images so text ends up light-on-dark consistently
fn auto_invert(step: &PreprocessingStep, image: &DynamicImage) -> DynamicImage {
    let threshold = step.int("threshold") as f64;
    if mean_luma(image) <= threshold {
        return image.clone();
    }

    let mut working = Working::from_image(image).into_image();
    working.invert();
    working
}

/// Contrast around the mean luminance, then brightness as a plain multiplier
fn contrast(step: &PreprocessingStep, image: &DynamicImage) -> DynamicImage {
    let factor = step.float("factor");
    let brightness = step.float("brightness");
    let mean = mean_luma(image).round();

    let adjust = |v: u8| -> u8 {
        let c = mean + factor * (f64::from(v) - mean);
        let c = c.round().clamp(0.0, 255.0);
        (c * brightness).round().clamp(0.0, 255.0) as u8
    };

    match Working::from_image(image) {
        Working::Gray(mut img) => {
            img.pixels_mut().for_each(|p| p.0[0] = adjust(p.0[0]));
            DynamicImage::ImageLuma8(img)
        }
        Working::Rgb(mut img) => {
            img.pixels_mut().for_each(|p| p.0 = p.0.map(adjust));
            DynamicImage::ImageRgb8(img)
        }
    }
}

fn local_contrast(step: &PreprocessingStep, image: &DynamicImage) -> DynamicImage {
    let clip_limit = step.float("clip_limit");
    let grid_size = step.int("grid_size").max(1) as u32;

    match Working::from_image(image) {
        Working::Gray(img) => DynamicImage::ImageLuma8(clahe::equalize(&img, clip_limit, grid_size)),
        Working::Rgb(img) => {
            DynamicImage::ImageRgb8(clahe::equalize_rgb(&img, clip_limit, grid_size))
        }
    }
}

/// Unsharp mask: `px + amount * (px - blurred)`
fn sharpen(step: &PreprocessingStep, image: &DynamicImage) -> DynamicImage {
    let amount = step.float("amount");
    let radius = step.float("radius");
    if amount <= 0.0 || radius <= 0.0 {
        return image.clone();
    }

    let combine = |orig: u8, blur: u8| -> u8 {
        let o = f64::from(orig);
        (o + amount * (o - f64::from(blur))).round().clamp(0.0, 255.0) as u8
    };

    match Working::from_image(image) {
        Working::Gray(img) => {
            let blurred = gaussian_blur_f32(&img, radius as f32);
            DynamicImage::ImageLuma8(zip_pixels(&img, &blurred, combine))
        }
        Working::Rgb(img) => {
            let blurred = gaussian_blur_f32(&img, radius as f32);
            DynamicImage::ImageRgb8(zip_pixels(&img, &blurred, combine))
        }
    }
}

fn zip_pixels<P>(
    a: &ImageBuffer<P, Vec<u8>>,
    b: &ImageBuffer<P, Vec<u8>>,
    f: impl Fn(u8, u8) -> u8,
) -> ImageBuffer<P, Vec<u8>>
where
    P: image::Pixel<Subpixel = u8>,
{
    let mut out = a.clone();
    for (dst, &other) in out.iter_mut().zip(b.iter()) {
        *dst = f(*dst, other);
    }
    out
}

/// Sigma OpenCV derives for a Gaussian kernel of `ksize` when none is given
fn sigma_for_kernel(ksize: u32) -> f32 {
    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

fn denoise(step: &PreprocessingStep, image: &DynamicImage) -> Result<DynamicImage, StepError> {
    let strength = step.int("strength").max(1) as u32;
    let ksize = (strength | 1).max(3);
    let working = Working::from_image(image);

    match step.choice("method").as_str() {
        "nlmeans" => working.map_raw(|raw, w, h, ch| {
            filters::non_local_means(raw, w, h, ch, f64::from(strength))
        }),
        "bilateral" => {
            let sigma = strength as f32 * 7.0;
            let distance = GaussianEuclideanColorDistance::new(sigma);
            Ok(match working {
                Working::Gray(img) => {
                    DynamicImage::ImageLuma8(bilateral_filter(&img, 4, sigma, distance))
                }
                Working::Rgb(img) => {
                    DynamicImage::ImageRgb8(bilateral_filter(&img, 4, sigma, distance))
                }
            })
        }
        "median" => Ok(match working {
            Working::Gray(img) => DynamicImage::ImageLuma8(median_filter(&img, ksize / 2, ksize / 2)),
            Working::Rgb(img) => DynamicImage::ImageRgb8(median_filter(&img, ksize / 2, ksize / 2)),
        }),
        "gaussian" => {
            let sigma = sigma_for_kernel(ksize);
            Ok(match working {
                Working::Gray(img) => DynamicImage::ImageLuma8(gaussian_blur_f32(&img, sigma)),
                Working::Rgb(img) => DynamicImage::ImageRgb8(gaussian_blur_f32(&img, sigma)),
            })
        }
        other => Err(StepError::InvalidParam {
            name: "method",
            value: other.to_string(),
        }),
    }
}

/// Always produces a single-channel image holding only 0 and 255
fn binarize(step: &PreprocessingStep, image: &DynamicImage) -> Result<DynamicImage, StepError> {
    let gray = image.to_luma8();
    let method = step.choice("method");

    let block = {
        let bs = step.int("block_size").max(3) as u32;
        if bs % 2 == 0 { bs + 1 } else { bs }
    };
    let constant = step.int("constant") as f64;

    let out = match method.as_str() {
        "otsu" => {
            let level = otsu_level(&gray);
            threshold_fixed(&gray, level)
        }
        "simple" => {
            let level = step.int("threshold").clamp(0, 255) as u8;
            threshold_fixed(&gray, level)
        }
        "adaptive_mean" => {
            let local = box_filter(&gray, block / 2, block / 2);
            threshold_local(&gray, &local, constant)
        }
        "adaptive_gaussian" => {
            let local = gaussian_blur_f32(&gray, sigma_for_kernel(block));
            threshold_local(&gray, &local, constant)
        }
        other => {
            return Err(StepError::InvalidParam {
                name: "method",
                value: other.to_string(),
            })
        }
    };

    Ok(DynamicImage::ImageLuma8(out))
}

fn threshold_fixed(gray: &GrayImage, level: u8) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([if gray.get_pixel(x, y).0[0] > level { 255 } else { 0 }])
    })
}

/// Pixel is foreground when it exceeds its local mean minus `constant`
fn threshold_local(gray: &GrayImage, local: &GrayImage, constant: f64) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = f64::from(gray.get_pixel(x, y).0[0]);
        let t = f64::from(local.get_pixel(x, y).0[0]) - constant;
        Luma([if v > t { 255 } else { 0 }])
    })
}

#[derive(Debug, Clone, Copy)]
enum Morph {
    Dilate,
    Erode,
}

fn morphology(step: &PreprocessingStep, image: &DynamicImage) -> Result<DynamicImage, StepError> {
    let size = step.int("kernel_size").clamp(1, 7) as u32;
    let iterations = step.int("iterations").max(1) as usize;

    let passes: Vec<Morph> = match step.choice("operation").as_str() {
        "dilate" => vec![Morph::Dilate; iterations],
        "erode" => vec![Morph::Erode; iterations],
        "close" => [vec![Morph::Dilate; iterations], vec![Morph::Erode; iterations]].concat(),
        "open" => [vec![Morph::Erode; iterations], vec![Morph::Dilate; iterations]].concat(),
        other => {
            return Err(StepError::InvalidParam {
                name: "operation",
                value: other.to_string(),
            })
        }
    };

    // Square kernel anchored at size / 2, so even sizes reach further up-left
    let anchor = (size / 2) as u8;
    let mask = Mask::from_image(&GrayImage::from_pixel(size, size, Luma([255])), anchor, anchor);
    let run = |gray: &GrayImage| {
        passes.iter().fold(gray.clone(), |img, pass| match pass {
            Morph::Dilate => grayscale_dilate(&img, &mask),
            Morph::Erode => grayscale_erode(&img, &mask),
        })
    };

    Ok(match Working::from_image(image) {
        Working::Gray(img) => DynamicImage::ImageLuma8(run(&img)),
        Working::Rgb(img) => DynamicImage::ImageRgb8(per_channel(&img, run)),
    })
}

/// Apply a single-channel filter to each channel of an RGB image
fn per_channel(img: &RgbImage, f: impl Fn(&GrayImage) -> GrayImage) -> RgbImage {
    let (w, h) = img.dimensions();
    let planes: Vec<GrayImage> = (0..3)
        .map(|c| f(&GrayImage::from_fn(w, h, |x, y| Luma([img.get_pixel(x, y).0[c]]))))
        .collect();
    RgbImage::from_fn(w, h, |x, y| {
        Rgb([
            planes[0].get_pixel(x, y).0[0],
            planes[1].get_pixel(x, y).0[0],
            planes[2].get_pixel(x, y).0[0],
        ])
    })
}

fn padding(step: &PreprocessingStep, image: &DynamicImage) -> Result<DynamicImage, StepError> {
    let pixels = step.int("pixels").max(0) as u32;
    if pixels == 0 {
        return Ok(image.clone());
    }

    let fill = if step.choice("color") == "black" { 0 } else { 255 };
    let width = image.width() + 2 * pixels;
    let height = image.height() + 2 * pixels;
    if width > MAX_OUTPUT_SIDE || height > MAX_OUTPUT_SIDE {
        return Err(StepError::TooLarge {
            width: width as u64,
            height: height as u64,
        });
    }

    let offset = i64::from(pixels);
    Ok(match Working::from_image(image) {
        Working::Gray(img) => {
            let mut canvas = GrayImage::from_pixel(width, height, Luma([fill]));
            imageops::replace(&mut canvas, &img, offset, offset);
            DynamicImage::ImageLuma8(canvas)
        }
        Working::Rgb(img) => {
            let mut canvas = RgbImage::from_pixel(width, height, Rgb([fill; 3]));
            imageops::replace(&mut canvas, &img, offset, offset);
            DynamicImage::ImageRgb8(canvas)
        }
    })
}
