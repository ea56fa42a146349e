//! Frame data structures for captured window content

use image::{DynamicImage, GenericImageView};
use std::time::Instant;

use super::geometry::{RelativeRect, ScreenRect};

/// One full capture of the target window
#[derive(Debug, Clone)]
pub struct Frame {
    /// Captured pixels
    image: DynamicImage,
    /// Window origin in screen coordinates at capture time
    origin: (i32, i32),
    /// Window size at capture time
    size: (u32, u32),
    /// Timestamp when frame was captured
    timestamp: Instant,
}

impl Frame {
    /// Create a new frame
    pub fn new(image: DynamicImage, origin: (i32, i32), size: (u32, u32)) -> Self {
        Self {
            image,
            origin,
            size,
            timestamp: Instant::now(),
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Window origin (x, y) in screen space
    pub fn origin(&self) -> (i32, i32) {
        self.origin
    }

    /// Window size (width, height) as reported by the window manager
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Convert a screen rectangle to frame-relative coordinates
    pub fn relative_rect(&self, rect: &ScreenRect) -> RelativeRect {
        rect.relative_to(self.origin)
    }

    /// True when `rel` lies fully inside the window bounds
    pub fn contains(&self, rel: &RelativeRect) -> bool {
        rel.fits_within(self.size.0, self.size.1)
    }

    /// Crop a frame-relative rectangle out of the captured pixels.
    ///
    /// Returns `None` when the rectangle does not fit inside the image itself,
    /// which can be smaller than the reported window size.
    pub fn crop(&self, rel: &RelativeRect) -> Option<DynamicImage> {
        let (img_w, img_h) = self.image.dimensions();
        if !rel.fits_within(img_w, img_h) {
            return None;
        }
        let crop = self
            .image
            .crop_imm(rel.x as u32, rel.y as u32, rel.width, rel.height);
        if crop.width() == 0 || crop.height() == 0 {
            return None;
        }
        Some(crop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn frame(width: u32, height: u32) -> Frame {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 0, 255])
        });
        Frame::new(DynamicImage::ImageRgba8(img), (100, 100), (width, height))
    }

    #[test]
    fn test_crop_inside_frame() {
        let frame = frame(800, 600);
        let rect = ScreenRect::new(150, 150, 200, 80).unwrap();
        let rel = frame.relative_rect(&rect);
        assert!(frame.contains(&rel));

        let crop = frame.crop(&rel).unwrap();
        assert_eq!(crop.dimensions(), (200, 80));
        // Top-left pixel of the crop is frame pixel (50, 50)
        assert_eq!(crop.get_pixel(0, 0), Rgba([50, 50, 0, 255]));
    }

    #[test]
    fn test_crop_outside_frame() {
        let frame = frame(800, 600);
        let rect = ScreenRect::new(850, 650, 100, 100).unwrap();
        let rel = frame.relative_rect(&rect);
        assert!(!frame.contains(&rel));
        assert!(frame.crop(&rel).is_none());
    }

    #[test]
    fn test_crop_rejects_region_left_of_window() {
        let frame = frame(800, 600);
        let rect = ScreenRect::new(50, 150, 100, 100).unwrap();
        let rel = frame.relative_rect(&rect);
        assert_eq!(rel.x, -50);
        assert!(frame.crop(&rel).is_none());
    }
}
