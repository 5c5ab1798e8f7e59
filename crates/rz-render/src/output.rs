//! Converting pixel buffers into images

use image::{DynamicImage, Rgba, Rgba32FImage, RgbaImage};

/// Color of the frame shown when a module failed to compile
pub const DIAGNOSTIC_COLOR: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

/// Build an image from one `vec4` per pixel, row-major
pub fn to_image(width: u32, height: u32, pixels: &[[f32; 4]]) -> Rgba32FImage {
    Rgba32FImage::from_fn(width, height, |x, y| {
        let index = (y * width + x) as usize;
        Rgba(pixels.get(index).copied().unwrap_or([0.0, 0.0, 0.0, 1.0]))
    })
}

/// A flat frame in [`DIAGNOSTIC_COLOR`]
pub fn diagnostic_frame(width: u32, height: u32) -> Rgba32FImage {
    Rgba32FImage::from_pixel(width, height, Rgba(DIAGNOSTIC_COLOR))
}

/// 8-bit copy for PNG export
pub fn to_rgba8(image: &Rgba32FImage) -> RgbaImage {
    DynamicImage::ImageRgba32F(image.clone()).to_rgba8()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixels_are_row_major() {
        let pixels = [[0.0, 0.0, 0.0, 1.0], [1.0, 0.0, 0.0, 1.0], [0.0, 1.0, 0.0, 1.0], [0.0, 0.0, 1.0, 1.0]];
        let image = to_image(2, 2, &pixels);
        assert_eq!(image.get_pixel(1, 0).0, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(image.get_pixel(0, 1).0, [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_short_buffer_fills_black() {
        let image = to_image(2, 1, &[[0.5; 4]]);
        assert_eq!(image.get_pixel(1, 0).0, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_diagnostic_frame_to_png_bytes() {
        let frame = to_rgba8(&diagnostic_frame(3, 2));
        assert_eq!(frame.get_pixel(2, 1).0, [255, 0, 0, 255]);
    }
}
