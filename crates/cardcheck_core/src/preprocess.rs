use crate::config::{INPUT_CHANNELS, INPUT_SIZE};
use anyhow::{Context, Result};
use image::DynamicImage;
use image::imageops::FilterType;
use ndarray::Array4;

/// Shape of the model input, batch first, channels last.
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, INPUT_CHANNELS];

/// Builds the `[1, 224, 224, 3]` input tensor with values in `[0, 1]`.
///
/// Resizes in the source pixel depth first, so only the 224×224 result is
/// widened to `f32`. Intermediate buffers are freed on return.
pub fn image_to_tensor(img: &DynamicImage) -> Result<Array4<f32>> {
    let resized = img
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
        .to_rgb32f();
    Array4::from_shape_vec(
        (INPUT_SHAPE[0], INPUT_SHAPE[1], INPUT_SHAPE[2], INPUT_SHAPE[3]),
        resized.into_raw(),
    )
    .context("resized image does not match the model input shape")
}

/// Zero-filled input used to warm the model up right after loading.
pub fn zero_input() -> Array4<f32> {
    Array4::zeros((INPUT_SHAPE[0], INPUT_SHAPE[1], INPUT_SHAPE[2], INPUT_SHAPE[3]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn output_has_batch_and_channels_last() -> Result<()> {
        let img: RgbImage = ImageBuffer::from_pixel(640, 480, Rgb([255, 0, 0]));
        let t = image_to_tensor(&DynamicImage::ImageRgb8(img))?;
        assert_eq!(t.shape(), &INPUT_SHAPE);
        assert_abs_diff_eq!(t[[0, 0, 0, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(t[[0, 0, 0, 1]], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(t[[0, 223, 223, 2]], 0.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn values_are_divided_by_255() -> Result<()> {
        let img: RgbImage = ImageBuffer::from_pixel(50, 50, Rgb([128, 64, 255]));
        let t = image_to_tensor(&DynamicImage::ImageRgb8(img))?;
        assert_abs_diff_eq!(t[[0, 100, 100, 0]], 128.0 / 255.0, epsilon = 1e-4);
        assert_abs_diff_eq!(t[[0, 100, 100, 1]], 64.0 / 255.0, epsilon = 1e-4);
        assert_abs_diff_eq!(t[[0, 100, 100, 2]], 1.0, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn alpha_is_dropped() -> Result<()> {
        let img: RgbaImage = ImageBuffer::from_pixel(30, 30, Rgba([0, 255, 0, 0]));
        let t = image_to_tensor(&DynamicImage::ImageRgba8(img))?;
        assert_eq!(t.shape()[3], 3);
        assert_abs_diff_eq!(t[[0, 5, 5, 1]], 1.0, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn grayscale_is_expanded_to_three_channels() -> Result<()> {
        let img: GrayImage = ImageBuffer::from_pixel(300, 200, Luma([51]));
        let t = image_to_tensor(&DynamicImage::ImageLuma8(img))?;
        for c in 0..3 {
            assert_abs_diff_eq!(t[[0, 10, 10, c]], 0.2, epsilon = 1e-4);
        }
        Ok(())
    }

    #[test]
    fn values_stay_in_unit_range() -> Result<()> {
        let img: RgbImage = ImageBuffer::from_fn(97, 61, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        });
        let t = image_to_tensor(&DynamicImage::ImageRgb8(img))?;
        assert!(t.iter().all(|v| (-1e-6..=1.0 + 1e-6).contains(v)));
        Ok(())
    }

    #[test]
    fn zero_input_matches_shape() {
        let z = zero_input();
        assert_eq!(z.shape(), &INPUT_SHAPE);
        assert!(z.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn sixteen_bit_input_keeps_its_scale() -> Result<()> {
        let img: ImageBuffer<Rgb<u16>, Vec<u16>> =
            ImageBuffer::from_pixel(400, 300, Rgb([u16::MAX, 0, 32768]));
        let t = image_to_tensor(&DynamicImage::ImageRgb16(img))?;
        assert_eq!(t.shape(), &INPUT_SHAPE);
        assert_abs_diff_eq!(t[[0, 50, 50, 0]], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(t[[0, 50, 50, 1]], 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(t[[0, 50, 50, 2]], 0.5, epsilon = 1e-3);
        Ok(())
    }
}
