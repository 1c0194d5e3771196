//! Data Augmentation Module
//!
//! Random image transformations applied to training images only:
//! horizontal flip, rotation, zoom and contrast. Validation images are
//! never augmented.
//!
//! Rotation and zoom share a single inverse affine warp about the image
//! centre, sampled bilinearly with reflected borders.

use image::{imageops, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    /// Probability of mirroring left/right
    pub horizontal_flip_prob: f32,
    /// Rotation range as a fraction of a full turn (angle in ±factor·2π)
    pub rotation_factor: f32,
    /// Zoom range; the scale is drawn from 1 ± factor, values above 1 zoom out
    pub zoom_factor: f32,
    /// Contrast range; the factor is drawn from 1 ± factor
    pub contrast_factor: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            rotation_factor: 0.1,
            zoom_factor: 0.1,
            contrast_factor: 0.1,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            rotation_factor: 0.0,
            zoom_factor: 0.0,
            contrast_factor: 0.0,
        }
    }

    /// True when no transformation can ever be applied
    pub fn is_identity(&self) -> bool {
        self.horizontal_flip_prob <= 0.0
            && self.rotation_factor <= 0.0
            && self.zoom_factor <= 0.0
            && self.contrast_factor <= 0.0
    }
}

/// Image augmenter that applies random transformations
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    /// Apply the configured augmentations to an image
    ///
    /// The output has the same dimensions as the input.
    pub fn augment(&self, img: &RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let mut result = if self.config.horizontal_flip_prob > 0.0
            && rng.gen::<f32>() < self.config.horizontal_flip_prob
        {
            imageops::flip_horizontal(img)
        } else {
            img.clone()
        };

        let angle = if self.config.rotation_factor > 0.0 {
            let turn = rng.gen_range(-self.config.rotation_factor..=self.config.rotation_factor);
            turn * 2.0 * std::f32::consts::PI
        } else {
            0.0
        };

        let scale = if self.config.zoom_factor > 0.0 {
            1.0 + rng.gen_range(-self.config.zoom_factor..=self.config.zoom_factor)
        } else {
            1.0
        };

        if angle != 0.0 || scale != 1.0 {
            result = warp_affine(&result, angle, scale);
        }

        if self.config.contrast_factor > 0.0 {
            let factor =
                1.0 + rng.gen_range(-self.config.contrast_factor..=self.config.contrast_factor);
            adjust_contrast(&mut result, factor);
        }

        result
    }
}

/// Rotate by `angle` radians and scale by `scale` about the centre
///
/// Each output pixel samples the source at `scale * R(angle) * offset`;
/// a scale above 1 therefore shows more of the source (zoom out).
pub fn warp_affine(img: &RgbImage, angle: f32, scale: f32) -> RgbImage {
    let (width, height) = img.dimensions();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let (sin_a, cos_a) = angle.sin_cos();

    RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 + 0.5 - cx;
        let dy = y as f32 + 0.5 - cy;

        let src_x = scale * (dx * cos_a - dy * sin_a) + cx - 0.5;
        let src_y = scale * (dx * sin_a + dy * cos_a) + cy - 0.5;

        bilinear_sample(img, src_x, src_y)
    })
}

/// Map an integer coordinate into `0..size` by mirroring at the edges
/// (`d c b a | a b c d | d c b a`)
fn reflect_index(i: i64, size: u32) -> u32 {
    let n = size as i64;
    let period = 2 * n;
    let m = i.rem_euclid(period);
    (if m >= n { period - 1 - m } else { m }) as u32
}

/// Sample a pixel with bilinear interpolation and reflected borders
fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();

    let x0f = x.floor();
    let y0f = y.floor();
    let fx = x - x0f;
    let fy = y - y0f;

    let x0 = x0f as i64;
    let y0 = y0f as i64;
    let (xa, xb) = (reflect_index(x0, width), reflect_index(x0 + 1, width));
    let (ya, yb) = (reflect_index(y0, height), reflect_index(y0 + 1, height));

    let p00 = img.get_pixel(xa, ya);
    let p10 = img.get_pixel(xb, ya);
    let p01 = img.get_pixel(xa, yb);
    let p11 = img.get_pixel(xb, yb);

    let mut result = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }

    Rgb(result)
}

/// Scale each channel around its own mean by `factor`, clipping to [0, 255]
pub fn adjust_contrast(img: &mut RgbImage, factor: f32) {
    let count = (img.width() as f64 * img.height() as f64).max(1.0);

    let mut sums = [0.0f64; 3];
    for pixel in img.pixels() {
        for c in 0..3 {
            sums[c] += pixel[c] as f64;
        }
    }
    let means = sums.map(|s| (s / count) as f32);

    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let v = (pixel[c] as f32 - means[c]) * factor + means[c];
            pixel[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn create_test_image() -> RgbImage {
        RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 128]))
    }

    fn channel_mean(img: &RgbImage, c: usize) -> f64 {
        img.pixels().map(|p| p[c] as f64).sum::<f64>() / (img.width() * img.height()) as f64
    }

    #[test]
    fn test_default_ranges() {
        let config = AugmentationConfig::default();
        assert_eq!(config.horizontal_flip_prob, 0.5);
        assert_eq!(config.rotation_factor, 0.1);
        assert_eq!(config.zoom_factor, 0.1);
        assert_eq!(config.contrast_factor, 0.1);
        assert!(AugmentationConfig::none().is_identity());
        assert!(!config.is_identity());
    }

    #[test]
    fn test_augment_keeps_dimensions() {
        let aug = Augmenter::new(AugmentationConfig::default());
        let img = create_test_image();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        for _ in 0..5 {
            let out = aug.augment(&img, &mut rng);
            assert_eq!(out.dimensions(), (64, 48));
        }
    }

    #[test]
    fn test_none_is_identity() {
        let aug = Augmenter::new(AugmentationConfig::none());
        let img = create_test_image();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        assert_eq!(aug.augment(&img, &mut rng), img);
    }

    #[test]
    fn test_same_seed_same_output() {
        let aug = Augmenter::new(AugmentationConfig::default());
        let img = create_test_image();

        let a = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(9));
        let b = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_flip_always() {
        let aug = Augmenter::new(AugmentationConfig {
            horizontal_flip_prob: 1.0,
            ..AugmentationConfig::none()
        });
        let img = create_test_image();
        let out = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(0));

        assert_eq!(out.get_pixel(0, 10), img.get_pixel(63, 10));
        assert_eq!(out.get_pixel(63, 10), img.get_pixel(0, 10));
    }

    #[test]
    fn test_identity_warp() {
        let img = create_test_image();
        assert_eq!(warp_affine(&img, 0.0, 1.0), img);
    }

    #[test]
    fn test_half_turn_matches_double_flip() {
        let img = create_test_image();
        let rotated = warp_affine(&img, std::f32::consts::PI, 1.0);
        let expected = imageops::flip_vertical(&imageops::flip_horizontal(&img));

        for (a, b) in rotated.pixels().zip(expected.pixels()) {
            for c in 0..3 {
                assert!((a[c] as i32 - b[c] as i32).abs() <= 1);
            }
        }
    }

    #[test]
    fn test_zoom_out_reflects_border() {
        let img = create_test_image();
        let out = warp_affine(&img, 0.0, 1.1);
        // the centre stays put, corners now come from reflected content
        assert_eq!(out.dimensions(), img.dimensions());
        let centre = out.get_pixel(32, 24);
        assert!((centre[0] as i32 - img.get_pixel(32, 24)[0] as i32).abs() <= 4);
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect_index(-1, 4), 0);
        assert_eq!(reflect_index(-2, 4), 1);
        assert_eq!(reflect_index(3, 4), 3);
        assert_eq!(reflect_index(4, 4), 3);
        assert_eq!(reflect_index(5, 4), 2);
        assert_eq!(reflect_index(9, 4), 1);
    }

    #[test]
    fn test_contrast_preserves_channel_mean() {
        let img = create_test_image();
        let mut adjusted = img.clone();
        adjust_contrast(&mut adjusted, 1.1);

        for c in 0..3 {
            assert!((channel_mean(&img, c) - channel_mean(&adjusted, c)).abs() < 1.0);
        }
        // spread grows around the mean
        assert!(adjusted.get_pixel(0, 0)[0] <= img.get_pixel(0, 0)[0]);
        assert!(adjusted.get_pixel(63, 0)[0] >= img.get_pixel(63, 0)[0]);
    }
}
