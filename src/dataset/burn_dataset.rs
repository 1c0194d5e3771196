//! Burn Dataset Integration
//!
//! Images are decoded and resized once into an in-memory cache. Each
//! training batch is then produced from the cache, augmenting the training
//! images on the fly, and stacked into tensors by [`SoybeanBatcher`].
//!
//! ## Augmentation Support
//!
//! - `ImageCache::items(.., None, ..)`: clean items (validation)
//! - `ImageCache::items(.., Some(augmenter), seed)`: augmented items (training)

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::augmentation::Augmenter;
use crate::dataset::loader::ImageSample;
use crate::utils::error::{Result, SoybeanError};

/// ImageNet channel means (RGB, 0..1 scale)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations (RGB, 0..1 scale)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How raw 0..255 pixels are scaled before entering the backbone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputScaling {
    /// `(x / 255 - mean) / std` with ImageNet statistics
    #[default]
    Imagenet,
    /// `x / 127.5 - 1`, mapping pixels into [-1, 1]
    Symmetric,
}

impl std::fmt::Display for InputScaling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputScaling::Imagenet => write!(f, "imagenet"),
            InputScaling::Symmetric => write!(f, "symmetric"),
        }
    }
}

/// A decoded image resized to the model input size
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub image: RgbImage,
    pub label: usize,
    pub path: PathBuf,
}

impl DecodedImage {
    /// Decode an image file and resize it (bilinear) to `image_size`²
    pub fn from_path(path: &Path, label: usize, image_size: u32) -> Result<Self> {
        let load_err = |e: &dyn std::fmt::Display| {
            SoybeanError::ImageLoadError(path.to_path_buf(), e.to_string())
        };

        let image = ImageReader::open(path)
            .map_err(|e| load_err(&e))?
            .with_guessed_format()
            .map_err(|e| load_err(&e))?
            .decode()
            .map_err(|e| load_err(&e))?
            .resize_exact(image_size, image_size, FilterType::Triangle)
            .to_rgb8();

        Ok(Self {
            image,
            label,
            path: path.to_path_buf(),
        })
    }
}

/// A single item ready for batching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SoybeanItem {
    /// Image data as flattened CHW float array [3 * H * W], values in 0..=255
    pub image: Vec<f32>,
    /// Class label
    pub label: usize,
    /// Image path (for debugging/logging)
    pub path: String,
}

impl SoybeanItem {
    pub fn from_image(image: &RgbImage, label: usize, path: &Path) -> Self {
        Self {
            image: image_to_chw(image),
            label,
            path: path.to_string_lossy().to_string(),
        }
    }
}

/// Convert an RGB image to CHW floats, keeping the 0..=255 range
pub fn image_to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        data[idx] = pixel[0] as f32;
        data[plane + idx] = pixel[1] as f32;
        data[2 * plane + idx] = pixel[2] as f32;
    }

    data
}

/// In-memory cache of decoded, resized images
#[derive(Clone, Debug)]
pub struct ImageCache {
    images: Vec<DecodedImage>,
    image_size: u32,
}

impl ImageCache {
    /// Decode all samples in parallel
    ///
    /// The first image that fails to decode aborts the whole load.
    pub fn new_cached(samples: &[ImageSample], image_size: u32, label: &str) -> Result<Self> {
        let total = samples.len();
        info!("Decoding {} {} images at {}x{}", total, label, image_size, image_size);

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let loaded = AtomicUsize::new(0);

        let images: Result<Vec<DecodedImage>> = samples
            .par_iter()
            .map(|sample| {
                let result = DecodedImage::from_path(&sample.path, sample.label, image_size);
                let count = loaded.fetch_add(1, Ordering::Relaxed);
                if count % 50 == 0 {
                    pb.set_position(count as u64);
                }
                result
            })
            .collect();

        match images {
            Ok(images) => {
                pb.finish_with_message(format!("Loaded {} images", images.len()));
                Ok(Self::from_images(images, image_size))
            }
            Err(e) => {
                pb.abandon();
                Err(e)
            }
        }
    }

    /// Build a cache from already decoded images
    pub fn from_images(images: Vec<DecodedImage>, image_size: u32) -> Self {
        Self { images, image_size }
    }

    /// Side length every cached image was resized to
    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Produce items for the given cache indices
    ///
    /// With an augmenter, the item at batch position `i` is augmented with a
    /// ChaCha8 stream `i` of `seed`, so the output does not depend on how
    /// rayon schedules the work.
    pub fn items(
        &self,
        indices: &[usize],
        augmenter: Option<&Augmenter>,
        seed: u64,
    ) -> Vec<SoybeanItem> {
        indices
            .par_iter()
            .enumerate()
            .filter_map(|(position, &idx)| self.images.get(idx).map(|img| (position, img)))
            .map(|(position, img)| match augmenter {
                Some(augmenter) => {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed);
                    rng.set_stream(position as u64);
                    let augmented = augmenter.augment(&img.image, &mut rng);
                    SoybeanItem::from_image(&augmented, img.label, &img.path)
                }
                None => SoybeanItem::from_image(&img.image, img.label, &img.path),
            })
            .collect()
    }
}

impl Dataset<DecodedImage> for ImageCache {
    fn get(&self, index: usize) -> Option<DecodedImage> {
        self.images.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.images.len()
    }
}

/// Split `0..len` into batches of at most `batch_size` indices
///
/// Indices are shuffled first when an RNG is given. The last batch may be
/// smaller.
pub fn batch_indices(len: usize, batch_size: usize, rng: Option<&mut ChaCha8Rng>) -> Vec<Vec<usize>> {
    let mut indices: Vec<usize> = (0..len).collect();
    if let Some(rng) = rng {
        indices.shuffle(rng);
    }

    indices
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// A batch of images for training or evaluation
#[derive(Clone, Debug)]
pub struct SoybeanBatch<B: Backend> {
    /// Batch of images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Batch of labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Batcher that stacks items and applies the input scaling
#[derive(Clone, Debug)]
pub struct SoybeanBatcher {
    image_size: usize,
    scaling: InputScaling,
}

impl SoybeanBatcher {
    pub fn new(image_size: usize, scaling: InputScaling) -> Self {
        Self {
            image_size,
            scaling,
        }
    }
}

impl<B: Backend> Batcher<B, SoybeanItem, SoybeanBatch<B>> for SoybeanBatcher {
    fn batch(&self, items: Vec<SoybeanItem>, device: &B::Device) -> SoybeanBatch<B> {
        let batch_size = items.len();
        let channels = 3;
        let height = self.image_size;
        let width = self.image_size;

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, channels, height, width]),
            device,
        );

        let images = match self.scaling {
            InputScaling::Imagenet => {
                let mean = Tensor::<B, 4>::from_floats(
                    TensorData::new(IMAGENET_MEAN.to_vec(), [1, 3, 1, 1]),
                    device,
                );
                let std = Tensor::<B, 4>::from_floats(
                    TensorData::new(IMAGENET_STD.to_vec(), [1, 3, 1, 1]),
                    device,
                );
                (images / 255.0 - mean) / std
            }
            InputScaling::Symmetric => images / 127.5 - 1.0,
        };

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        SoybeanBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::augmentation::AugmentationConfig;
    use burn_ndarray::NdArray;
    use image::Rgb;

    type TestBackend = NdArray;

    fn solid(value: u8, size: u32) -> RgbImage {
        RgbImage::from_pixel(size, size, Rgb([value, value / 2, 255 - value]))
    }

    fn cache_of(n: usize, size: u32) -> ImageCache {
        let images = (0..n)
            .map(|i| DecodedImage {
                image: solid((i * 20) as u8, size),
                label: i % 5,
                path: PathBuf::from(format!("img_{}.png", i)),
            })
            .collect();
        ImageCache::from_images(images, size)
    }

    #[test]
    fn test_image_to_chw_layout() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([1, 2, 3]));
        img.put_pixel(1, 0, Rgb([4, 5, 6]));

        assert_eq!(image_to_chw(&img), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_decode_and_resize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bean.png");
        solid(200, 40).save(&path).unwrap();

        let decoded = DecodedImage::from_path(&path, 3, 16).unwrap();
        assert_eq!(decoded.image.dimensions(), (16, 16));
        assert_eq!(decoded.label, 3);
    }

    #[test]
    fn test_decode_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let sample = ImageSample {
            path: path.clone(),
            label: 0,
            class_name: "Broken soybeans".to_string(),
            id: 0,
        };
        let result = ImageCache::new_cached(&[sample], 16, "test");
        assert!(matches!(result, Err(SoybeanError::ImageLoadError(p, _)) if p == path));
    }

    #[test]
    fn test_cache_as_burn_dataset() {
        let cache = cache_of(4, 8);
        assert_eq!(Dataset::len(&cache), 4);
        assert!(!cache.is_empty());
        assert_eq!(cache.get(2).map(|img| img.label), Some(2));
        assert!(cache.get(4).is_none());
        assert_eq!(cache.iter().count(), 4);
    }

    #[test]
    fn test_batch_indices() {
        let batches = batch_indices(70, 32, None);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 6);
        assert_eq!(batches[0][0], 0);

        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let shuffled = batch_indices(70, 32, Some(&mut rng));
        let mut all: Vec<usize> = shuffled.into_iter().flatten().collect();
        all.sort();
        assert_eq!(all, (0..70).collect::<Vec<_>>());
    }

    #[test]
    fn test_items_clean_and_augmented() {
        let cache = cache_of(6, 8);
        let augmenter = Augmenter::new(AugmentationConfig::default());

        let clean = cache.items(&[0, 3], None, 0);
        assert_eq!(clean.len(), 2);
        assert_eq!(clean[1].label, 3);
        assert_eq!(clean[0].image.len(), 3 * 8 * 8);

        let a = cache.items(&[1, 2, 4], Some(&augmenter), 11);
        let b = cache.items(&[1, 2, 4], Some(&augmenter), 11);
        assert_eq!(a.len(), 3);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.image, y.image);
        }
    }

    #[test]
    fn test_batcher_symmetric_scaling() {
        let device = Default::default();
        let cache = cache_of(3, 4);
        let items = cache.items(&[0, 1, 2], None, 0);

        let batcher = SoybeanBatcher::new(4, InputScaling::Symmetric);
        let batch: SoybeanBatch<TestBackend> = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [3, 3, 4, 4]);
        assert_eq!(batch.targets.dims(), [3]);

        let values: Vec<f32> = batch.images.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
        // first image, red channel is 0 -> -1
        assert!((values[0] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_batcher_imagenet_scaling() {
        let device = Default::default();
        let item = SoybeanItem {
            image: vec![255.0; 3],
            label: 1,
            path: "white.png".to_string(),
        };

        let batcher = SoybeanBatcher::new(1, InputScaling::Imagenet);
        let batch: SoybeanBatch<TestBackend> = batcher.batch(vec![item], &device);
        let values: Vec<f32> = batch.images.into_data().to_vec().unwrap();

        for c in 0..3 {
            let expected = (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            assert!((values[c] - expected).abs() < 1e-4);
        }
    }
}
