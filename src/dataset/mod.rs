//! Dataset module for soybean image data handling
//!
//! This module provides functionality for:
//! - Indexing the class-per-directory image tree
//! - The seeded training/validation split
//! - Data augmentation for training batches
//! - Decoding, caching and batching images into burn tensors

pub mod augmentation;
pub mod burn_dataset;
pub mod loader;
pub mod split;

// Re-export main types for convenience
pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{
    DecodedImage, ImageCache, InputScaling, SoybeanBatch, SoybeanBatcher, SoybeanItem,
};
pub use loader::{DatasetStats, ImageSample, SoybeanDataset};
pub use split::{DatasetSplits, SplitConfig};

/// Number of soybean quality classes
pub const NUM_CLASSES: usize = 5;

/// Default model input size
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// The expected class directories, in label order
pub const CLASS_NAMES: [&str; 5] = [
    "Broken soybeans",
    "Immature soybeans",
    "Intact soybeans",
    "Skin-damaged soybeans",
    "Spotted soybeans",
];

/// Get the label index for a given class name
pub fn class_index(name: &str) -> Option<usize> {
    CLASS_NAMES.iter().position(|&n| n == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_names_sorted() {
        let mut sorted = CLASS_NAMES;
        sorted.sort();
        assert_eq!(sorted, CLASS_NAMES);
    }

    #[test]
    fn test_class_lookup() {
        assert_eq!(class_index("Broken soybeans"), Some(0));
        assert_eq!(class_index("Spotted soybeans"), Some(4));
        assert_eq!(class_index("Mouldy soybeans"), None);
    }
}
