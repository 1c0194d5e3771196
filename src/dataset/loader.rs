//! Soybean Dataset Loader
//!
//! Discovers the class-per-directory image tree and assigns labels in
//! lexicographic order of the class directory names.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{Result, ResultExt, SoybeanError};
use crate::utils::format_bar;

/// File extensions accepted as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 5] = ["bmp", "gif", "jpeg", "jpg", "png"];

/// A single image sample with its label and metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index
    pub label: usize,
    /// Class name (e.g., "Intact soybeans")
    pub class_name: String,
    /// Unique sample ID, stable for a given directory tree
    pub id: usize,
}

/// Soybean dataset index (paths only, images are decoded later)
#[derive(Debug, Clone)]
pub struct SoybeanDataset {
    /// Root directory of the dataset
    pub root_dir: PathBuf,
    /// All samples, grouped by class then sorted by path
    pub samples: Vec<ImageSample>,
    /// Class names indexed by label
    pub class_names: Vec<String>,
}

impl SoybeanDataset {
    /// Index a dataset directory
    ///
    /// The directory should be structured as:
    /// ```text
    /// root_dir/
    /// ├── Broken soybeans/
    /// │   ├── 0001.jpg
    /// │   └── 0002.jpg
    /// ├── Immature soybeans/
    /// │   └── ...
    /// └── ...
    /// ```
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Loading soybean dataset from: {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(SoybeanError::PathNotFound(root_dir));
        }

        let mut class_names: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let name = entry.file_name().into_string().map_err(|_| {
                    SoybeanError::Dataset(format!(
                        "Class directory name is not valid UTF-8: {:?}",
                        entry.path()
                    ))
                })?;
                class_names.push(name);
            }
        }
        class_names.sort();

        info!("Found {} classes", class_names.len());

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let class_dir = root_dir.join(class_name);

            let mut paths: Vec<PathBuf> = Vec::new();
            for entry in WalkDir::new(&class_dir).min_depth(1) {
                let entry = entry.with_context(|| format!("Failed to walk {:?}", class_dir))?;
                if entry.file_type().is_file() && is_image_file(entry.path()) {
                    paths.push(entry.into_path());
                }
            }
            paths.sort();

            debug!("Class '{}' (label {}): {} images", class_name, label, paths.len());

            for path in paths {
                let id = samples.len();
                samples.push(ImageSample {
                    path,
                    label,
                    class_name: class_name.clone(),
                    id,
                });
            }
        }

        info!("Indexed {} images", samples.len());

        Ok(Self {
            root_dir,
            samples,
            class_names,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Get statistics about the dataset
    pub fn get_stats(&self) -> DatasetStats {
        let mut class_counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            class_counts[sample.label] += 1;
        }

        DatasetStats {
            total_samples: self.samples.len(),
            class_counts,
            class_names: self.class_names.clone(),
        }
    }
}

/// Whether a path has one of the accepted image extensions
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Statistics about the dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub class_counts: Vec<usize>,
    pub class_names: Vec<String>,
}

impl DatasetStats {
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Print statistics to console
    pub fn print(&self) {
        println!("\n📊 Dataset Statistics:");
        println!("  Total samples: {}", self.total_samples);
        println!("  Number of classes: {}", self.num_classes());
        println!("\n  Samples per class:");

        for (idx, (name, count)) in self.class_names.iter().zip(&self.class_counts).enumerate() {
            let fraction = if self.total_samples > 0 {
                *count as f64 / self.total_samples as f64
            } else {
                0.0
            };
            println!("    {:2}. {:28} {:6} {}", idx, name, count, format_bar(fraction, 40));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::write(path, b"not decoded by the loader").unwrap();
    }

    fn create_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for class in ["Spotted soybeans", "Broken soybeans", "Intact soybeans"] {
            fs::create_dir(dir.path().join(class)).unwrap();
        }
        touch(&dir.path().join("Broken soybeans/b.jpg"));
        touch(&dir.path().join("Broken soybeans/a.PNG"));
        touch(&dir.path().join("Broken soybeans/notes.txt"));
        touch(&dir.path().join("Intact soybeans/x.jpeg"));
        fs::create_dir(dir.path().join("Intact soybeans/extra")).unwrap();
        touch(&dir.path().join("Intact soybeans/extra/y.bmp"));
        touch(&dir.path().join("Spotted soybeans/z.gif"));
        touch(&dir.path().join("README.md"));
        dir
    }

    #[test]
    fn test_classes_sorted_and_labeled() {
        let dir = create_tree();
        let dataset = SoybeanDataset::new(dir.path()).unwrap();

        assert_eq!(
            dataset.class_names,
            vec!["Broken soybeans", "Intact soybeans", "Spotted soybeans"]
        );
        assert_eq!(dataset.num_classes(), 3);
    }

    #[test]
    fn test_extension_filter_and_order() {
        let dir = create_tree();
        let dataset = SoybeanDataset::new(dir.path()).unwrap();

        assert_eq!(dataset.len(), 5);

        let broken: Vec<_> = dataset
            .samples
            .iter()
            .filter(|s| s.label == 0)
            .map(|s| s.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(broken, vec!["a.PNG", "b.jpg"]);

        // nested files are collected with their class
        assert_eq!(dataset.get_stats().class_counts[1], 2);
        assert!(dataset.samples.iter().all(|s| s.id < dataset.len()));
    }

    #[test]
    fn test_stats() {
        let dir = create_tree();
        let stats = SoybeanDataset::new(dir.path()).unwrap().get_stats();

        assert_eq!(stats.total_samples, 5);
        assert_eq!(stats.class_counts, vec![2, 2, 1]);
    }

    #[test]
    fn test_missing_root() {
        let result = SoybeanDataset::new("/definitely/not/a/dataset");
        assert!(matches!(result, Err(SoybeanError::PathNotFound(_))));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_class_dir_is_an_error() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = create_tree();
        let bad = dir.path().join(OsStr::from_bytes(b"Broken \xff soybeans"));
        fs::create_dir(&bad).unwrap();
        touch(&bad.join("0001.jpg"));

        let result = SoybeanDataset::new(dir.path());
        match result {
            Err(SoybeanError::Dataset(msg)) => assert!(msg.contains("not valid UTF-8")),
            other => panic!("expected dataset error, got {:?}", other.map(|d| d.class_names)),
        }
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("a/b.JPG")));
        assert!(is_image_file(Path::new("a/b.gif")));
        assert!(!is_image_file(Path::new("a/b.webp")));
        assert!(!is_image_file(Path::new("a/b")));
    }
}
