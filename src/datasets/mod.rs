// Dataset loaders and the registry the driver walks. Every loader turns its
// source into named splits of PNG-encoded images with parallel labels.

pub mod cifar;
pub mod folder;
pub mod mnist;
pub mod stl10;
pub mod svhn;

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::images::{encode_all, ImageBatch};
use crate::records::write_split;
use crate::{Config, Label, PrepError};

pub type Loader = fn(&Config) -> Result<LoadedDataset>;
pub type SplitWriter = fn(&Split, &Path) -> Result<()>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Split {
    // Encoded images, index-aligned with labels
    pub images: Vec<Vec<u8>>,
    pub labels: Vec<Label>,
}

impl Split {
    pub fn new(images: Vec<Vec<u8>>, labels: Vec<Label>) -> Result<Self, PrepError> {
        if images.len() != labels.len() {
            return Err(PrepError::LengthMismatch {
                images: images.len(),
                labels: labels.len(),
            });
        }
        Ok(Split { images, labels })
    }

    // PNG-encode a batch of raw images and pair it with its labels
    pub fn encode(batch: &ImageBatch, labels: Vec<Label>) -> Result<Self> {
        if batch.len() != labels.len() {
            return Err(PrepError::LengthMismatch {
                images: batch.len(),
                labels: labels.len(),
            }
            .into());
        }
        Ok(Split::new(encode_all(batch)?, labels)?)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

// A file written verbatim under the data directory, e.g. fold definitions
#[derive(Debug, Clone, PartialEq)]
pub struct AuxFile {
    pub filename: PathBuf,
    pub data: Vec<u8>,
}

// Everything a loader produces. Splits keep the order the loader added them.
#[derive(Debug, Clone, Default)]
pub struct LoadedDataset {
    pub splits: Vec<(String, Split)>,
    pub readme: Option<String>,
    pub files: Vec<AuxFile>,
}

impl LoadedDataset {
    pub fn new() -> Self {
        LoadedDataset::default()
    }

    pub fn with_split(mut self, name: &str, split: Split) -> Self {
        self.splits.push((name.to_string(), split));
        self
    }

    pub fn with_readme(mut self, readme: impl Into<String>) -> Self {
        self.readme = Some(readme.into());
        self
    }

    pub fn with_file(mut self, filename: impl Into<PathBuf>, data: Vec<u8>) -> Self {
        self.files.push(AuxFile {
            filename: filename.into(),
            data,
        });
        self
    }

    pub fn split(&self, name: &str) -> Option<&Split> {
        self.splits
            .iter()
            .find(|(split_name, _)| split_name == name)
            .map(|(_, split)| split)
    }
}

// How the driver decides a dataset needs no work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallCheck {
    // Every expected split has its .tfrecord file
    Splits,
    // <data_dir>/<name>/<folder> exists
    Folder(&'static str),
}

#[derive(Clone)]
pub struct DatasetSpec {
    pub name: &'static str,
    pub loader: Loader,
    pub splits: &'static [&'static str],
    pub install_check: InstallCheck,
    // Replaces write_split for this dataset's splits
    pub writer: Option<SplitWriter>,
}

impl DatasetSpec {
    pub fn new(name: &'static str, loader: Loader, splits: &'static [&'static str]) -> Self {
        DatasetSpec {
            name,
            loader,
            splits,
            install_check: InstallCheck::Splits,
            writer: None,
        }
    }

    pub fn with_install_check(mut self, install_check: InstallCheck) -> Self {
        self.install_check = install_check;
        self
    }

    pub fn with_writer(mut self, writer: SplitWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn writer(&self) -> SplitWriter {
        self.writer.unwrap_or(write_split as SplitWriter)
    }
}

// Ordered name -> dataset mapping, built once and handed to the driver
#[derive(Clone, Default)]
pub struct Registry {
    specs: Vec<DatasetSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    // Every downloadable dataset, plus the image folder when one is configured
    pub fn standard(config: &Config) -> Self {
        let mut registry = Registry::new();
        registry.register(DatasetSpec::new("cifar10", cifar::load_cifar10, &["train", "test"]));
        registry.register(DatasetSpec::new("cifar100", cifar::load_cifar100, &["train", "test"]));
        registry.register(DatasetSpec::new("svhn", svhn::load, &["train", "test", "extra"]));
        registry.register(DatasetSpec::new("stl10", stl10::load, &["train", "test", "unlabeled"]));
        registry.register(DatasetSpec::new("mnist", mnist::load_mnist, &["train", "test"]));
        registry.register(DatasetSpec::new(
            "fashion_mnist",
            mnist::load_fashion_mnist,
            &["train", "test"],
        ));
        if config.voets_dir.is_some() {
            registry.register(DatasetSpec::new("voets", folder::load_voets, &["train", "test"]));
        }
        registry
    }

    // Add a dataset, replacing any earlier one with the same name in place
    pub fn register(&mut self, spec: DatasetSpec) {
        match self.specs.iter_mut().find(|existing| existing.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.specs.push(spec),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DatasetSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetSpec> {
        self.specs.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.specs.iter().map(|spec| spec.name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_loader(_: &Config) -> Result<LoadedDataset> {
        Ok(LoadedDataset::new())
    }

    #[test]
    fn test_standard_registry_order() {
        let registry = Registry::standard(&Config::new("data"));
        assert_eq!(
            registry.names(),
            vec!["cifar10", "cifar100", "svhn", "stl10", "mnist", "fashion_mnist"]
        );
        assert_eq!(registry.get("svhn").unwrap().splits, &["train", "test", "extra"]);
    }

    #[test]
    fn test_folder_dataset_needs_a_folder() {
        let registry = Registry::standard(&Config::new("data").with_voets_dir("/images"));
        assert_eq!(registry.names().last(), Some(&"voets"));
    }

    #[test]
    fn test_register_replaces_in_place() {
        let mut registry = Registry::new();
        registry.register(DatasetSpec::new("a", empty_loader, &["train"]));
        registry.register(DatasetSpec::new("b", empty_loader, &["train"]));
        registry.register(
            DatasetSpec::new("a", empty_loader, &["test"]).with_install_check(InstallCheck::Folder("x")),
        );
        assert_eq!(registry.names(), vec!["a", "b"]);
        let a = registry.get("a").unwrap();
        assert_eq!(a.splits, &["test"]);
        assert_eq!(a.install_check, InstallCheck::Folder("x"));
    }

    #[test]
    fn test_split_length_check() {
        assert!(Split::new(vec![vec![1]], vec![0, 1]).is_err());
        let split = Split::new(vec![vec![1], vec![2]], vec![0, 1]).unwrap();
        assert_eq!(split.len(), 2);
    }

    #[test]
    fn test_encode_checks_labels() {
        let batch = ImageBatch::from_nhwc(vec![0; 2 * 4 * 4 * 3], 2, 4, 4, 3).unwrap();
        assert!(Split::encode(&batch, vec![0]).is_err());
        let split = Split::encode(&batch, vec![3, 4]).unwrap();
        assert_eq!(split.labels, vec![3, 4]);
        assert_eq!(split.images.len(), 2);
    }

    #[test]
    fn test_loaded_dataset_lookup() {
        let dataset = LoadedDataset::new()
            .with_split("train", Split::default())
            .with_readme("hello")
            .with_file("folds.txt", b"0 1".to_vec());
        assert!(dataset.split("train").is_some());
        assert!(dataset.split("extra").is_none());
        assert_eq!(dataset.readme.as_deref(), Some("hello"));
        assert_eq!(dataset.files[0].filename, PathBuf::from("folds.txt"));
    }
}
