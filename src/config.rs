use std::path::PathBuf;

// Where the TFRecord files and auxiliary outputs go, plus the local inputs some
// loaders read instead of (or before) downloading.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    // Root of the train/{0,1}, test/{0,1} image folder. The folder dataset is
    // only registered when this is set.
    pub voets_dir: Option<PathBuf>,
    // A previously downloaded STL-10 archive, used instead of the network when present
    pub stl10_archive: PathBuf,
    // Side length images from the folder dataset are resized to
    pub folder_image_size: u32,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Config {
            data_dir: data_dir.into(),
            voets_dir: None,
            stl10_archive: PathBuf::from("stl10/stl10_binary.tar.gz"),
            folder_image_size: 100,
        }
    }

    pub fn with_voets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.voets_dir = Some(dir.into());
        self
    }

    // Canonical path of the container file for one split
    pub fn record_path(&self, dataset: &str, split: &str) -> PathBuf {
        self.data_dir.join(format!("{}-{}.tfrecord", dataset, split))
    }
}
