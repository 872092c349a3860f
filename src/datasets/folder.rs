// Binary image-folder datasets: <root>/{train,test}/{0,1}/*.jpg, where the
// class folder name is the label.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tracing::info;

use crate::datasets::{LoadedDataset, Split};
use crate::images::ImageBatch;
use crate::{Config, Label};

const SPLITS: [&str; 2] = ["train", "test"];
const CLASSES: [(&str, Label); 2] = [("0", 0), ("1", 1)];

// The `*.jpg` files directly inside `dir`, in file name order
pub fn list_jpegs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {:?}", dir))? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "jpg") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

// Decode an image as RGB and resize it to size x size
fn load_image(path: &Path, size: u32) -> Result<Vec<u8>> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode {:?}", path))?
        .to_rgb8();
    Ok(imageops::resize(&image, size, size, FilterType::CatmullRom).into_raw())
}

// All images of one split: class 0 first, then class 1
pub fn load_split(split_dir: &Path, size: u32) -> Result<(ImageBatch, Vec<Label>)> {
    let mut pixels = Vec::new();
    let mut labels = Vec::new();
    for (class, label) in CLASSES {
        for path in list_jpegs(&split_dir.join(class))? {
            pixels.extend(load_image(&path, size)?);
            labels.push(label);
        }
    }
    let side = size as usize;
    let batch = ImageBatch::from_nhwc(pixels, labels.len(), side, side, 3)?;
    Ok((batch, labels))
}

pub fn load_image_folder(root: &Path, size: u32) -> Result<LoadedDataset> {
    let mut dataset = LoadedDataset::new();
    for split in SPLITS {
        let (batch, labels) = load_split(&root.join(split), size)?;
        info!("Read {} {} images from {:?}", batch.len(), split, root);
        dataset = dataset.with_split(split, Split::encode(&batch, labels)?);
    }
    Ok(dataset)
}

pub fn load_voets(config: &Config) -> Result<LoadedDataset> {
    let root = config
        .voets_dir
        .as_deref()
        .ok_or_else(|| anyhow!("no image folder configured for voets"))?;
    load_image_folder(root, config.folder_image_size)
}
