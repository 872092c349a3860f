// Street View House Numbers, cropped 32x32 digits distributed as MAT files.

use anyhow::{Context, Result};
use ndarray::{Array4, ShapeBuilder};
use tracing::debug;

use crate::datasets::{LoadedDataset, Split};
use crate::download;
use crate::images::ImageBatch;
use crate::matfile::MatFile;
use crate::{Config, Label, PrepError};

const URL_TEMPLATE: &str = "http://ufldl.stanford.edu/housenumbers/{}_32x32.mat";
const SPLITS: [&str; 3] = ["train", "test", "extra"];

// Raw labels run 1 through 10, with 10 standing for the digit 0
pub fn normalize_label(raw: Label) -> Label {
    raw % 10
}

// `X` is (height, width, channel, image) in MATLAB's column-major order
pub fn unflatten_column_major(data: Vec<u8>, dims: &[usize]) -> Result<ImageBatch, PrepError> {
    let len = data.len();
    let shape_error = || PrepError::Shape {
        len,
        shape: dims.to_vec(),
    };
    // MATLAB drops trailing singleton dimensions, so one image has three
    let (height, width, channels, count) = match *dims {
        [height, width, channels, count] => (height, width, channels, count),
        [height, width, channels] => (height, width, channels, 1),
        _ => return Err(shape_error()),
    };
    let pixels = Array4::from_shape_vec((height, width, channels, count).f(), data)
        .map_err(|_| shape_error())?
        .permuted_axes([3, 0, 1, 2]);
    Ok(ImageBatch::new(pixels))
}

// Build a split from the `X` and `y` variables of one SVHN MAT file
pub fn split_from_mat(mut mat: MatFile) -> Result<Split> {
    let x = mat.take("X")?;
    let y = mat.take("y")?;
    let dims = x.dims.clone();
    let batch = unflatten_column_major(x.into_u8()?, &dims)?;
    let labels: Vec<Label> = y.to_i64()?.into_iter().map(normalize_label).collect();
    debug!("SVHN split with {} images and {} labels", batch.len(), labels.len());
    Split::encode(&batch, labels)
}

pub fn load(_config: &Config) -> Result<LoadedDataset> {
    let mut dataset = LoadedDataset::new();
    for split in SPLITS {
        let url = URL_TEMPLATE.replace("{}", split);
        let mat = {
            let file = download::fetch(&url)?;
            MatFile::open(file.path()).with_context(|| format!("failed to parse {}", url))?
        };
        dataset = dataset.with_split(split, split_from_mat(mat)?);
    }
    Ok(dataset)
}
