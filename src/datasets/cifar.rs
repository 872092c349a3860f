// CIFAR-10 and CIFAR-100 from their binary distributions. Each record is one
// or two label bytes followed by 3072 pixel bytes: the red plane, then green,
// then blue, each plane row by row.

use std::io::BufReader;

use anyhow::Result;
use ndarray::Array4;

use crate::archive::{read_members, take_member};
use crate::datasets::{LoadedDataset, Split};
use crate::download;
use crate::images::ImageBatch;
use crate::{Config, Label, PrepError};

const CIFAR10_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz";
const CIFAR100_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-100-binary.tar.gz";

const SIDE: usize = 32;
const CHANNELS: usize = 3;
const IMAGE_BYTES: usize = SIDE * SIDE * CHANNELS;

// View channel-major (N, C, H, W) pixels as (N, H, W, C)
pub fn unflatten_chw(
    data: Vec<u8>,
    channels: usize,
    height: usize,
    width: usize,
) -> Result<ImageBatch, PrepError> {
    let len = data.len();
    let image_len = channels * height * width;
    if image_len == 0 || len % image_len != 0 {
        return Err(PrepError::Shape {
            len,
            shape: vec![len / image_len.max(1), channels, height, width],
        });
    }
    let count = len / image_len;
    let pixels = Array4::from_shape_vec((count, channels, height, width), data)
        .map_err(|_| PrepError::Shape {
            len,
            shape: vec![count, channels, height, width],
        })?
        .permuted_axes([0, 2, 3, 1]);
    Ok(ImageBatch::new(pixels))
}

// Split a batch file into its pixel planes and the label byte at `label_index`.
// Records are `label_bytes` label bytes followed by one image.
pub fn parse_batch(
    data: &[u8],
    label_bytes: usize,
    label_index: usize,
) -> Result<(Vec<u8>, Vec<Label>), PrepError> {
    let record_len = label_bytes + IMAGE_BYTES;
    if data.len() % record_len != 0 {
        return Err(PrepError::Truncated {
            what: "CIFAR batch".to_string(),
            expected: (data.len() / record_len + 1) * record_len,
            found: data.len(),
        });
    }
    let count = data.len() / record_len;
    let mut pixels = Vec::with_capacity(count * IMAGE_BYTES);
    let mut labels = Vec::with_capacity(count);
    for record in data.chunks_exact(record_len) {
        labels.push(record[label_index] as Label);
        pixels.extend_from_slice(&record[label_bytes..]);
    }
    Ok((pixels, labels))
}

fn encode_split(pixels: Vec<u8>, labels: Vec<Label>) -> Result<Split> {
    let batch = unflatten_chw(pixels, CHANNELS, SIDE, SIDE)?;
    Split::encode(&batch, labels)
}

pub fn load_cifar10(_config: &Config) -> Result<LoadedDataset> {
    // Training data is batches 1 through 5, concatenated in that order
    let train_names: Vec<String> = (1..=5)
        .map(|batch| format!("cifar-10-batches-bin/data_batch_{}.bin", batch))
        .collect();
    let test_name = "cifar-10-batches-bin/test_batch.bin";
    let mut wanted: Vec<&str> = train_names.iter().map(String::as_str).collect();
    wanted.push(test_name);

    let mut members = {
        let archive = download::fetch(CIFAR10_URL)?;
        read_members(BufReader::new(archive.as_file()), &wanted)?
    };

    let mut train_pixels = Vec::new();
    let mut train_labels = Vec::new();
    for name in &train_names {
        let (pixels, labels) = parse_batch(&take_member(&mut members, name)?, 1, 0)?;
        train_pixels.extend(pixels);
        train_labels.extend(labels);
    }
    let (test_pixels, test_labels) = parse_batch(&take_member(&mut members, test_name)?, 1, 0)?;

    Ok(LoadedDataset::new()
        .with_split("train", encode_split(train_pixels, train_labels)?)
        .with_split("test", encode_split(test_pixels, test_labels)?))
}

pub fn load_cifar100(_config: &Config) -> Result<LoadedDataset> {
    let train_name = "cifar-100-binary/train.bin";
    let test_name = "cifar-100-binary/test.bin";
    let mut members = {
        let archive = download::fetch(CIFAR100_URL)?;
        read_members(BufReader::new(archive.as_file()), &[train_name, test_name])?
    };

    // Records carry the coarse label then the fine label; the fine one is kept
    let (train_pixels, train_labels) = parse_batch(&take_member(&mut members, train_name)?, 2, 1)?;
    let (test_pixels, test_labels) = parse_batch(&take_member(&mut members, test_name)?, 2, 1)?;

    Ok(LoadedDataset::new()
        .with_split("train", encode_split(train_pixels, train_labels)?)
        .with_split("test", encode_split(test_pixels, test_labels)?))
}
