// STL-10: 96x96 colour images with a large unlabeled split and predefined
// training folds. Pixels are stored per image as three column-major planes.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use ndarray::Array4;
use tracing::info;

use crate::archive::{read_members, take_member};
use crate::datasets::{LoadedDataset, Split};
use crate::download;
use crate::images::ImageBatch;
use crate::{Config, Label, PrepError};

const URL: &str = "http://ai.stanford.edu/~acoates/stl10/stl10_binary.tar.gz";

const SIDE: usize = 96;
const CHANNELS: usize = 3;

const TRAIN_X: &str = "stl10_binary/train_X.bin";
const TRAIN_Y: &str = "stl10_binary/train_y.bin";
const TEST_X: &str = "stl10_binary/test_X.bin";
const TEST_Y: &str = "stl10_binary/test_y.bin";
const UNLABELED_X: &str = "stl10_binary/unlabeled_X.bin";
const FOLD_INDICES: &str = "stl10_binary/fold_indices.txt";
const MEMBERS: [&str; 6] = [TRAIN_X, TRAIN_Y, TEST_X, TEST_Y, UNLABELED_X, FOLD_INDICES];

// Where the fold definitions land under the data directory
pub const FOLD_INDICES_FILE: &str = "stl10_fold_indices.txt";

// View (N, C, W, H) storage as (N, H, W, C): the channel moves last and width
// and height swap back
pub fn unflatten(
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
            shape: vec![len / image_len.max(1), channels, width, height],
        });
    }
    let count = len / image_len;
    let pixels = Array4::from_shape_vec((count, channels, width, height), data)
        .map_err(|_| PrepError::Shape {
            len,
            shape: vec![count, channels, width, height],
        })?
        .permuted_axes([0, 3, 2, 1]);
    Ok(ImageBatch::new(pixels))
}

// Labels are stored 1 through 10
pub fn parse_labels(data: &[u8]) -> Vec<Label> {
    data.iter().map(|&label| label as Label - 1).collect()
}

fn encode_split(pixels: Vec<u8>, labels: Vec<Label>) -> Result<Split> {
    let batch = unflatten(pixels, CHANNELS, SIDE, SIDE)?;
    Split::encode(&batch, labels)
}

// Build the dataset from the extracted archive members
pub fn from_members(mut members: HashMap<String, Vec<u8>>) -> Result<LoadedDataset> {
    let train_labels = parse_labels(&take_member(&mut members, TRAIN_Y)?);
    let train = encode_split(take_member(&mut members, TRAIN_X)?, train_labels)?;

    let test_labels = parse_labels(&take_member(&mut members, TEST_Y)?);
    let test = encode_split(take_member(&mut members, TEST_X)?, test_labels)?;

    // Unlabeled images all get label 0
    let unlabeled_pixels = take_member(&mut members, UNLABELED_X)?;
    let unlabeled_count = unlabeled_pixels.len() / (CHANNELS * SIDE * SIDE);
    let unlabeled = encode_split(unlabeled_pixels, vec![0; unlabeled_count])?;

    let fold_indices = take_member(&mut members, FOLD_INDICES)?;

    Ok(LoadedDataset::new()
        .with_split("train", train)
        .with_split("test", test)
        .with_split("unlabeled", unlabeled)
        .with_file(FOLD_INDICES_FILE, fold_indices))
}

pub fn load(config: &Config) -> Result<LoadedDataset> {
    let members = if config.stl10_archive.is_file() {
        info!("Using local archive {:?}", config.stl10_archive);
        let file = File::open(&config.stl10_archive)
            .with_context(|| format!("failed to open {:?}", config.stl10_archive))?;
        read_members(BufReader::new(file), &MEMBERS)?
    } else {
        let archive = download::fetch(URL)?;
        read_members(BufReader::new(archive.as_file()), &MEMBERS)?
    };
    from_members(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::tar_gz;
    use crate::images::decode_png;

    #[test]
    fn test_unflatten_matches_reference() {
        let (channels, height, width) = (3, 2, 4);
        let data: Vec<u8> = (0..channels * height * width).map(|v| v as u8).collect();
        let batch = unflatten(data, channels, height, width).unwrap();
        assert_eq!(batch.image_shape(), (2, 4, 3));
        let image = batch.image(0);
        for h in 0..height {
            for w in 0..width {
                for c in 0..channels {
                    // Within a plane the row index varies fastest
                    let flat = c * width * height + w * height + h;
                    assert_eq!(image[[h, w, c]] as usize, flat);
                }
            }
        }
        // Row 1, column 3, green: 8 + 3*2 + 1
        assert_eq!(image[[1, 3, 1]], 15);
    }

    #[test]
    fn test_labels_shift_to_zero() {
        assert_eq!(parse_labels(&[1, 10, 5]), vec![0, 9, 4]);
    }

    #[test]
    fn test_from_archive() {
        let image_len = CHANNELS * SIDE * SIDE;
        let train_x: Vec<u8> = (0..2 * image_len).map(|v| (v % 251) as u8).collect();
        let test_x = vec![7; image_len];
        let unlabeled_x = vec![9; 3 * image_len];
        let bytes = tar_gz(&[
            (TRAIN_X, &train_x[..]),
            (TRAIN_Y, &[3u8, 10][..]),
            (TEST_X, &test_x[..]),
            (TEST_Y, &[1u8][..]),
            (UNLABELED_X, &unlabeled_x[..]),
            (FOLD_INDICES, &b"0 1\n1 0\n"[..]),
            ("stl10_binary/class_names.txt", &b"airplane\n"[..]),
        ]);
        let members = read_members(&bytes[..], &MEMBERS).unwrap();
        let dataset = from_members(members).unwrap();

        let names: Vec<&str> = dataset.splits.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["train", "test", "unlabeled"]);
        for (_, split) in &dataset.splits {
            assert_eq!(split.images.len(), split.labels.len());
        }
        assert_eq!(dataset.split("train").unwrap().labels, vec![2, 9]);
        assert_eq!(dataset.split("test").unwrap().labels, vec![0]);
        assert_eq!(dataset.split("unlabeled").unwrap().labels, vec![0, 0, 0]);

        let expected = unflatten(train_x, CHANNELS, SIDE, SIDE).unwrap();
        let decoded = decode_png(&dataset.split("train").unwrap().images[1]).unwrap();
        assert_eq!(decoded, expected.image(1));

        assert_eq!(dataset.files.len(), 1);
        assert_eq!(dataset.files[0].filename.to_str(), Some(FOLD_INDICES_FILE));
        assert_eq!(dataset.files[0].data, b"0 1\n1 0\n");
    }

    #[test]
    fn test_load_prefers_local_archive() {
        let image_len = CHANNELS * SIDE * SIDE;
        let bytes = tar_gz(&[
            (TRAIN_X, &vec![1; image_len][..]),
            (TRAIN_Y, &[4u8][..]),
            (TEST_X, &vec![2; 2 * image_len][..]),
            (TEST_Y, &[10u8, 1][..]),
            (UNLABELED_X, &vec![3; image_len][..]),
            (FOLD_INDICES, &b"0\n"[..]),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.stl10_archive = dir.path().join("stl10_binary.tar.gz");
        std::fs::write(&config.stl10_archive, bytes).unwrap();

        let dataset = load(&config).unwrap();
        assert_eq!(dataset.split("train").unwrap().labels, vec![3]);
        assert_eq!(dataset.split("test").unwrap().labels, vec![9, 0]);
        assert_eq!(dataset.split("unlabeled").unwrap().labels, vec![0]);
        assert_eq!(dataset.files[0].data, b"0\n");
    }

    #[test]
    fn test_label_count_mismatch() {
        let image_len = CHANNELS * SIDE * SIDE;
        let mut members = HashMap::new();
        members.insert(TRAIN_X.to_string(), vec![0; image_len]);
        members.insert(TRAIN_Y.to_string(), vec![1, 2]);
        assert!(from_members(members).is_err());
    }
}
