use std::io::{BufReader, Read};

use anyhow::{Context, Result};
use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::GzDecoder;

use crate::archive::read_sized;
use crate::datasets::{LoadedDataset, Split};
use crate::download;
use crate::images::ImageBatch;
use crate::{Config, Label, PrepError};

const MNIST_URL: &str = "http://yann.lecun.com/exdb/mnist/{}";
const FASHION_MNIST_URL: &str = "http://fashion-mnist.s3-website.eu-central-1.amazonaws.com/{}";

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

// (split name, file prefix)
const SPLIT_FILES: [(&str, &str); 2] = [("train", "train"), ("test", "t10k")];

fn read_magic(reader: &mut impl Read, what: &'static str, expected: u32) -> Result<()> {
    let found = reader
        .read_u32::<BigEndian>()
        .with_context(|| format!("{} header", what))?;
    if found != expected {
        return Err(PrepError::BadMagic {
            what,
            expected,
            found,
        }
        .into());
    }
    Ok(())
}

// Parse an uncompressed IDX3 image file into single-channel images
pub fn read_idx_images(mut reader: impl Read) -> Result<ImageBatch> {
    read_magic(&mut reader, "IDX image file", IMAGES_MAGIC)?;
    let count = reader.read_u32::<BigEndian>()? as usize;
    let rows = reader.read_u32::<BigEndian>()? as usize;
    let cols = reader.read_u32::<BigEndian>()? as usize;

    let len = count
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .ok_or_else(|| PrepError::Oversized(vec![count, rows, cols]))?;
    let what = format!("IDX image data for {} images of {}x{}", count, rows, cols);
    let pixels = read_sized(&mut reader, len, &what)?;
    Ok(ImageBatch::from_nhwc(pixels, count, rows, cols, 1)?)
}

// Parse an uncompressed IDX1 label file
pub fn read_idx_labels(mut reader: impl Read) -> Result<Vec<Label>> {
    read_magic(&mut reader, "IDX label file", LABELS_MAGIC)?;
    let count = reader.read_u32::<BigEndian>()? as usize;
    let labels = read_sized(&mut reader, count, &format!("IDX label data for {} labels", count))?;
    Ok(labels.into_iter().map(Label::from).collect())
}

// Download a .gz file and return its decompressed contents
fn fetch_gz(url: &str) -> Result<Vec<u8>> {
    let file = download::fetch(url)?;
    let mut data = Vec::new();
    GzDecoder::new(BufReader::new(file.as_file()))
        .read_to_end(&mut data)
        .with_context(|| format!("failed to decompress {}", url))?;
    Ok(data)
}

fn load_idx(url_template: &str) -> Result<LoadedDataset> {
    let mut dataset = LoadedDataset::new();
    for (split, prefix) in SPLIT_FILES {
        let images_url = url_template.replace("{}", &format!("{}-images-idx3-ubyte.gz", prefix));
        let labels_url = url_template.replace("{}", &format!("{}-labels-idx1-ubyte.gz", prefix));
        let images = read_idx_images(&fetch_gz(&images_url)?[..])
            .with_context(|| format!("failed to read {}", images_url))?;
        let labels = read_idx_labels(&fetch_gz(&labels_url)?[..])
            .with_context(|| format!("failed to read {}", labels_url))?;
        dataset = dataset.with_split(split, Split::encode(&images, labels)?);
    }
    Ok(dataset)
}

pub fn load_mnist(_config: &Config) -> Result<LoadedDataset> {
    load_idx(MNIST_URL)
}

pub fn load_fashion_mnist(_config: &Config) -> Result<LoadedDataset> {
    load_idx(FASHION_MNIST_URL)
}
