use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use prost::Message;
use tracing::info;

use crate::archive::read_sized;
use crate::datasets::Split;
use crate::progress::progress_bar;
use crate::{Label, PrepError};

// The subset of tensorflow/core/example/{example,feature}.proto needed to
// write image/label records. Field tags match the upstream definitions.
pub mod example {
    use std::collections::BTreeMap;

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Example {
        #[prost(message, optional, tag = "1")]
        pub features: Option<Features>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Features {
        // Ordered so that identical records serialize to identical bytes
        #[prost(btree_map = "string, message", tag = "1")]
        pub feature: BTreeMap<String, Feature>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Feature {
        #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
        pub kind: Option<feature::Kind>,
    }

    pub mod feature {
        #[derive(Clone, PartialEq, prost::Oneof)]
        pub enum Kind {
            #[prost(message, tag = "1")]
            BytesList(super::BytesList),
            #[prost(message, tag = "2")]
            FloatList(super::FloatList),
            #[prost(message, tag = "3")]
            Int64List(super::Int64List),
        }
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct BytesList {
        #[prost(bytes = "vec", repeated, tag = "1")]
        pub value: Vec<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct FloatList {
        #[prost(float, repeated, tag = "1")]
        pub value: Vec<f32>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Int64List {
        #[prost(int64, repeated, tag = "1")]
        pub value: Vec<i64>,
    }
}

use example::feature::Kind;
use example::{BytesList, Example, Feature, Features, Int64List};

const MASK_DELTA: u32 = 0xa282_ead8;

// CRC32-C rotated and offset, as TFRecord stores it
pub fn masked_crc(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

// Build the Example holding one encoded image and its label
pub fn image_example(image: &[u8], label: Label) -> Example {
    let mut feature = BTreeMap::new();
    feature.insert(
        "image".to_string(),
        Feature {
            kind: Some(Kind::BytesList(BytesList {
                value: vec![image.to_vec()],
            })),
        },
    );
    feature.insert(
        "label".to_string(),
        Feature {
            kind: Some(Kind::Int64List(Int64List { value: vec![label] })),
        },
    );
    Example {
        features: Some(Features { feature }),
    }
}

// Extract (image, label) from a serialized image Example
pub fn parse_example(payload: &[u8]) -> Result<(Vec<u8>, Label)> {
    let example = Example::decode(payload).context("record is not a tf.train.Example")?;
    let mut features = example.features.unwrap_or_default().feature;
    let image = match features.remove("image").and_then(|feature| feature.kind) {
        Some(Kind::BytesList(list)) if list.value.len() == 1 => list.value.into_iter().next(),
        _ => None,
    };
    let label = match features.remove("label").and_then(|feature| feature.kind) {
        Some(Kind::Int64List(list)) if list.value.len() == 1 => Some(list.value[0]),
        _ => None,
    };
    match (image, label) {
        (Some(image), Some(label)) => Ok((image, label)),
        _ => Err(anyhow!("record lacks a single image and a single label")),
    }
}

// Sequential TFRecord framing over any writer
pub struct TfRecordWriter<W: Write> {
    inner: W,
}

impl TfRecordWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
        Ok(TfRecordWriter::new(BufWriter::new(file)))
    }
}

impl<W: Write> TfRecordWriter<W> {
    pub fn new(inner: W) -> Self {
        TfRecordWriter { inner }
    }

    pub fn write_record(&mut self, payload: &[u8]) -> io::Result<()> {
        let length = (payload.len() as u64).to_le_bytes();
        self.inner.write_all(&length)?;
        self.inner.write_u32::<LittleEndian>(masked_crc(&length))?;
        self.inner.write_all(payload)?;
        self.inner.write_u32::<LittleEndian>(masked_crc(payload))?;
        Ok(())
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

// Reads TFRecord payloads back, checking both checksums of every record
pub struct TfRecordReader<R: Read> {
    inner: R,
    index: usize,
}

impl TfRecordReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
        Ok(TfRecordReader::new(BufReader::new(file)))
    }
}

impl<R: Read> TfRecordReader<R> {
    pub fn new(inner: R) -> Self {
        TfRecordReader { inner, index: 0 }
    }

    fn read_record(&mut self, length: [u8; 8]) -> Result<Vec<u8>> {
        if self.inner.read_u32::<LittleEndian>()? != masked_crc(&length) {
            return Err(PrepError::Checksum {
                index: self.index,
                part: "length",
            }
            .into());
        }
        let what = format!("record {} payload", self.index);
        let payload = read_sized(&mut self.inner, u64::from_le_bytes(length) as usize, &what)?;
        if self.inner.read_u32::<LittleEndian>()? != masked_crc(&payload) {
            return Err(PrepError::Checksum {
                index: self.index,
                part: "payload",
            }
            .into());
        }
        self.index += 1;
        Ok(payload)
    }
}

impl<R: Read> Iterator for TfRecordReader<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        // A clean end of stream can only happen before a length field
        let mut length = [0; 8];
        let mut filled = 0;
        while filled < length.len() {
            match self.inner.read(&mut length[filled..]) {
                Ok(0) if filled == 0 => return None,
                Ok(0) => {
                    return Some(Err(PrepError::Truncated {
                        what: format!("record {} length", self.index),
                        expected: length.len(),
                        found: filled,
                    }
                    .into()))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
        Some(self.read_record(length))
    }
}

// Write every (image, label) pair of a split to one TFRecord file, in order.
// An interrupted write leaves a partial file behind.
pub fn write_split(split: &Split, path: &Path) -> Result<()> {
    if split.images.len() != split.labels.len() {
        return Err(PrepError::LengthMismatch {
            images: split.images.len(),
            labels: split.labels.len(),
        }
        .into());
    }
    info!("Saving dataset: {:?}", path);
    let mut writer = TfRecordWriter::create(path)?;
    let progress = progress_bar(split.len(), "Building records");
    for (image, &label) in split.images.iter().zip(&split.labels) {
        writer
            .write_record(&image_example(image, label).encode_to_vec())
            .with_context(|| format!("failed to write to {:?}", path))?;
        progress.inc(1);
    }
    writer
        .finish()
        .with_context(|| format!("failed to flush {:?}", path))?;
    progress.finish();
    info!("Saved: {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32c_check_value() {
        assert_eq!(crc32c::crc32c(b"123456789"), 0xe306_9283);
    }

    #[test]
    fn test_masked_crc() {
        let crc = crc32c::crc32c(b"");
        assert_eq!(crc, 0);
        assert_eq!(masked_crc(b""), MASK_DELTA);
    }

    #[test]
    fn test_record_framing() {
        let mut writer = TfRecordWriter::new(Vec::new());
        writer.write_record(b"hello").unwrap();
        let bytes = writer.finish().unwrap();
        assert_eq!(bytes.len(), 8 + 4 + 5 + 4);
        assert_eq!(&bytes[0..8], &5u64.to_le_bytes());
        assert_eq!(&bytes[12..17], b"hello");
        assert_eq!(&bytes[17..21], &masked_crc(b"hello").to_le_bytes());
    }

    #[test]
    fn test_reader_round_trip() {
        let mut writer = TfRecordWriter::new(Vec::new());
        writer.write_record(b"first").unwrap();
        writer.write_record(b"").unwrap();
        writer.write_record(&[7; 300]).unwrap();
        let bytes = writer.finish().unwrap();

        let records: Vec<Vec<u8>> = TfRecordReader::new(&bytes[..])
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records, vec![b"first".to_vec(), Vec::new(), vec![7; 300]]);
    }

    #[test]
    fn test_reader_detects_corruption() {
        let mut writer = TfRecordWriter::new(Vec::new());
        writer.write_record(b"first").unwrap();
        writer.write_record(b"second").unwrap();
        let mut bytes = writer.finish().unwrap();
        // Flip a byte of the second payload
        let second_payload = 8 + 4 + 5 + 4 + 8 + 4;
        bytes[second_payload] ^= 0xff;

        let mut reader = TfRecordReader::new(&bytes[..]);
        assert_eq!(reader.next().unwrap().unwrap(), b"first");
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PrepError>(),
            Some(PrepError::Checksum {
                index: 1,
                part: "payload"
            })
        ));
    }

    #[test]
    fn test_reader_truncated_length() {
        let mut writer = TfRecordWriter::new(Vec::new());
        writer.write_record(b"first").unwrap();
        let mut bytes = writer.finish().unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);

        let mut reader = TfRecordReader::new(&bytes[..]);
        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_err());
    }

    #[test]
    fn test_reader_truncated_payload() {
        let mut writer = TfRecordWriter::new(Vec::new());
        writer.write_record(b"a longer payload").unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = TfRecordReader::new(&bytes[..16]);
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PrepError>(),
            Some(PrepError::Truncated {
                expected: 16,
                found: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_example_round_trip() {
        let payload = image_example(b"\x89PNG fake", 7).encode_to_vec();
        let (image, label) = parse_example(&payload).unwrap();
        assert_eq!(image, b"\x89PNG fake");
        assert_eq!(label, 7);
    }

    #[test]
    fn test_parse_example_without_label() {
        let mut example = image_example(b"x", 1);
        if let Some(features) = example.features.as_mut() {
            features.feature.remove("label");
        }
        assert!(parse_example(&example.encode_to_vec()).is_err());
    }

    #[test]
    fn test_write_split_rejects_length_mismatch() {
        let split = Split {
            images: vec![vec![1], vec![2]],
            labels: vec![0],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tfrecord");
        let err = write_split(&split, &path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PrepError>(),
            Some(PrepError::LengthMismatch {
                images: 2,
                labels: 1
            })
        ));
        assert!(!path.exists());
    }
}
