// Reader for the numeric arrays of MATLAB level 5 MAT files (the format
// scipy.io.loadmat reads by default). Cell, struct, char and sparse variables
// are skipped. Arrays keep MATLAB's column-major element order.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use tracing::debug;

use crate::archive::read_sized;
use crate::PrepError;

const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;

// mxDOUBLE_CLASS through mxUINT64_CLASS
const NUMERIC_CLASSES: std::ops::RangeInclusive<u32> = 6..=15;
const COMPLEX_FLAG: u32 = 0x0800;

const HEADER_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq)]
enum Numbers {
    U8(Vec<u8>),
    I64(Vec<i64>),
    F64(Vec<f64>),
}

impl Numbers {
    fn len(&self) -> usize {
        match self {
            Numbers::U8(v) => v.len(),
            Numbers::I64(v) => v.len(),
            Numbers::F64(v) => v.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatArray {
    pub name: String,
    pub dims: Vec<usize>,
    data: Numbers,
}

impl MatArray {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Elements as bytes. Wider types must hold integral values in 0..=255.
    pub fn into_u8(self) -> Result<Vec<u8>, PrepError> {
        let out_of_range = |name: &str| {
            PrepError::UnsupportedMat(format!("{} holds values that are not bytes", name))
        };
        match self.data {
            Numbers::U8(v) => Ok(v),
            Numbers::I64(v) => v
                .into_iter()
                .map(|x| u8::try_from(x).map_err(|_| out_of_range(&self.name)))
                .collect(),
            Numbers::F64(v) => v
                .into_iter()
                .map(|x| {
                    if x.fract() == 0.0 && (0.0..=255.0).contains(&x) {
                        Ok(x as u8)
                    } else {
                        Err(out_of_range(&self.name))
                    }
                })
                .collect(),
        }
    }

    // Elements as integers. Floating point data must be integral.
    pub fn to_i64(&self) -> Result<Vec<i64>, PrepError> {
        match &self.data {
            Numbers::U8(v) => Ok(v.iter().map(|&x| x as i64).collect()),
            Numbers::I64(v) => Ok(v.clone()),
            Numbers::F64(v) => v
                .iter()
                .map(|&x| {
                    if x.fract() == 0.0 && x.abs() < 2f64.powi(53) {
                        Ok(x as i64)
                    } else {
                        Err(PrepError::UnsupportedMat(format!(
                            "{} holds non-integral value {}",
                            self.name, x
                        )))
                    }
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatFile {
    arrays: Vec<MatArray>,
}

impl MatFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
        MatFile::read(BufReader::new(file)).with_context(|| format!("failed to parse {:?}", path))
    }

    pub fn read(mut reader: impl Read) -> Result<Self> {
        let mut header = [0; HEADER_LEN];
        reader.read_exact(&mut header).context("MAT file header")?;
        // The endian indicator is the two characters "MI" written as a u16
        let arrays = match &header[126..128] {
            b"IM" => read_arrays::<LittleEndian>(&mut reader)?,
            b"MI" => read_arrays::<BigEndian>(&mut reader)?,
            _ => {
                return Err(PrepError::UnsupportedMat("not a level 5 MAT file".to_string()).into())
            }
        };
        Ok(MatFile { arrays })
    }

    pub fn arrays(&self) -> &[MatArray] {
        &self.arrays
    }

    pub fn get(&self, name: &str) -> Option<&MatArray> {
        self.arrays.iter().find(|array| array.name == name)
    }

    // Move a variable out of the file
    pub fn take(&mut self, name: &str) -> Result<MatArray, PrepError> {
        let index = self
            .arrays
            .iter()
            .position(|array| array.name == name)
            .ok_or_else(|| PrepError::MissingVariable(name.to_string()))?;
        Ok(self.arrays.swap_remove(index))
    }
}

struct Tag {
    data_type: u32,
    size: usize,
    // Small data element: up to 4 bytes packed into the tag itself
    small: bool,
}

impl Tag {
    fn padding(&self) -> usize {
        if self.small {
            4 - self.size
        } else {
            (8 - self.size % 8) % 8
        }
    }
}

// Read a tag, returning None on a clean end of stream
fn read_tag<B: ByteOrder>(reader: &mut impl Read) -> Result<Option<Tag>> {
    let mut first = [0; 4];
    let mut filled = 0;
    while filled < first.len() {
        match reader.read(&mut first[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(PrepError::Truncated {
                    what: "MAT element tag".to_string(),
                    expected: 4,
                    found: filled,
                }
                .into())
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    let word = B::read_u32(&first);
    if word >> 16 != 0 {
        let size = (word >> 16) as usize;
        if size > 4 {
            return Err(PrepError::UnsupportedMat(format!("small element of {} bytes", size)).into());
        }
        return Ok(Some(Tag {
            data_type: word & 0xffff,
            size,
            small: true,
        }));
    }
    let size = reader.read_u32::<B>()? as usize;
    Ok(Some(Tag {
        data_type: word,
        size,
        small: false,
    }))
}

fn skip(reader: &mut impl Read, len: usize) -> io::Result<()> {
    let copied = io::copy(&mut (&mut *reader).take(len as u64), &mut io::sink())?;
    if copied < len as u64 {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

// Read one complete element, dropping its padding
fn read_element<B: ByteOrder>(reader: &mut impl Read) -> Result<(u32, Vec<u8>)> {
    let tag = read_tag::<B>(reader)?.ok_or_else(|| PrepError::Truncated {
        what: "MAT array".to_string(),
        expected: 8,
        found: 0,
    })?;
    let data = read_sized(reader, tag.size, "MAT element")?;
    skip(reader, tag.padding())?;
    Ok((tag.data_type, data))
}

fn read_arrays<B: ByteOrder>(reader: &mut impl Read) -> Result<Vec<MatArray>> {
    let mut arrays = Vec::new();
    while let Some(tag) = read_tag::<B>(reader)? {
        let mut body = (&mut *reader).take(tag.size as u64);
        match tag.data_type {
            MI_COMPRESSED => {
                let mut inflated = ZlibDecoder::new(body);
                if let Some(inner) = read_tag::<B>(&mut inflated)? {
                    if inner.data_type == MI_MATRIX && inner.size > 0 {
                        arrays.extend(read_matrix::<B>(&mut inflated)?);
                    }
                }
                // Compressed elements carry no padding
                body = inflated.into_inner();
                io::copy(&mut body, &mut io::sink())?;
            }
            MI_MATRIX => {
                if tag.size > 0 {
                    arrays.extend(read_matrix::<B>(&mut body)?);
                }
                io::copy(&mut body, &mut io::sink())?;
                skip(reader, tag.padding())?;
            }
            other => {
                debug!("Skipping MAT element of type {}", other);
                io::copy(&mut body, &mut io::sink())?;
                skip(reader, tag.padding())?;
            }
        }
    }
    Ok(arrays)
}

// Parse the sub-elements of a miMATRIX. Returns None for non-numeric classes;
// the caller drains whatever is left of the element.
fn read_matrix<B: ByteOrder>(reader: &mut impl Read) -> Result<Option<MatArray>> {
    let (_, flags) = read_element::<B>(reader)?;
    if flags.len() < 4 {
        return Err(PrepError::UnsupportedMat("short array flags".to_string()).into());
    }
    let flags = B::read_u32(&flags[..4]);
    let class = flags & 0xff;

    let (_, dims) = read_element::<B>(reader)?;
    let dims: Vec<usize> = dims
        .chunks_exact(4)
        .map(|chunk| B::read_i32(chunk).max(0) as usize)
        .collect();

    let (_, name) = read_element::<B>(reader)?;
    let name = String::from_utf8_lossy(&name).into_owned();

    if !NUMERIC_CLASSES.contains(&class) {
        debug!("Skipping non-numeric MAT variable {} (class {})", name, class);
        return Ok(None);
    }
    if flags & COMPLEX_FLAG != 0 {
        return Err(PrepError::UnsupportedMat(format!("{} is complex", name)).into());
    }

    let (data_type, bytes) = read_element::<B>(reader)?;
    let data = decode_numbers::<B>(data_type, bytes)?;
    let expected = dims
        .iter()
        .try_fold(1usize, |total, &dim| total.checked_mul(dim))
        .ok_or_else(|| PrepError::Oversized(dims.clone()))?;
    if data.len() != expected {
        return Err(PrepError::Shape {
            len: data.len(),
            shape: dims,
        }
        .into());
    }
    debug!("Read MAT variable {} with shape {:?}", name, dims);
    Ok(Some(MatArray { name, dims, data }))
}

fn decode_numbers<B: ByteOrder>(data_type: u32, bytes: Vec<u8>) -> Result<Numbers, PrepError> {
    let width = match data_type {
        MI_INT8 | MI_UINT8 => 1,
        MI_INT16 | MI_UINT16 => 2,
        MI_INT32 | MI_UINT32 | MI_SINGLE => 4,
        MI_INT64 | MI_UINT64 | MI_DOUBLE => 8,
        other => return Err(PrepError::UnsupportedMat(format!("numeric data of type {}", other))),
    };
    if bytes.len() % width != 0 {
        return Err(PrepError::Truncated {
            what: "MAT numeric data".to_string(),
            expected: bytes.len() / width * width + width,
            found: bytes.len(),
        });
    }
    if data_type == MI_UINT8 {
        return Ok(Numbers::U8(bytes));
    }
    let chunks = bytes.chunks_exact(width);
    Ok(match data_type {
        MI_INT8 => Numbers::I64(bytes.iter().map(|&b| b as i8 as i64).collect()),
        MI_INT16 => Numbers::I64(chunks.map(|c| B::read_i16(c) as i64).collect()),
        MI_UINT16 => Numbers::I64(chunks.map(|c| B::read_u16(c) as i64).collect()),
        MI_INT32 => Numbers::I64(chunks.map(|c| B::read_i32(c) as i64).collect()),
        MI_UINT32 => Numbers::I64(chunks.map(|c| B::read_u32(c) as i64).collect()),
        MI_INT64 => Numbers::I64(chunks.map(B::read_i64).collect()),
        MI_UINT64 => Numbers::I64(
            chunks
                .map(|c| i64::try_from(B::read_u64(c)))
                .collect::<Result<_, _>>()
                .map_err(|_| PrepError::UnsupportedMat("uint64 value out of range".to_string()))?,
        ),
        MI_SINGLE => Numbers::F64(chunks.map(|c| B::read_f32(c) as f64).collect()),
        _ => Numbers::F64(chunks.map(B::read_f64).collect()),
    })
}
