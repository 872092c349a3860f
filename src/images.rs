use anyhow::{anyhow, Result};
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, ImageFormat};
use indicatif::ProgressBar;
use ndarray::{Array3, Array4, ArrayView3, Axis};

use crate::progress::progress_bar;
use crate::PrepError;

// A batch of raw images in (batch, height, width, channel) axis order. The
// array may be a permuted view over a dataset's native layout; each image is
// only made contiguous while it is being encoded.
#[derive(Debug, Clone)]
pub struct ImageBatch {
    pixels: Array4<u8>,
}

impl ImageBatch {
    pub fn new(pixels: Array4<u8>) -> Self {
        ImageBatch { pixels }
    }

    // Wrap a buffer that is already laid out as N x H x W x C
    pub fn from_nhwc(
        data: Vec<u8>,
        count: usize,
        height: usize,
        width: usize,
        channels: usize,
    ) -> Result<Self, PrepError> {
        let len = data.len();
        Array4::from_shape_vec((count, height, width, channels), data)
            .map(ImageBatch::new)
            .map_err(|_| PrepError::Shape {
                len,
                shape: vec![count, height, width, channels],
            })
    }

    pub fn len(&self) -> usize {
        self.pixels.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // (height, width, channels) of every image in the batch
    pub fn image_shape(&self) -> (usize, usize, usize) {
        let (_, height, width, channels) = self.pixels.dim();
        (height, width, channels)
    }

    pub fn image(&self, index: usize) -> ArrayView3<'_, u8> {
        self.pixels.index_axis(Axis(0), index)
    }
}

// Encode one H x W x C image as PNG
pub fn encode_image(image: ArrayView3<u8>) -> Result<Vec<u8>> {
    let (height, width, channels) = image.dim();
    let color = match channels {
        1 => ExtendedColorType::L8,
        2 => ExtendedColorType::La8,
        3 => ExtendedColorType::Rgb8,
        4 => ExtendedColorType::Rgba8,
        n => return Err(PrepError::Channels(n).into()),
    };
    // Logical iteration order is row-major whatever the memory layout is
    let raw: Vec<u8> = image.iter().copied().collect();
    let mut png = Vec::new();
    PngEncoder::new(&mut png).write_image(&raw, width as u32, height as u32, color)?;
    Ok(png)
}

// Decode a PNG produced by encode_image back into an H x W x C array
pub fn decode_png(bytes: &[u8]) -> Result<Array3<u8>> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
    let (width, height) = (image.width() as usize, image.height() as usize);
    let (channels, raw) = match image {
        DynamicImage::ImageLuma8(buffer) => (1, buffer.into_raw()),
        DynamicImage::ImageLumaA8(buffer) => (2, buffer.into_raw()),
        DynamicImage::ImageRgb8(buffer) => (3, buffer.into_raw()),
        DynamicImage::ImageRgba8(buffer) => (4, buffer.into_raw()),
        other => return Err(anyhow!("unsupported PNG color type {:?}", other.color())),
    };
    Ok(Array3::from_shape_vec((height, width, channels), raw)?)
}

// Lazily encodes a batch one image at a time, in index order, advancing the
// progress bar once per image.
pub struct PngEncoding<'a> {
    batch: &'a ImageBatch,
    next: usize,
    progress: ProgressBar,
}

impl PngEncoding<'_> {
    // Number of images encoded so far
    pub fn position(&self) -> usize {
        self.next
    }
}

impl Iterator for PngEncoding<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.batch.len() {
            self.progress.finish_and_clear();
            return None;
        }
        let encoded = encode_image(self.batch.image(self.next));
        self.next += 1;
        self.progress.inc(1);
        Some(encoded)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.batch.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PngEncoding<'_> {}

pub fn encode_png(batch: &ImageBatch, progress: ProgressBar) -> PngEncoding<'_> {
    progress.set_length(batch.len() as u64);
    PngEncoding {
        batch,
        next: 0,
        progress,
    }
}

// Encode a whole batch, failing on the first image that cannot be encoded
pub fn encode_all(batch: &ImageBatch) -> Result<Vec<Vec<u8>>> {
    encode_png(batch, progress_bar(batch.len(), "PNG Encoding")).collect()
}
