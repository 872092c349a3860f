use thiserror::Error;

// Format and precondition failures. I/O and network errors travel as
// anyhow::Error with context attached at the call site.
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("bad magic number in {what}: expected {expected}, found {found}")]
    BadMagic {
        what: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("{what} is truncated: expected {expected} bytes, found {found}")]
    Truncated {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("cannot view {len} values as shape {shape:?}")]
    Shape { len: usize, shape: Vec<usize> },

    #[error("shape {0:?} has more elements than can be addressed")]
    Oversized(Vec<usize>),

    #[error("split has {images} images but {labels} labels")]
    LengthMismatch { images: usize, labels: usize },

    #[error("archive has no member named {0}")]
    MissingMember(String),

    #[error("MAT file has no variable named {0}")]
    MissingVariable(String),

    #[error("unsupported MAT file content: {0}")]
    UnsupportedMat(String),

    #[error("record {index} failed its {part} checksum")]
    Checksum { index: usize, part: &'static str },

    #[error("cannot encode an image with {0} channels")]
    Channels(usize),
}
