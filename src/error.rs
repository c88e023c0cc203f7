use crate::boxes::FourCC;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// A box header could not be read in full. This is distinct from a clean
    /// end of stream, which is not an error.
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: u64 },

    /// Declared size in 2..8: too small to hold a header. The parse loop
    /// treats this as "no more boxes" at the current level; it only escapes
    /// to callers that read a single header directly.
    #[error("box at offset {offset} declares implausible size {size}")]
    ImplausibleSize { offset: u64, size: u64 },

    /// A size-to-end-of-stream box (size32 == 0) on a source without a known
    /// length. Caller contract violation, not a malformed stream.
    #[error("size-to-end box at offset {offset} requires a seekable source of known length")]
    UnseekableSource { offset: u64 },

    #[error("{typ} payload truncated: need {need} bytes, have {have}")]
    TruncatedPayload { typ: FourCC, need: u64, have: u64 },

    #[error(
        "sample {index}: range [{offset}, {offset}+{size}) not located within any raw data region"
    )]
    SampleOutsideMediaData { index: u32, offset: u64, size: u32 },

    /// No per-entry size, no fragment default, no track default.
    #[error("track {track_id}: cannot determine sample size for fragment run")]
    NoSampleSize { track_id: u32 },

    /// The backing store no longer matches what was parsed. Detected
    /// opportunistically when a media-data window is created.
    #[error("backing store changed under media-data region at offset {offset}")]
    BackingStoreChanged { offset: u64 },

    #[error("language code must be three lowercase ASCII letters, got {0:?}")]
    InvalidLanguage(String),

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("string payload has no NUL terminator")]
    MissingNulTerminator,

    #[error("bit reader exhausted")]
    BitsExhausted,

    #[error("exp-golomb code exceeds 32 bits")]
    ExpGolombOverflow,

    #[error("registry mapping: {0}")]
    BadMapping(String),
}

pub type Result<T> = std::result::Result<T, Error>;
