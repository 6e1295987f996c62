//! ALAC decoder error types.

use thiserror::Error;

/// Top-level error type for the ALAC decoder.
#[derive(Debug, Error)]
pub enum AlacError {
    /// Invalid or unsupported ALAC configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Container parsing failed to locate a usable ALAC track.
    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    /// A packet failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// I/O error from the underlying byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid or unsupported magic-cookie configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The magic cookie is too short to hold an ALACSpecificConfig.
    #[error("invalid magic cookie")]
    InvalidCookie,

    /// The cookie declares a compatible version this decoder does not speak.
    #[error("unsupported compatible version: {0}")]
    UnsupportedVersion(u8),

    /// Bit depth outside the ALAC set {16, 20, 24, 32}.
    #[error("unsupported bit depth: {0}")]
    UnsupportedBitDepth(u8),

    /// Channel count outside 1..=8.
    #[error("unsupported channel count: {0}")]
    UnsupportedChannels(u8),
}

/// Failure to locate or parse the ALAC track in an MP4 container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// No track with an `alac` sample entry was found.
    #[error("no ALAC track found in container")]
    NoAlacTrack,

    /// A box declares a size smaller than its own header.
    #[error("invalid box size {size} at offset {offset}")]
    InvalidBoxSize {
        /// File offset of the box header.
        offset: u64,
        /// Declared box size.
        size: u64,
    },

    /// The `alac` sample entry is malformed (no room for a cookie).
    #[error("invalid ALAC sample entry")]
    InvalidSampleEntry,

    /// Neither an `stco` nor a `co64` chunk-offset box is present or readable.
    #[error("missing or invalid chunk offset box (stco/co64)")]
    MissingChunkOffsets,

    /// The `stsc` sample-to-chunk box is missing or malformed.
    #[error("missing or invalid stsc box")]
    InvalidStsc,

    /// The `stsz` sample-size box is missing or malformed.
    #[error("missing or invalid stsz box")]
    InvalidStsz,

    /// I/O failure while walking the container.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-packet decode failure.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Element tag 2 (CCE) or 5 (PCE); ALAC streams never carry these.
    #[error("unsupported element type {0}")]
    UnsupportedElement(u8),

    /// Reserved header bits were nonzero.
    #[error("invalid frame header")]
    InvalidHeader,

    /// The 2-bit `bytes_shifted` field held its invalid value 3.
    #[error("invalid shift value: {0}")]
    InvalidShift(u8),

    /// A read ran past the end of the packet while samples remained.
    #[error("bitstream overrun")]
    BitstreamOverrun,

    /// A sample count or zero run would overflow the frame buffers.
    #[error("sample count exceeds frame buffer")]
    SampleOverrun,

    /// The caller-supplied output buffer cannot hold a full frame.
    #[error("output buffer too small: need {needed} bytes, have {available}")]
    OutputTooSmall {
        /// Bytes required for one full frame.
        needed: usize,
        /// Bytes available in the supplied buffer.
        available: usize,
    },
}

/// Result type alias using [`AlacError`].
pub type Result<T> = std::result::Result<T, AlacError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AlacError::Decode(DecodeError::InvalidShift(3));
        assert_eq!(err.to_string(), "decode error: invalid shift value: 3");
    }

    #[test]
    fn test_category_conversion() {
        let err: AlacError = ConfigError::InvalidCookie.into();
        assert!(matches!(err, AlacError::Config(ConfigError::InvalidCookie)));

        let err: AlacError = ContainerError::NoAlacTrack.into();
        assert!(matches!(
            err,
            AlacError::Container(ContainerError::NoAlacTrack)
        ));
    }

    #[test]
    fn test_output_too_small_display() {
        let err = DecodeError::OutputTooSmall {
            needed: 16384,
            available: 1000,
        };
        assert_eq!(
            err.to_string(),
            "output buffer too small: need 16384 bytes, have 1000"
        );
    }
}
