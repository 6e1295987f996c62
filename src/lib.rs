//! Apple Lossless Audio Codec (ALAC) decoder.
//!
//! Decodes ALAC audio packets — adaptive Golomb-Rice entropy coding,
//! inverse adaptive linear prediction and mid/side unmixing — into
//! interleaved little-endian signed PCM, bit-exact with the reference
//! decoder. An MP4/M4A walker locates the ALAC track, its magic cookie and
//! the packet table, and a streaming front end provides incremental
//! reading and seeking.
//!
//! ## Example
//!
//! ```ignore
//! use std::fs::File;
//!
//! let file = File::open("track.m4a")?;
//! let mut stream = alac::StreamDecoder::new(file)?;
//! let format = stream.format();
//!
//! let mut pcm = vec![0u8; 4096];
//! loop {
//!     let n = stream.read(&mut pcm)?;
//!     if n == 0 { break; }
//!     // ... feed pcm[..n] to the audio sink
//! }
//! ```

#![warn(missing_docs)]

pub mod bitstream;
mod decoder;
mod entropy;
pub mod error;
mod matrix;
pub mod mp4;
mod predictor;
mod stream;

pub use bitstream::BitReader;
pub use decoder::PacketDecoder;
pub use error::{AlacError, ConfigError, ContainerError, DecodeError, Result};
pub use stream::{decode, StreamDecoder};

/// Default frames per packet used by the reference encoder.
pub const DEFAULT_FRAME_LENGTH: u32 = 4096;

/// ALACSpecificConfig binary size.
const COOKIE_SIZE: usize = 24;

/// Legacy wrapper atom size: size (4) + type (4) + payload (4).
const WRAPPER_ATOM_SIZE: usize = 12;

/// ALAC decoder configuration, parsed from the magic cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlacConfig {
    /// Nominal samples per packet per channel (typically 4096).
    pub frame_length: u32,
    /// Compatible version; must be 0.
    pub compatible_version: u8,
    /// Sample bit depth: 16, 20, 24 or 32.
    pub bit_depth: u8,
    /// Rice parameter: prediction quantisation base.
    pub pb: u8,
    /// Rice parameter: initial running mean.
    pub mb: u8,
    /// Rice parameter: k upper bound.
    pub kb: u8,
    /// Channel count, 1..=8.
    pub num_channels: u8,
    /// Zero-run cap; carried but not enforced.
    pub max_run: u16,
    /// Upper bound on a packet's compressed size; informational.
    pub max_frame_bytes: u32,
    /// Average bit rate; informational.
    pub avg_bit_rate: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AlacConfig {
    /// Parse an ALACSpecificConfig from a magic cookie.
    ///
    /// The cookie may be wrapped in legacy `frma` and/or `alac` atoms;
    /// both are stripped. Bit-depth and channel-count validation happens
    /// at [`PacketDecoder::new`], so a parsed config can be inspected even
    /// when the decoder would reject it.
    pub fn from_magic_cookie(cookie: &[u8]) -> std::result::Result<Self, ConfigError> {
        let mut data = cookie;

        // Skip 'frma' atom if present: [size:4]['frma'][format:4].
        if data.len() >= WRAPPER_ATOM_SIZE && &data[4..8] == b"frma" {
            data = &data[WRAPPER_ATOM_SIZE..];
        }

        // Skip 'alac' atom header if present: [size:4]['alac'][version:4].
        if data.len() >= WRAPPER_ATOM_SIZE && &data[4..8] == b"alac" {
            data = &data[WRAPPER_ATOM_SIZE..];
        }

        if data.len() < COOKIE_SIZE {
            return Err(ConfigError::InvalidCookie);
        }

        let compatible_version = data[4];
        if compatible_version > 0 {
            return Err(ConfigError::UnsupportedVersion(compatible_version));
        }

        Ok(Self {
            frame_length: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            compatible_version,
            bit_depth: data[5],
            pb: data[6],
            mb: data[7],
            kb: data[8],
            num_channels: data[9],
            max_run: u16::from_be_bytes([data[10], data[11]]),
            max_frame_bytes: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            avg_bit_rate: u32::from_be_bytes([data[16], data[17], data[18], data[19]]),
            sample_rate: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
        })
    }

    /// Serialise back to a bare 24-byte magic cookie.
    pub fn to_magic_cookie(&self) -> Vec<u8> {
        let mut cookie = Vec::with_capacity(COOKIE_SIZE);
        cookie.extend_from_slice(&self.frame_length.to_be_bytes());
        cookie.push(self.compatible_version);
        cookie.push(self.bit_depth);
        cookie.push(self.pb);
        cookie.push(self.mb);
        cookie.push(self.kb);
        cookie.push(self.num_channels);
        cookie.extend_from_slice(&self.max_run.to_be_bytes());
        cookie.extend_from_slice(&self.max_frame_bytes.to_be_bytes());
        cookie.extend_from_slice(&self.avg_bit_rate.to_be_bytes());
        cookie.extend_from_slice(&self.sample_rate.to_be_bytes());
        cookie
    }

    /// Create a config with the reference encoder's default tuning.
    pub fn new(
        sample_rate: u32,
        channels: u8,
        bit_depth: u8,
    ) -> std::result::Result<Self, ConfigError> {
        if !matches!(bit_depth, 16 | 20 | 24 | 32) {
            return Err(ConfigError::UnsupportedBitDepth(bit_depth));
        }
        if channels == 0 || channels > 8 {
            return Err(ConfigError::UnsupportedChannels(channels));
        }

        Ok(Self {
            frame_length: DEFAULT_FRAME_LENGTH,
            compatible_version: 0,
            bit_depth,
            pb: 40,
            mb: 10,
            kb: 14,
            num_channels: channels,
            max_run: 255,
            max_frame_bytes: 0,
            avg_bit_rate: 0,
            sample_rate,
        })
    }
}

/// PCM output description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bit depth: 16, 20, 24 or 32.
    pub bit_depth: u8,
    /// Channel count.
    pub channels: u8,
}

impl PcmFormat {
    /// Bytes per sample for one channel: 2, 3, 3 or 4.
    pub fn bytes_per_sample(&self) -> usize {
        bytes_per_sample(self.bit_depth)
    }

    /// Bytes for one sample across all channels.
    pub fn bytes_per_frame(&self) -> usize {
        usize::from(self.channels) * self.bytes_per_sample()
    }
}

/// Bytes needed to store one sample at `bit_depth`.
///
/// Only ALAC depths are valid; anything else is a programmer error
/// upstream validation has already excluded.
pub(crate) fn bytes_per_sample(bit_depth: u8) -> usize {
    match bit_depth {
        16 => 2,
        20 | 24 => 3,
        32 => 4,
        _ => panic!("unsupported bit depth {bit_depth}"),
    }
}

/// Channel layouts in bitstream (MPEG element) order.
///
/// The decoder emits channels exactly as the bitstream orders them; no
/// remapping is applied at the output boundary. For reference, the layout
/// per channel count is:
///
/// | channels | bitstream order |
/// |----------|------------------------------------|
/// | 1 | C |
/// | 2 | L, R |
/// | 3 | C, L, R |
/// | 4 | C, L, R, Cs |
/// | 5 | C, L, R, Ls, Rs |
/// | 6 | C, L, R, Ls, Rs, LFE |
/// | 7 | C, L, R, Ls, Rs, Cs, LFE |
/// | 8 | C, Lc, Rc, L, R, Ls, Rs, LFE |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    /// Mono: C.
    Mono,
    /// Stereo: L, R.
    Stereo,
    /// 3.0: C, L, R.
    Layout30,
    /// 4.0: C, L, R, Cs.
    Layout40,
    /// 5.0: C, L, R, Ls, Rs.
    Layout50,
    /// 5.1: C, L, R, Ls, Rs, LFE.
    Layout51,
    /// 6.1: C, L, R, Ls, Rs, Cs, LFE.
    Layout61,
    /// 7.1: C, Lc, Rc, L, R, Ls, Rs, LFE.
    Layout71,
}

impl ChannelLayout {
    /// Number of channels in this layout.
    pub fn channel_count(&self) -> u8 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
            Self::Layout30 => 3,
            Self::Layout40 => 4,
            Self::Layout50 => 5,
            Self::Layout51 => 6,
            Self::Layout61 => 7,
            Self::Layout71 => 8,
        }
    }

    /// The layout for a channel count, if within 1..=8.
    pub fn from_channels(channels: u8) -> Option<Self> {
        match channels {
            1 => Some(Self::Mono),
            2 => Some(Self::Stereo),
            3 => Some(Self::Layout30),
            4 => Some(Self::Layout40),
            5 => Some(Self::Layout50),
            6 => Some(Self::Layout51),
            7 => Some(Self::Layout61),
            8 => Some(Self::Layout71),
            _ => None,
        }
    }
}
