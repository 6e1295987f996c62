//! Streaming decode of an ALAC M4A/MP4 source.
//!
//! The container is parsed once up front; packets are fetched and decoded
//! on demand as the caller drains PCM.

use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

use tracing::debug;

use crate::decoder::PacketDecoder;
use crate::error::{AlacError, Result};
use crate::mp4::{self, SampleInfo};
use crate::{AlacConfig, PcmFormat};

/// Streams decoded PCM from an ALAC M4A/MP4 byte source.
pub struct StreamDecoder<R> {
    reader: R,
    decoder: PacketDecoder,
    samples: Vec<SampleInfo>,
    sample_idx: usize,
    /// Compressed packet staging buffer; grows to the largest packet seen.
    packet_buf: Vec<u8>,

    /// Decoded PCM for the current packet, drained by `read`.
    pcm: Vec<u8>,
    pcm_len: usize,
    pcm_off: usize,

    /// A failure raised after bytes were already copied out; surfaced on
    /// the next call.
    pending: Option<AlacError>,
}

impl<R> std::fmt::Debug for StreamDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("decoder", &self.decoder)
            .field("samples_len", &self.samples.len())
            .field("sample_idx", &self.sample_idx)
            .field("pcm_len", &self.pcm_len)
            .field("pcm_off", &self.pcm_off)
            .field("pending", &self.pending)
            .finish()
    }
}

impl<R: Read + Seek> StreamDecoder<R> {
    /// Open an M4A/MP4 stream containing ALAC audio.
    ///
    /// The container structure is parsed immediately; PCM is decoded
    /// packet-by-packet on demand via [`read`](Self::read).
    pub fn new(mut reader: R) -> Result<Self> {
        let (cookie, samples) = mp4::find_alac_track(&mut reader)?;
        let config = AlacConfig::from_magic_cookie(&cookie)?;
        let decoder = PacketDecoder::new(config)?;
        let format = decoder.format();

        let frame_bytes = decoder.config().frame_length as usize * format.bytes_per_frame();
        debug!(
            sample_rate = format.sample_rate,
            bit_depth = format.bit_depth,
            channels = format.channels,
            packets = samples.len(),
            "opened ALAC stream"
        );

        Ok(Self {
            reader,
            decoder,
            samples,
            sample_idx: 0,
            packet_buf: Vec::new(),
            pcm: vec![0; frame_bytes],
            pcm_len: 0,
            pcm_off: 0,
            pending: None,
        })
    }

    /// The PCM output format.
    pub fn format(&self) -> PcmFormat {
        self.decoder.format()
    }

    /// Total stream duration, from packet count and frame length.
    pub fn duration(&self) -> Duration {
        self.frames_to_duration(self.samples.len() as u64)
    }

    /// Current playback position.
    pub fn position(&self) -> Duration {
        self.frames_to_duration(self.sample_idx as u64)
    }

    /// Seek to a time position. The target is clamped to the stream bounds
    /// and rounded down to a packet boundary; the position actually reached
    /// is returned. Any buffered PCM (and any pending error) is discarded.
    pub fn seek(&mut self, time: Duration) -> Duration {
        let frame_length = u64::from(self.decoder.config().frame_length).max(1);
        let sample_rate = f64::from(self.format().sample_rate);

        let target_frame = (time.as_secs_f64() * sample_rate) as u64;
        let target_packet = ((target_frame / frame_length) as usize).min(self.samples.len());

        self.sample_idx = target_packet;
        self.pcm_len = 0;
        self.pcm_off = 0;
        self.pending = None;

        self.frames_to_duration(target_packet as u64)
    }

    /// Read decoded PCM into `dst`. Returns the byte count copied; `Ok(0)`
    /// signals end of stream. Bytes copied before a mid-stream failure are
    /// delivered first; the error surfaces on the following call.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut total = 0;

        while total < dst.len() {
            // Drain buffered packet data.
            if self.pcm_off < self.pcm_len {
                let n = (dst.len() - total).min(self.pcm_len - self.pcm_off);
                dst[total..total + n]
                    .copy_from_slice(&self.pcm[self.pcm_off..self.pcm_off + n]);
                self.pcm_off += n;
                total += n;
                continue;
            }

            if let Some(err) = self.pending.take() {
                if total > 0 {
                    self.pending = Some(err);
                    break;
                }
                return Err(err);
            }

            if self.sample_idx >= self.samples.len() {
                break;
            }

            match self.decode_next_packet() {
                Ok(()) => {}
                Err(err) if total > 0 => {
                    self.pending = Some(err);
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(total)
    }

    /// Consume the stream decoder and return the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn decode_next_packet(&mut self) -> Result<()> {
        let sample = self.samples[self.sample_idx];
        let size = sample.size as usize;

        if self.packet_buf.len() < size {
            self.packet_buf.resize(size, 0);
        }

        self.reader.seek(SeekFrom::Start(sample.offset))?;
        self.reader.read_exact(&mut self.packet_buf[..size])?;

        let n = self
            .decoder
            .decode_into(&self.packet_buf[..size], &mut self.pcm)?;

        self.pcm_len = n;
        self.pcm_off = 0;
        self.sample_idx += 1;

        Ok(())
    }

    fn frames_to_duration(&self, packets: u64) -> Duration {
        let frame_length = u64::from(self.decoder.config().frame_length);
        let sample_rate = u64::from(self.format().sample_rate.max(1));
        let frames = u128::from(packets) * u128::from(frame_length);

        Duration::from_nanos((frames * 1_000_000_000 / u128::from(sample_rate)) as u64)
    }
}

impl<R: Read + Seek> Read for StreamDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        StreamDecoder::read(self, buf).map_err(std::io::Error::other)
    }
}

/// One-shot decode of an entire ALAC M4A/MP4 stream to interleaved PCM.
pub fn decode<R: Read + Seek>(reader: R) -> Result<(Vec<u8>, PcmFormat)> {
    let mut stream = StreamDecoder::new(reader)?;
    let format = stream.format();

    let frame_bytes = stream.decoder.config().frame_length as usize * format.bytes_per_frame();
    let mut pcm = Vec::new();
    let mut chunk = vec![0u8; frame_bytes.max(4096)];

    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        pcm.extend_from_slice(&chunk[..n]);
    }

    Ok((pcm, format))
}
