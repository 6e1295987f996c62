//! ALAC packet decoding: element dispatch and per-channel reconstruction.

use crate::bitstream::BitReader;
use crate::entropy::{self, AgParams};
use crate::error::{ConfigError, DecodeError, Result};
use crate::matrix;
use crate::predictor::{self, MAX_COEFS};
use crate::{bytes_per_sample, AlacConfig, PcmFormat};

// Element type tags from the packet bitstream.
const ELEM_SCE: u8 = 0; // Single Channel Element
const ELEM_CPE: u8 = 1; // Channel Pair Element
const ELEM_CCE: u8 = 2; // Coupling Channel Element (unsupported)
const ELEM_LFE: u8 = 3; // LFE Channel Element
const ELEM_DSE: u8 = 4; // Data Stream Element
const ELEM_PCE: u8 = 5; // Program Config Element (unsupported)
const ELEM_FIL: u8 = 6; // Fill Element
const ELEM_END: u8 = 7; // End of Frame

/// Reserved header bits in SCE/CPE elements; must read as zero.
const UNUSED_HEADER_BITS: u32 = 12;

/// Decodes ALAC packets into interleaved little-endian signed PCM.
///
/// All scratch buffers are allocated once at construction and reused for
/// every packet; the steady-state decode loop performs no allocation.
#[derive(Debug)]
pub struct PacketDecoder {
    config: AlacConfig,
    format: PcmFormat,
    mix_u: Vec<i32>,
    mix_v: Vec<i32>,
    predictor: Vec<i32>,
    shift_buf: Vec<u16>,
    bits: BitReader,
}

impl PacketDecoder {
    /// Create a decoder for the given configuration.
    ///
    /// Rejects bit depths outside {16, 20, 24, 32} and channel counts
    /// outside 1..=8.
    pub fn new(config: AlacConfig) -> Result<Self> {
        if !matches!(config.bit_depth, 16 | 20 | 24 | 32) {
            return Err(ConfigError::UnsupportedBitDepth(config.bit_depth).into());
        }
        if config.num_channels == 0 || config.num_channels > 8 {
            return Err(ConfigError::UnsupportedChannels(config.num_channels).into());
        }

        let frame_len = config.frame_length as usize;
        let format = PcmFormat {
            sample_rate: config.sample_rate,
            bit_depth: config.bit_depth,
            channels: config.num_channels,
        };

        Ok(Self {
            config,
            format,
            mix_u: vec![0; frame_len],
            mix_v: vec![0; frame_len],
            predictor: vec![0; frame_len],
            shift_buf: vec![0; frame_len * 2], // stereo worst case
            bits: BitReader::new(),
        })
    }

    /// The decoder configuration.
    pub fn config(&self) -> &AlacConfig {
        &self.config
    }

    /// The PCM output format.
    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Decode one packet into a freshly allocated PCM buffer.
    pub fn decode_packet(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; self.max_frame_bytes()];
        let n = self.decode_into(packet, &mut output)?;
        output.truncate(n);
        Ok(output)
    }

    /// Decode one packet into `output`, returning the byte count written.
    ///
    /// `output` must have room for a full frame
    /// (`frame_length * num_channels * bytes_per_sample`); packets carrying
    /// fewer samples (partial final frame) write less.
    pub fn decode_into(&mut self, packet: &[u8], output: &mut [u8]) -> Result<usize> {
        let needed = self.max_frame_bytes();
        if output.len() < needed {
            return Err(DecodeError::OutputTooSmall {
                needed,
                available: output.len(),
            }
            .into());
        }

        self.bits.reset(packet);

        let num_chan = self.config.num_channels as usize;
        let mut num_samples = self.config.frame_length;
        let mut chan_idx = 0usize;

        loop {
            if self.bits.past_end() {
                return Err(DecodeError::BitstreamOverrun.into());
            }

            let tag = self.bits.read_small(3);

            match tag {
                ELEM_SCE | ELEM_LFE => {
                    num_samples = self.decode_sce(output, chan_idx, num_samples)?;
                    chan_idx += 1;
                }
                ELEM_CPE => {
                    if chan_idx + 2 > num_chan {
                        break;
                    }
                    num_samples = self.decode_cpe(output, chan_idx, num_samples)?;
                    chan_idx += 2;
                }
                ELEM_CCE | ELEM_PCE => {
                    return Err(DecodeError::UnsupportedElement(tag).into());
                }
                ELEM_DSE => self.skip_dse()?,
                ELEM_FIL => self.skip_fil()?,
                ELEM_END => {
                    self.bits.byte_align();
                    break;
                }
                _ => unreachable!("3-bit element tag"),
            }

            if chan_idx >= num_chan {
                break;
            }
        }

        Ok(num_samples as usize * num_chan * bytes_per_sample(self.config.bit_depth))
    }

    fn max_frame_bytes(&self) -> usize {
        self.config.frame_length as usize
            * self.config.num_channels as usize
            * bytes_per_sample(self.config.bit_depth)
    }

    /// Read the shared SCE/CPE element header. Returns
    /// `(bytes_shifted, escape_flag, num_samples)`.
    fn read_element_header(&mut self, num_samples: u32) -> std::result::Result<(u32, u32, u32), DecodeError> {
        let _instance_tag = self.bits.read_small(4);

        if self.bits.read(UNUSED_HEADER_BITS) != 0 {
            return Err(DecodeError::InvalidHeader);
        }

        let header = self.bits.read(4);
        let partial_frame = header >> 3;
        let bytes_shifted = (header >> 1) & 0x3;
        let escape_flag = header & 0x1;

        if bytes_shifted == 3 {
            return Err(DecodeError::InvalidShift(3));
        }

        let num_samples = if partial_frame != 0 {
            (self.bits.read(16) << 16) | self.bits.read(16)
        } else {
            num_samples
        };

        if num_samples > self.config.frame_length {
            return Err(DecodeError::SampleOverrun);
        }

        Ok((bytes_shifted, escape_flag, num_samples))
    }

    /// Read one channel's predictor metadata:
    /// `(mode, den_shift, pb_factor, coefficient count, coefficients)`.
    fn read_predictor_info(&mut self) -> (u32, u32, u32, usize, [i16; MAX_COEFS]) {
        let header = self.bits.read(8);
        let mode = header >> 4;
        let den_shift = header & 0xf;

        let header = self.bits.read(8);
        let pb_factor = header >> 5;
        let num_coefs = (header & 0x1f) as usize;

        let mut coefs = [0i16; MAX_COEFS];
        for coef in coefs.iter_mut().take(num_coefs) {
            *coef = self.bits.read(16) as i16;
        }

        (mode, den_shift, pb_factor, num_coefs, coefs)
    }

    /// Decode a Single Channel Element (or LFE, which is identical).
    fn decode_sce(
        &mut self,
        output: &mut [u8],
        chan_idx: usize,
        num_samples: u32,
    ) -> Result<u32> {
        let (mut bytes_shifted, escape_flag, num_samples) =
            self.read_element_header(num_samples)?;
        let chan_bits = u32::from(self.config.bit_depth) - bytes_shifted * 8;
        let samples = num_samples as usize;

        if escape_flag == 0 {
            self.decode_channel_compressed(chan_bits, bytes_shifted, samples, false)?;
        } else {
            self.read_escape_samples(chan_bits, samples, false);
            bytes_shifted = 0;
        }

        let num_chan = self.config.num_channels as usize;
        match self.config.bit_depth {
            16 => matrix::write_mono_16(output, &self.mix_u, chan_idx, num_chan, samples),
            20 => matrix::write_mono_20(output, &self.mix_u, chan_idx, num_chan, samples),
            24 => matrix::write_mono_24(
                output,
                &self.mix_u,
                chan_idx,
                num_chan,
                samples,
                &self.shift_buf,
                bytes_shifted,
            ),
            32 => matrix::write_mono_32(
                output,
                &self.mix_u,
                chan_idx,
                num_chan,
                samples,
                &self.shift_buf,
                bytes_shifted,
            ),
            _ => unreachable!("bit depth validated at construction"),
        }

        Ok(num_samples)
    }

    /// Decode a Channel Pair Element (stereo).
    fn decode_cpe(
        &mut self,
        output: &mut [u8],
        chan_idx: usize,
        num_samples: u32,
    ) -> Result<u32> {
        let (mut bytes_shifted, escape_flag, num_samples) =
            self.read_element_header(num_samples)?;
        // One extra bit carries the decorrelation headroom.
        let mut chan_bits = u32::from(self.config.bit_depth) - bytes_shifted * 8 + 1;
        let samples = num_samples as usize;

        let mut mix_bits = 0i32;
        let mut mix_res = 0i32;

        if escape_flag == 0 {
            mix_bits = self.bits.read(8) as i32;
            mix_res = i32::from(self.bits.read(8) as i8);
            self.decode_channel_compressed(chan_bits, bytes_shifted, samples, true)?;
        } else {
            chan_bits = u32::from(self.config.bit_depth);
            self.read_escape_samples(chan_bits, samples, true);
            bytes_shifted = 0;
        }

        let num_chan = self.config.num_channels as usize;
        match self.config.bit_depth {
            16 => matrix::write_stereo_16(
                output, &self.mix_u, &self.mix_v, chan_idx, num_chan, samples, mix_bits, mix_res,
            ),
            20 => matrix::write_stereo_20(
                output, &self.mix_u, &self.mix_v, chan_idx, num_chan, samples, mix_bits, mix_res,
            ),
            24 => matrix::write_stereo_24(
                output,
                &self.mix_u,
                &self.mix_v,
                chan_idx,
                num_chan,
                samples,
                mix_bits,
                mix_res,
                &self.shift_buf,
                bytes_shifted,
            ),
            32 => matrix::write_stereo_32(
                output,
                &self.mix_u,
                &self.mix_v,
                chan_idx,
                num_chan,
                samples,
                mix_bits,
                mix_res,
                &self.shift_buf,
                bytes_shifted,
            ),
            _ => unreachable!("bit depth validated at construction"),
        }

        Ok(num_samples)
    }

    /// Decode the compressed payload for one element: predictor metadata,
    /// deferred shift bits, entropy block(s) and inverse prediction. For a
    /// pair element (`stereo`) the U and V channels are decoded back to back
    /// and the shift buffer is interleaved.
    fn decode_channel_compressed(
        &mut self,
        chan_bits: u32,
        bytes_shifted: u32,
        num_samples: usize,
        stereo: bool,
    ) -> Result<()> {
        if !stereo {
            // Mono elements carry the two mix bytes as padding.
            let _mix_bits = self.bits.read(8);
            let _mix_res = self.bits.read(8);
        }

        let (mode_u, den_shift_u, pb_factor_u, num_u, mut coefs_u) = self.read_predictor_info();
        let (mode_v, den_shift_v, pb_factor_v, num_v, mut coefs_v) = if stereo {
            self.read_predictor_info()
        } else {
            (0, 0, 0, 0, [0i16; MAX_COEFS])
        };

        // The stripped low-order bits sit between the headers and the
        // entropy data: remember where they start, skip past, read later.
        let channels = if stereo { 2 } else { 1 };
        let shift_start = if bytes_shifted != 0 {
            let saved = self.bits.position();
            self.bits.advance(
                (bytes_shifted * 8 * channels).saturating_mul(num_samples as u32),
            );
            Some(saved)
        } else {
            None
        };

        let pb = u32::from(self.config.pb);
        let mb = u32::from(self.config.mb);
        let kb = u32::from(self.config.kb);
        let max_run = u32::from(self.config.max_run);
        let n = num_samples as u32;

        let ag = AgParams::new(mb, (pb * pb_factor_u) / 4, kb, n, n, max_run);
        entropy::dyn_decomp(&ag, &mut self.bits, &mut self.predictor, num_samples, chan_bits)?;

        if mode_u != 0 {
            predictor::delta_decode(&mut self.predictor, num_samples, chan_bits);
        }
        predictor::unpc_block(
            &self.predictor,
            &mut self.mix_u,
            num_samples,
            &mut coefs_u[..num_u],
            num_u as u32,
            chan_bits,
            den_shift_u,
        );

        if stereo {
            let ag = AgParams::new(mb, (pb * pb_factor_v) / 4, kb, n, n, max_run);
            entropy::dyn_decomp(&ag, &mut self.bits, &mut self.predictor, num_samples, chan_bits)?;

            if mode_v != 0 {
                predictor::delta_decode(&mut self.predictor, num_samples, chan_bits);
            }
            predictor::unpc_block(
                &self.predictor,
                &mut self.mix_v,
                num_samples,
                &mut coefs_v[..num_v],
                num_v as u32,
                chan_bits,
                den_shift_v,
            );
        }

        if let Some(saved) = shift_start {
            let resume = self.bits.position();
            self.bits.restore(saved);

            let shift = bytes_shifted * 8;
            for idx in 0..num_samples * channels as usize {
                self.shift_buf[idx] = self.bits.read(shift) as u16;
            }

            self.bits.restore(resume);
        }

        Ok(())
    }

    /// Read raw sign-extended samples for an escaped (uncompressed) element.
    /// Stereo elements interleave one U and one V sample per step.
    fn read_escape_samples(&mut self, chan_bits: u32, num_samples: usize, stereo: bool) {
        // Capped at 31: a zero-width channel only ever shifts zeros.
        let shift = 32u32.saturating_sub(chan_bits).min(31);

        if chan_bits <= 16 {
            for idx in 0..num_samples {
                let val = (self.bits.read(chan_bits) as i32) << shift >> shift;
                self.mix_u[idx] = val;

                if stereo {
                    let val = (self.bits.read(chan_bits) as i32) << shift >> shift;
                    self.mix_v[idx] = val;
                }
            }
        } else {
            let extra_bits = chan_bits - 16;

            for idx in 0..num_samples {
                let mut val = ((self.bits.read(16) as i32) << 16) >> shift;
                val |= self.bits.read(extra_bits) as i32;
                self.mix_u[idx] = val;

                if stereo {
                    let mut val = ((self.bits.read(16) as i32) << 16) >> shift;
                    val |= self.bits.read(extra_bits) as i32;
                    self.mix_v[idx] = val;
                }
            }
        }
    }

    /// Skip a Fill Element.
    fn skip_fil(&mut self) -> std::result::Result<(), DecodeError> {
        let mut count = u32::from(self.bits.read_small(4));
        if count == 15 {
            count += u32::from(self.bits.read_small(8));
            count -= 1;
        }

        self.bits.advance(count * 8);

        if self.bits.past_end() {
            return Err(DecodeError::BitstreamOverrun);
        }
        Ok(())
    }

    /// Skip a Data Stream Element.
    fn skip_dse(&mut self) -> std::result::Result<(), DecodeError> {
        let _instance_tag = self.bits.read_small(4);
        let data_byte_align_flag = self.bits.read_one();

        let mut count = u32::from(self.bits.read_small(8));
        if count == 255 {
            count += u32::from(self.bits.read_small(8));
        }

        if data_byte_align_flag != 0 {
            self.bits.byte_align();
        }

        self.bits.advance(count * 8);

        if self.bits.past_end() {
            return Err(DecodeError::BitstreamOverrun);
        }
        Ok(())
    }
}
