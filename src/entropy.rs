//! Adaptive Golomb-Rice entropy decoding of prediction residuals.
//!
//! The per-sample loop keeps a running mean in Q9, derives the Rice
//! parameter `k` from it, and drops into a zero-run mode whenever the mean
//! decays below the quantisation threshold. Bit reads happen against the
//! reader's padded buffer through a local bit cursor; the consumed count is
//! committed back to the reader once the block decodes cleanly.

use crate::bitstream::BitReader;
use crate::error::DecodeError;

const QB_SHIFT: u32 = 9;
const QUANT_BITS: u32 = 1 << QB_SHIFT; // 512
const MMUL_SHIFT: u32 = 2;
const MDEN_SHIFT: u32 = QB_SHIFT - MMUL_SHIFT - 1; // 6
const MOFF: u32 = 1 << (MDEN_SHIFT - 2); // 16
const BIT_OFF: i32 = 24;
const MAX_PREFIX_16: u32 = 9;
const MAX_PREFIX_32: u32 = 9;
const MAX_DATATYPE_16: u32 = 16;
const N_MAX_MEAN_CLAMP: u32 = 0xffff;
const N_MEAN_CLAMP_VAL: u32 = 0xffff;

/// Zero runs at or above this length do not arm `zmode` for the next sample.
const MAX_ZERO_RUN: u32 = 65535;

/// Adaptive Golomb-Rice codec state.
///
/// Mirrors the reference codec's parameter block; fields the decode path
/// does not consult (`qb`, the windows, `max_run`) are still carried.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub(crate) struct AgParams {
    mb: u32,
    mb0: u32,
    pb: u32,
    kb: u32,
    wb: u32,
    qb: u32,
    fw: u32,
    sw: u32,
    max_run: u32,
}

impl AgParams {
    /// Initialise the adaptation parameters for one channel of one frame.
    pub(crate) fn new(
        mean_base: u32,
        part_bound: u32,
        k_base: u32,
        frame_win: u32,
        sample_win: u32,
        max_run: u32,
    ) -> Self {
        Self {
            mb: mean_base,
            mb0: mean_base,
            pb: part_bound,
            kb: k_base,
            wb: (1u32.checked_shl(k_base).unwrap_or(0)).wrapping_sub(1),
            qb: QUANT_BITS.wrapping_sub(part_bound),
            fw: frame_win,
            sw: sample_win,
            max_run,
        }
    }
}

/// floor(log2(x + 3)).
#[inline]
fn lg3a(x: u32) -> u32 {
    31 - x.wrapping_add(3).leading_zeros()
}

/// Right shift with the reference's modulo-free semantics: counts of 32 or
/// more yield zero instead of faulting.
#[inline]
fn shr32(value: u32, count: u32) -> u32 {
    value.checked_shr(count).unwrap_or(0)
}

/// Big-endian 32-bit load. Callers must guarantee `offset + 4 <= buf.len()`;
/// the loop-top bound check plus the reader's tail pad establish this on the
/// hot path.
#[inline]
fn load_be32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

#[inline]
fn byte_at(buf: &[u8], offset: usize) -> u32 {
    buf.get(offset).map_or(0, |&b| u32::from(b))
}

/// Bounds-tolerant variant of [`load_be32`] for reads that may land past
/// the pad (escape codes and run lengths near the end of a packet).
#[inline]
fn load_be32_safe(buf: &[u8], offset: usize) -> u32 {
    (byte_at(buf, offset) << 24)
        | (byte_at(buf, offset + 1) << 16)
        | (byte_at(buf, offset + 2) << 8)
        | byte_at(buf, offset + 3)
}

/// Read up to 32 bits from an arbitrary bit position in `input`.
fn stream_bits(input: &[u8], bit_offset: u32, num_bits: u32) -> u32 {
    let byte_offset = (bit_offset >> 3) as usize;
    let load1 = load_be32_safe(input, byte_offset);

    if num_bits + (bit_offset & 7) > 32 {
        // The field spills into a fifth byte.
        let mut result = load1 << (bit_offset & 7);
        let load2_shift = 8 - (num_bits + (bit_offset & 7) - 32);
        let load2 = byte_at(input, byte_offset + 4) >> load2_shift;
        result = shr32(result, 32u32.wrapping_sub(num_bits));

        return result | load2;
    }

    let result = shr32(load1, 32u32.wrapping_sub(num_bits) - (bit_offset & 7));
    if num_bits < 32 {
        result & (1u32 << num_bits).wrapping_sub(1)
    } else {
        result
    }
}

/// Decode one Golomb-coded value (16-bit variant, used for zero-run
/// lengths). Returns the value and the updated bit position.
fn dyn_get(input: &[u8], bit_pos: u32, golomb_m: u32, golomb_k: u32) -> (u32, u32) {
    let mut pos = bit_pos;
    let mut stream = load_be32_safe(input, (pos >> 3) as usize) << (pos & 7);

    let mut pre = (!stream).leading_zeros();

    if pre >= MAX_PREFIX_16 {
        pre = MAX_PREFIX_16;
        pos = pos.wrapping_add(pre);
        stream <<= pre;
        let result = stream >> (32 - MAX_DATATYPE_16);

        return (result, pos.wrapping_add(MAX_DATATYPE_16));
    }

    pos = pos.wrapping_add(pre + 1);
    stream <<= pre + 1;
    let val = shr32(stream, 32u32.wrapping_sub(golomb_k));
    pos = pos.wrapping_add(golomb_k);

    if val < 2 {
        (pre.wrapping_mul(golomb_m), pos.wrapping_sub(1))
    } else {
        (
            pre.wrapping_mul(golomb_m).wrapping_add(val).wrapping_sub(1),
            pos,
        )
    }
}

/// Entropy-decode `num_samples` prediction residuals into `out`.
///
/// `max_escape_bits` is the raw width used when a unary prefix saturates
/// (the per-channel bit width). The bit reader advances past the coded
/// block on success; on failure its position is unspecified and the packet
/// is abandoned.
pub(crate) fn dyn_decomp(
    params: &AgParams,
    bits: &mut BitReader,
    out: &mut [i32],
    num_samples: usize,
    max_escape_bits: u32,
) -> Result<(), DecodeError> {
    debug_assert!(out.len() >= num_samples);

    let start_pos = bits.bit_offset();
    let max_pos = bits.remaining_bits();

    let mut bit_pos = start_pos;
    let mut mean_accum = params.mb0;
    let mut zmode = 0u32;
    let mut count = 0usize;

    let pb = params.pb;
    let kb = params.kb;
    let wb = params.wb;

    {
        let input = bits.remaining_padded();

        while count < num_samples {
            if bit_pos >= max_pos {
                return Err(DecodeError::BitstreamOverrun);
            }

            let m = mean_accum >> QB_SHIFT;
            let k = lg3a(m).min(kb);
            let m_mask = (1u32 << k).wrapping_sub(1);

            let mut stream = load_be32(input, (bit_pos >> 3) as usize) << (bit_pos & 7);
            let mut residual = (!stream).leading_zeros();

            if residual >= MAX_PREFIX_32 {
                residual = stream_bits(input, bit_pos.wrapping_add(MAX_PREFIX_32), max_escape_bits);
                bit_pos = bit_pos.wrapping_add(MAX_PREFIX_32 + max_escape_bits);
            } else {
                bit_pos = bit_pos.wrapping_add(residual + 1);

                if k != 1 {
                    stream <<= residual + 1;
                    let v = shr32(stream, 32u32.wrapping_sub(k));

                    if v >= 2 {
                        residual = residual.wrapping_mul(m_mask).wrapping_add(v).wrapping_sub(1);
                        bit_pos = bit_pos.wrapping_add(k);
                    } else {
                        residual = residual.wrapping_mul(m_mask);
                        bit_pos = bit_pos.wrapping_add(k).wrapping_sub(1);
                    }
                }
            }

            // Sign lives in the LSB of the folded value.
            let ndecode = residual.wrapping_add(zmode);
            let multiplier = -((ndecode & 1) as i32) | 1;
            out[count] = ((ndecode.wrapping_add(1) >> 1) as i32).wrapping_mul(multiplier);
            count += 1;

            mean_accum = pb
                .wrapping_mul(residual.wrapping_add(zmode))
                .wrapping_add(mean_accum)
                .wrapping_sub(pb.wrapping_mul(mean_accum) >> QB_SHIFT);
            if residual > N_MAX_MEAN_CLAMP {
                mean_accum = N_MEAN_CLAMP_VAL;
            }

            zmode = 0;

            if (mean_accum << MMUL_SHIFT) < QUANT_BITS && count < num_samples {
                zmode = 1;

                let k32 = (mean_accum.leading_zeros() as i32 - BIT_OFF
                    + (mean_accum.wrapping_add(MOFF) >> MDEN_SHIFT) as i32)
                    .max(0) as u32;
                let mz = (1u32.checked_shl(k32).unwrap_or(0)).wrapping_sub(1) & wb;

                let (run, new_pos) = dyn_get(input, bit_pos, mz, k32);
                bit_pos = new_pos;

                let end = count + run as usize;
                if end > num_samples {
                    return Err(DecodeError::SampleOverrun);
                }

                out[count..end].fill(0);
                count = end;

                if run >= MAX_ZERO_RUN {
                    zmode = 0;
                }

                mean_accum = 0;
            }
        }
    }

    bits.advance(bit_pos.wrapping_sub(start_pos));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(mb: u32, pb: u32, kb: u32, n: u32) -> AgParams {
        AgParams::new(mb, pb, kb, n, n, 255)
    }

    fn reader(data: &[u8]) -> BitReader {
        let mut r = BitReader::new();
        r.reset(data);
        r
    }

    /// Pack an ASCII bit string ('0'/'1', spaces ignored) MSB-first.
    fn pack(bits: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let mut acc = 0u8;
        let mut n = 0;
        for c in bits.chars().filter(|c| !c.is_whitespace()) {
            acc = (acc << 1) | u8::from(c == '1');
            n += 1;
            if n == 8 {
                out.push(acc);
                acc = 0;
                n = 0;
            }
        }
        if n > 0 {
            out.push(acc << (8 - n));
        }
        out
    }

    #[test]
    fn test_single_prefix_coded_residual() {
        // mean base 10 => m = 0 => k = 1: the value is the unary prefix.
        // Prefix 3 ("1110") folds to -2 via the LSB sign rule.
        let mut bits = reader(&pack("1110"));
        let mut out = [0i32; 1];

        dyn_decomp(&params(10, 40, 14, 1), &mut bits, &mut out, 1, 16).unwrap();
        assert_eq!(out, [-2]);
    }

    #[test]
    fn test_zero_run_engages_after_small_mean() {
        // Sample 0 decodes residual 0 ("0"); the mean stays at 10, far below
        // the quantisation threshold, so a run length follows: k32 = 4,
        // mz = 15, and "0 1000" decodes run = 7, filling the block.
        let mut bits = reader(&pack("0 0 1000"));
        let mut out = [1i32; 8];

        dyn_decomp(&params(10, 40, 14, 8), &mut bits, &mut out, 8, 16).unwrap();
        assert_eq!(out, [0i32; 8]);
    }

    #[test]
    fn test_escape_after_saturated_prefix() {
        // Nine 1-bits saturate the prefix; the residual is then read raw at
        // the escape width (16 bits here): 0x1234 folds to +2330.
        let mut bits = reader(&pack("111111111 0001001000110100"));
        let mut out = [0i32; 1];

        dyn_decomp(&params(10, 40, 14, 1), &mut bits, &mut out, 1, 16).unwrap();
        assert_eq!(out, [(0x1234 + 1) >> 1]);
    }

    #[test]
    fn test_truncated_block_is_an_overrun() {
        // One byte holds the first residual (prefix 8 consumes 9 bits); the
        // second sample has no bits left.
        let mut bits = reader(&[0xFF]);
        let mut out = [0i32; 2];

        let err = dyn_decomp(&params(10, 40, 14, 2), &mut bits, &mut out, 2, 16).unwrap_err();
        assert_eq!(err, DecodeError::BitstreamOverrun);
    }

    #[test]
    fn test_empty_reader_is_an_overrun() {
        let mut bits = reader(&[]);
        let mut out = [0i32; 4];

        let err = dyn_decomp(&params(10, 40, 14, 4), &mut bits, &mut out, 4, 16).unwrap_err();
        assert_eq!(err, DecodeError::BitstreamOverrun);
    }

    #[test]
    fn test_oversized_zero_run_is_a_sample_overrun() {
        // Run of 3 ("0 0100" => val 4 => 3) against a 2-sample block.
        let mut bits = reader(&pack("0 0 0100"));
        let mut out = [0i32; 2];

        let err = dyn_decomp(&params(10, 40, 14, 2), &mut bits, &mut out, 2, 16).unwrap_err();
        assert_eq!(err, DecodeError::SampleOverrun);
    }

    #[test]
    fn test_zero_samples_consumes_nothing() {
        let mut bits = reader(&[0xAB]);
        let mut out = [0i32; 0];

        dyn_decomp(&params(10, 40, 14, 0), &mut bits, &mut out, 0, 16).unwrap();
        assert!(!bits.past_end());
        assert_eq!(bits.read(8), 0xAB);
    }

    #[test]
    fn test_stream_bits_spanning_five_bytes() {
        let buf = [0b1010_1010, 0xFF, 0x00, 0xFF, 0b1100_0000];
        // 30 bits starting at bit 5: crosses into the fifth byte.
        let got = stream_bits(&buf, 5, 30);
        let expected = {
            let mut v = 0u32;
            for bit in 5..35 {
                let byte = buf[bit / 8];
                v = (v << 1) | u32::from((byte >> (7 - (bit % 8))) & 1);
            }
            v
        };
        assert_eq!(got, expected);
    }
}
