//! Decode-path benchmarks: packet decode, escape path and streaming.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use alac::{AlacConfig, PacketDecoder};

/// MSB-first bit writer for assembling benchmark packets.
struct BitWriter {
    bytes: Vec<u8>,
    filled: u32,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            filled: 0,
        }
    }

    fn push(&mut self, value: u32, bits: u32) {
        for i in (0..bits).rev() {
            let bit = ((value >> i) & 1) as u8;
            if self.filled == 0 {
                self.bytes.push(0);
            }
            let last = self.bytes.len() - 1;
            self.bytes[last] |= bit << (7 - self.filled);
            self.filled = (self.filled + 1) % 8;
        }
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

fn noise(count: usize, mut seed: u64) -> Vec<i16> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        out.push((seed % 60000) as i32 as i16);
    }
    out
}

fn escape_packet_stereo(left: &[i16], right: &[i16]) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.push(1, 3); // CPE
    w.push(0, 4);
    w.push(0, 12);
    w.push(0b0001, 4); // escape
    for (&l, &r) in left.iter().zip(right) {
        w.push(u32::from(l as u16), 16);
        w.push(u32::from(r as u16), 16);
    }
    w.finish()
}

/// A compressed 16-sample mono packet of silence: one coded residual plus
/// a Golomb-coded zero run of 15 covering the rest of the frame.
fn silence_packet() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.push(0, 3); // SCE
    w.push(0, 4);
    w.push(0, 12);
    w.push(0, 4);
    w.push(0, 8);
    w.push(0, 8);
    w.push(0x00, 8); // mode 0, den_shift 0
    w.push(0x80, 8); // pb_factor 4, order 0
    w.push(0, 1); // first residual
    w.push(0b10, 2); // run prefix 1, terminator
    w.push(0b000, 3); // short tail: run = prefix * 15
    w.finish()
}

fn bench_escape_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("escape_decode");

    for &frame_length in &[1024usize, 4096] {
        let mut config = AlacConfig::new(44100, 2, 16).unwrap();
        config.frame_length = frame_length as u32;
        let mut decoder = PacketDecoder::new(config).unwrap();

        let left = noise(frame_length, 1);
        let right = noise(frame_length, 2);
        let packet = escape_packet_stereo(&left, &right);
        let mut output = vec![0u8; frame_length * 4];

        group.throughput(Throughput::Elements(frame_length as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(frame_length),
            &packet,
            |b, packet| {
                b.iter(|| {
                    let n = decoder.decode_into(black_box(packet), &mut output).unwrap();
                    black_box(n)
                });
            },
        );
    }

    group.finish();
}

fn bench_silence_decode(c: &mut Criterion) {
    let frame_length = 16u32;
    let mut config = AlacConfig::new(44100, 1, 16).unwrap();
    config.frame_length = frame_length;
    let mut decoder = PacketDecoder::new(config).unwrap();

    let packet = silence_packet();
    let mut output = vec![0u8; frame_length as usize * 2];

    c.bench_function("silence_decode", |b| {
        b.iter(|| {
            let n = decoder.decode_into(black_box(&packet), &mut output).unwrap();
            black_box(n)
        });
    });
}

criterion_group!(benches, bench_escape_decode, bench_silence_decode);
criterion_main!(benches);
