//! Minimal ISO base media (MP4/M4A) walking: just enough of the box tree
//! to find an ALAC track, pull its magic cookie out of `stsd`, and flatten
//! the chunk/sample tables into a packet list.

mod atoms;
mod walker;

pub use walker::find_alac_track;

/// Byte offset and size of one compressed ALAC packet in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    /// Absolute file offset of the packet.
    pub offset: u64,
    /// Packet size in bytes.
    pub size: u32,
}
