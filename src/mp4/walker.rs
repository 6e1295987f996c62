//! Locating the ALAC track: moov walk, cookie extraction, sample table.

use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, trace};

use super::atoms::{read_co64, read_stco, read_stsc, read_stsz, BoxHeader, StscEntry};
use super::SampleInfo;
use crate::error::ContainerError;

/// Box header (8) of a sample entry.
const SAMPLE_ENTRY_HEADER: usize = 8;
/// Fixed AudioSampleEntry fields after the header.
const SAMPLE_ENTRY_BASE: usize = 28;
/// Extra fields carried by QuickTime version-1 sample entries.
const SAMPLE_ENTRY_V1_EXTRA: usize = 16;
/// stsd payload prefix: version/flags (4) + entry count (4).
const STSD_PAYLOAD_HEADER: usize = 8;

/// Upper bound on an `stsd` payload; real ones are a few hundred bytes.
const MAX_STSD_PAYLOAD: u64 = 1024 * 1024;

/// Walk the MP4 box tree and locate the first track with an `alac` sample
/// entry. Returns the raw magic cookie (wrapper atoms included, if any)
/// and the flat packet table in stream order.
pub fn find_alac_track<R: Read + Seek>(
    reader: &mut R,
) -> Result<(Vec<u8>, Vec<SampleInfo>), ContainerError> {
    reader.seek(SeekFrom::Start(0))?;

    let moov = find_top_level(reader, b"moov")?.ok_or(ContainerError::NoAlacTrack)?;

    for trak in children(reader, &moov)? {
        if &trak.box_type != b"trak" {
            continue;
        }

        let Some(stbl) = descend(reader, &trak, &[b"mdia", b"minf", b"stbl"])? else {
            continue;
        };

        // A trak without an alac sample entry is simply not our track.
        let Ok(cookie) = extract_cookie(reader, &stbl) else {
            trace!("skipping non-ALAC trak at offset {}", trak.offset);
            continue;
        };

        let samples = build_sample_table(reader, &stbl)?;
        debug!(
            packets = samples.len(),
            cookie_len = cookie.len(),
            "located ALAC track"
        );

        return Ok((cookie, samples));
    }

    Err(ContainerError::NoAlacTrack)
}

/// Scan top-level boxes for the first one matching `fourcc`.
fn find_top_level<R: Read + Seek>(
    reader: &mut R,
    fourcc: &[u8; 4],
) -> Result<Option<BoxHeader>, ContainerError> {
    loop {
        let Some(header) = BoxHeader::read(reader)? else {
            return Ok(None);
        };

        if &header.box_type == fourcc {
            return Ok(Some(header));
        }

        reader.seek(SeekFrom::Start(header.end_offset()))?;
    }
}

/// Collect the direct children of `parent`.
fn children<R: Read + Seek>(
    reader: &mut R,
    parent: &BoxHeader,
) -> Result<Vec<BoxHeader>, ContainerError> {
    let end = parent.end_offset();
    let mut found = Vec::new();

    reader.seek(SeekFrom::Start(parent.content_offset()))?;

    while reader.stream_position()? < end {
        let Some(child) = BoxHeader::read(reader)? else {
            break;
        };

        reader.seek(SeekFrom::Start(child.end_offset()))?;
        found.push(child);
    }

    Ok(found)
}

/// Find the first child of `parent` with the given type.
fn find_child<R: Read + Seek>(
    reader: &mut R,
    parent: &BoxHeader,
    fourcc: &[u8; 4],
) -> Result<Option<BoxHeader>, ContainerError> {
    Ok(children(reader, parent)?
        .into_iter()
        .find(|child| &child.box_type == fourcc))
}

/// Descend one level per path element from `parent`.
fn descend<R: Read + Seek>(
    reader: &mut R,
    parent: &BoxHeader,
    path: &[&[u8; 4]],
) -> Result<Option<BoxHeader>, ContainerError> {
    let mut current = parent.clone();

    for &fourcc in path {
        match find_child(reader, &current, fourcc)? {
            Some(child) => current = child,
            None => return Ok(None),
        }
    }

    Ok(Some(current))
}

/// Read `stbl → stsd`, find the first `alac` sample entry and cut the magic
/// cookie out of it. The cookie may still carry `frma`/`alac` wrapper atoms;
/// the config parser strips those.
fn extract_cookie<R: Read + Seek>(
    reader: &mut R,
    stbl: &BoxHeader,
) -> Result<Vec<u8>, ContainerError> {
    let stsd = find_child(reader, stbl, b"stsd")?.ok_or(ContainerError::NoAlacTrack)?;

    let payload_len = stsd.content_size().min(MAX_STSD_PAYLOAD) as usize;
    let mut payload = vec![0u8; payload_len];
    reader.seek(SeekFrom::Start(stsd.content_offset()))?;
    reader
        .read_exact(&mut payload)
        .map_err(|_| ContainerError::NoAlacTrack)?;

    if payload.len() < STSD_PAYLOAD_HEADER {
        return Err(ContainerError::NoAlacTrack);
    }

    let entry_count = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    let mut pos = STSD_PAYLOAD_HEADER;

    for _ in 0..entry_count {
        if pos + SAMPLE_ENTRY_HEADER > payload.len() {
            break;
        }

        let entry_size =
            u32::from_be_bytes([payload[pos], payload[pos + 1], payload[pos + 2], payload[pos + 3]])
                as usize;
        if entry_size == 0 {
            break;
        }

        if entry_size < SAMPLE_ENTRY_HEADER + SAMPLE_ENTRY_BASE
            || pos + entry_size > payload.len()
            || &payload[pos + 4..pos + 8] != b"alac"
        {
            pos += entry_size;
            continue;
        }

        // AudioSampleEntry payload: reserved (6) + data ref index (2) +
        // version (2) + ... The QT version decides the prefix length.
        let version_off = pos + SAMPLE_ENTRY_HEADER + 8;
        let version = u16::from_be_bytes([payload[version_off], payload[version_off + 1]]);

        let mut skip = SAMPLE_ENTRY_HEADER + SAMPLE_ENTRY_BASE;
        if version == 1 {
            skip += SAMPLE_ENTRY_V1_EXTRA;
        }

        let cookie_start = pos + skip;
        let cookie_end = pos + entry_size;

        if cookie_start >= cookie_end {
            return Err(ContainerError::InvalidSampleEntry);
        }

        return Ok(payload[cookie_start..cookie_end].to_vec());
    }

    Err(ContainerError::NoAlacTrack)
}

/// Flatten `stco`/`co64` × `stsc` × `stsz` into per-packet offsets/sizes.
fn build_sample_table<R: Read + Seek>(
    reader: &mut R,
    stbl: &BoxHeader,
) -> Result<Vec<SampleInfo>, ContainerError> {
    let chunk_offsets = read_chunk_offsets(reader, stbl)?;

    let stsc = find_child(reader, stbl, b"stsc")?.ok_or(ContainerError::InvalidStsc)?;
    let stsc_entries = read_stsc(reader, &stsc)?;

    let stsz = find_child(reader, stbl, b"stsz")?.ok_or(ContainerError::InvalidStsz)?;
    let sizes = read_stsz(reader, &stsz)?;

    let sample_count = sizes.sample_count as usize;
    let mut samples = Vec::with_capacity(sample_count.min(1 << 20));
    let mut sample_idx = 0usize;

    for (chunk_idx, &chunk_offset) in chunk_offsets.iter().enumerate() {
        // stsc chunk numbers are 1-based.
        let in_chunk = samples_per_chunk(&stsc_entries, chunk_idx as u32 + 1);
        let mut offset = chunk_offset;

        for _ in 0..in_chunk {
            if sample_idx >= sample_count {
                break;
            }

            let size = if sizes.constant_size != 0 {
                sizes.constant_size
            } else {
                sizes.sizes[sample_idx]
            };

            samples.push(SampleInfo { offset, size });
            offset = offset.wrapping_add(u64::from(size));
            sample_idx += 1;
        }
    }

    Ok(samples)
}

/// Chunk offsets from `stco`, falling back to `co64`.
fn read_chunk_offsets<R: Read + Seek>(
    reader: &mut R,
    stbl: &BoxHeader,
) -> Result<Vec<u64>, ContainerError> {
    if let Some(stco) = find_child(reader, stbl, b"stco")? {
        return read_stco(reader, &stco);
    }

    let co64 = find_child(reader, stbl, b"co64")?.ok_or(ContainerError::MissingChunkOffsets)?;
    read_co64(reader, &co64)
}

/// Samples-per-chunk for a 1-based chunk number, from the run-length table.
fn samples_per_chunk(entries: &[StscEntry], chunk_number: u32) -> u32 {
    let mut samples = 0;

    for entry in entries {
        if entry.first_chunk > chunk_number {
            break;
        }
        samples = entry.samples_per_chunk;
    }

    samples
}
