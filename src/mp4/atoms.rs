//! Box headers and the sample-table boxes (`stco`/`co64`/`stsc`/`stsz`).

use std::io::{Read, Seek, SeekFrom};

use crate::error::ContainerError;

/// Guard against absurd declared table sizes before allocating.
const MAX_TABLE_BYTES: u64 = 64 * 1024 * 1024;

/// FullBox prefix: version (1) + flags (3).
const FULL_BOX_SIZE: u64 = 4;

/// A parsed box header.
#[derive(Debug, Clone)]
pub(crate) struct BoxHeader {
    /// Four-character box type.
    pub box_type: [u8; 4],
    /// Total box size including the header.
    pub size: u64,
    /// Header size: 8, or 16 with an extended size field.
    pub header_size: u8,
    /// File offset of the header start.
    pub offset: u64,
}

impl BoxHeader {
    /// Read one box header at the current position. Returns `Ok(None)` at
    /// end of input (including a header truncated mid-way).
    pub fn read<R: Read + Seek + ?Sized>(
        reader: &mut R,
    ) -> Result<Option<Self>, ContainerError> {
        let offset = reader.stream_position()?;

        let mut header = [0u8; 8];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let raw_size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let box_type = [header[4], header[5], header[6], header[7]];

        let (size, header_size) = match raw_size {
            1 => {
                // Extended 64-bit size.
                let mut ext = [0u8; 8];
                match reader.read_exact(&mut ext) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                    Err(e) => return Err(e.into()),
                }
                (u64::from_be_bytes(ext), 16u8)
            }
            0 => {
                // Box extends to end of file.
                let end = reader.seek(SeekFrom::End(0))?;
                reader.seek(SeekFrom::Start(offset + 8))?;
                (end.saturating_sub(offset), 8u8)
            }
            _ => (u64::from(raw_size), 8u8),
        };

        if size < u64::from(header_size) {
            return Err(ContainerError::InvalidBoxSize { offset, size });
        }

        Ok(Some(Self {
            box_type,
            size,
            header_size,
            offset,
        }))
    }

    /// File offset where the payload begins.
    pub fn content_offset(&self) -> u64 {
        self.offset + u64::from(self.header_size)
    }

    /// Payload size (total minus header).
    pub fn content_size(&self) -> u64 {
        self.size - u64::from(self.header_size)
    }

    /// File offset just past this box.
    pub fn end_offset(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

/// Validate a FullBox entry table against the declared payload size and
/// return the number of table bytes.
fn table_bytes(
    count: u32,
    entry_size: u64,
    content_size: u64,
) -> Option<usize> {
    let bytes = u64::from(count) * entry_size;
    if FULL_BOX_SIZE + 4 + bytes > content_size || bytes > MAX_TABLE_BYTES {
        return None;
    }
    Some(bytes as usize)
}

/// Read the FullBox prefix plus the 32-bit entry count.
fn read_full_box_count<R: Read + Seek>(
    reader: &mut R,
    header: &BoxHeader,
) -> std::io::Result<u32> {
    reader.seek(SeekFrom::Start(header.content_offset()))?;
    let mut prefix = [0u8; 8];
    reader.read_exact(&mut prefix)?;
    Ok(u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]))
}

/// Read a 32-bit chunk-offset box (`stco`).
pub(crate) fn read_stco<R: Read + Seek>(
    reader: &mut R,
    header: &BoxHeader,
) -> Result<Vec<u64>, ContainerError> {
    let count = read_full_box_count(reader, header)
        .map_err(|_| ContainerError::MissingChunkOffsets)?;
    let bytes = table_bytes(count, 4, header.content_size())
        .ok_or(ContainerError::MissingChunkOffsets)?;

    let mut buf = vec![0u8; bytes];
    reader
        .read_exact(&mut buf)
        .map_err(|_| ContainerError::MissingChunkOffsets)?;

    Ok(buf
        .chunks_exact(4)
        .map(|c| u64::from(u32::from_be_bytes([c[0], c[1], c[2], c[3]])))
        .collect())
}

/// Read a 64-bit chunk-offset box (`co64`).
pub(crate) fn read_co64<R: Read + Seek>(
    reader: &mut R,
    header: &BoxHeader,
) -> Result<Vec<u64>, ContainerError> {
    let count = read_full_box_count(reader, header)
        .map_err(|_| ContainerError::MissingChunkOffsets)?;
    let bytes = table_bytes(count, 8, header.content_size())
        .ok_or(ContainerError::MissingChunkOffsets)?;

    let mut buf = vec![0u8; bytes];
    reader
        .read_exact(&mut buf)
        .map_err(|_| ContainerError::MissingChunkOffsets)?;

    Ok(buf
        .chunks_exact(8)
        .map(|c| u64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
}

/// One `stsc` run: all chunks from `first_chunk` (1-based) until the next
/// entry carry `samples_per_chunk` samples.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StscEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
}

/// Read the sample-to-chunk box (`stsc`).
pub(crate) fn read_stsc<R: Read + Seek>(
    reader: &mut R,
    header: &BoxHeader,
) -> Result<Vec<StscEntry>, ContainerError> {
    let count =
        read_full_box_count(reader, header).map_err(|_| ContainerError::InvalidStsc)?;
    let bytes =
        table_bytes(count, 12, header.content_size()).ok_or(ContainerError::InvalidStsc)?;

    let mut buf = vec![0u8; bytes];
    reader
        .read_exact(&mut buf)
        .map_err(|_| ContainerError::InvalidStsc)?;

    Ok(buf
        .chunks_exact(12)
        .map(|c| StscEntry {
            first_chunk: u32::from_be_bytes([c[0], c[1], c[2], c[3]]),
            samples_per_chunk: u32::from_be_bytes([c[4], c[5], c[6], c[7]]),
            // The sample-description index in the last 4 bytes is unused.
        })
        .collect())
}

/// Contents of the sample-size box (`stsz`): either per-sample sizes or a
/// single constant size.
#[derive(Debug, Clone)]
pub(crate) struct SampleSizes {
    pub sizes: Vec<u32>,
    pub constant_size: u32,
    pub sample_count: u32,
}

/// Read the sample-size box (`stsz`).
pub(crate) fn read_stsz<R: Read + Seek>(
    reader: &mut R,
    header: &BoxHeader,
) -> Result<SampleSizes, ContainerError> {
    reader.seek(SeekFrom::Start(header.content_offset()))?;

    // FullBox prefix + sampleSize + sampleCount.
    let mut prefix = [0u8; 12];
    reader
        .read_exact(&mut prefix)
        .map_err(|_| ContainerError::InvalidStsz)?;

    let constant_size = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
    let sample_count = u32::from_be_bytes([prefix[8], prefix[9], prefix[10], prefix[11]]);

    if constant_size != 0 {
        return Ok(SampleSizes {
            sizes: Vec::new(),
            constant_size,
            sample_count,
        });
    }

    let bytes = table_bytes(sample_count, 4, header.content_size().saturating_sub(4))
        .ok_or(ContainerError::InvalidStsz)?;

    let mut buf = vec![0u8; bytes];
    reader
        .read_exact(&mut buf)
        .map_err(|_| ContainerError::InvalidStsz)?;

    Ok(SampleSizes {
        sizes: buf
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        constant_size: 0,
        sample_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn boxed(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
        out.extend_from_slice(fourcc);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_read_plain_header() {
        let data = boxed(b"moov", &[0u8; 8]);
        let mut cur = Cursor::new(data);

        let header = BoxHeader::read(&mut cur).unwrap().unwrap();
        assert_eq!(&header.box_type, b"moov");
        assert_eq!(header.size, 16);
        assert_eq!(header.header_size, 8);
        assert_eq!(header.content_offset(), 8);
        assert_eq!(header.content_size(), 8);
    }

    #[test]
    fn test_read_extended_header() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&24u64.to_be_bytes());
        data.extend_from_slice(&[0u8; 8]);
        let mut cur = Cursor::new(data);

        let header = BoxHeader::read(&mut cur).unwrap().unwrap();
        assert_eq!(&header.box_type, b"mdat");
        assert_eq!(header.size, 24);
        assert_eq!(header.header_size, 16);
    }

    #[test]
    fn test_size_zero_runs_to_end_of_file() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0xAA; 100]);
        let mut cur = Cursor::new(data);

        let header = BoxHeader::read(&mut cur).unwrap().unwrap();
        assert_eq!(header.size, 108);
        // Position must be just past the 8-byte header.
        assert_eq!(cur.position(), 8);
    }

    #[test]
    fn test_undersized_box_is_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&4u32.to_be_bytes()); // smaller than its header
        data.extend_from_slice(b"free");
        let mut cur = Cursor::new(data);

        let err = BoxHeader::read(&mut cur).unwrap_err();
        assert!(matches!(
            err,
            ContainerError::InvalidBoxSize { offset: 0, size: 4 }
        ));
    }

    #[test]
    fn test_eof_yields_none() {
        let mut cur = Cursor::new(Vec::<u8>::new());
        assert!(BoxHeader::read(&mut cur).unwrap().is_none());

        let mut cur = Cursor::new(vec![0u8; 5]); // truncated header
        assert!(BoxHeader::read(&mut cur).unwrap().is_none());
    }

    #[test]
    fn test_read_stco() {
        let mut payload = vec![0u8; 4]; // version + flags
        payload.extend_from_slice(&2u32.to_be_bytes());
        payload.extend_from_slice(&100u32.to_be_bytes());
        payload.extend_from_slice(&200u32.to_be_bytes());
        let data = boxed(b"stco", &payload);
        let mut cur = Cursor::new(data);

        let header = BoxHeader::read(&mut cur).unwrap().unwrap();
        let offsets = read_stco(&mut cur, &header).unwrap();
        assert_eq!(offsets, vec![100, 200]);
    }

    #[test]
    fn test_stco_count_beyond_payload_is_rejected() {
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&1000u32.to_be_bytes()); // declares 1000 entries
        payload.extend_from_slice(&100u32.to_be_bytes()); // holds one
        let data = boxed(b"stco", &payload);
        let mut cur = Cursor::new(data);

        let header = BoxHeader::read(&mut cur).unwrap().unwrap();
        assert!(matches!(
            read_stco(&mut cur, &header),
            Err(ContainerError::MissingChunkOffsets)
        ));
    }

    #[test]
    fn test_read_stsz_constant_size() {
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&512u32.to_be_bytes()); // constant size
        payload.extend_from_slice(&7u32.to_be_bytes()); // count
        let data = boxed(b"stsz", &payload);
        let mut cur = Cursor::new(data);

        let header = BoxHeader::read(&mut cur).unwrap().unwrap();
        let sizes = read_stsz(&mut cur, &header).unwrap();
        assert_eq!(sizes.constant_size, 512);
        assert_eq!(sizes.sample_count, 7);
        assert!(sizes.sizes.is_empty());
    }

    #[test]
    fn test_read_stsz_per_sample() {
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&2u32.to_be_bytes());
        payload.extend_from_slice(&11u32.to_be_bytes());
        payload.extend_from_slice(&22u32.to_be_bytes());
        let data = boxed(b"stsz", &payload);
        let mut cur = Cursor::new(data);

        let header = BoxHeader::read(&mut cur).unwrap().unwrap();
        let sizes = read_stsz(&mut cur, &header).unwrap();
        assert_eq!(sizes.constant_size, 0);
        assert_eq!(sizes.sizes, vec![11, 22]);
    }
}
