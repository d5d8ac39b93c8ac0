//! The container layer: a block-indexed store of fixed-size records and
//! opaque byte buffers, plus the framed file format that serializes it.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use tracing::warn;

use crate::error::{Error, Result};

pub const MAGIC: &[u8; 4] = b"FMDL";
/// Container version used by PES 2018-era assets.
pub const VERSION_2_03: u32 = 0x4001_eb85;

/// The number of block ids addressable by the presence bitmaps.
const BLOCK_ID_LIMIT: u16 = 64;

/// Returns the fixed record size, in bytes, of a known segment 0 block.
pub fn segment0_record_size(block_id: u16) -> Option<usize> {
    let size = match block_id {
        0 => 48,  // bone
        1 => 8,   // mesh group
        2 => 32,  // mesh group assignment
        3 => 48,  // mesh
        4 => 16,  // material instance
        5 => 68,  // bone group
        6 => 4,   // texture
        7 => 4,   // texture / material parameter assignment
        8 => 4,   // material
        9 => 8,   // mesh format assignment
        10 => 8,  // mesh format
        11 => 4,  // vertex format
        12 => 8,  // string descriptor
        13 => 32, // bounding box
        14 => 16, // buffer offset
        16 => 16, // level of detail
        17 => 8,  // face index
        18 => 8,  // unknown
        20 => 128, // unknown
        _ => return None,
    };
    Some(size)
}

/// An in-memory FMDL container: two segments of numbered blocks.
///
/// Segment 0 blocks are ordered lists of fixed-size records whose layout is
/// determined by the block id; segment 1 blocks are opaque byte buffers. The
/// container layer treats both as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct FmdlContainer {
    pub version: u32,
    /// Segment 0 blocks, keyed by block id.
    pub segment0_blocks: BTreeMap<u16, Vec<Vec<u8>>>,
    /// Segment 1 blocks, keyed by block id.
    pub segment1_blocks: BTreeMap<u32, Vec<u8>>,
}

impl FmdlContainer {
    pub fn new() -> Self {
        Self {
            version: VERSION_2_03,
            segment0_blocks: BTreeMap::new(),
            segment1_blocks: BTreeMap::new(),
        }
    }

    /// Reads a framed container from a stream.
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let mut header = [0; 56];
        reader
            .read_exact(&mut header)
            .map_err(|_| Error::InvalidContainer("incomplete header".into()))?;
        let mut header = Cursor::new(&header[..]);

        let mut magic = [0; 4];
        header.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::InvalidContainer("unexpected magic number".into()));
        }
        let version = header.read_u32::<LE>()?;
        let descriptors_offset = header.read_u64::<LE>()?;
        let _section0_bitmap = header.read_u64::<LE>()?;
        let _section1_bitmap = header.read_u64::<LE>()?;
        let section0_block_count = header.read_u32::<LE>()?;
        let section1_block_count = header.read_u32::<LE>()?;
        let section0_offset = header.read_u32::<LE>()?;
        let _section0_length = header.read_u32::<LE>()?;
        let section1_offset = header.read_u32::<LE>()?;
        let _section1_length = header.read_u32::<LE>()?;

        reader.seek(SeekFrom::Start(descriptors_offset))?;

        let mut section0_descriptors = Vec::with_capacity(section0_block_count as usize);
        for _ in 0..section0_block_count {
            let mut descriptor = [0; 8];
            reader
                .read_exact(&mut descriptor)
                .map_err(|_| Error::InvalidContainer("incomplete block descriptor".into()))?;
            let mut descriptor = Cursor::new(&descriptor[..]);
            let block_id = descriptor.read_u16::<LE>()?;
            let entry_count = descriptor.read_u16::<LE>()?;
            let offset = descriptor.read_u32::<LE>()?;
            section0_descriptors.push((block_id, entry_count, offset));
        }

        let mut section1_descriptors = Vec::with_capacity(section1_block_count as usize);
        for _ in 0..section1_block_count {
            let mut descriptor = [0; 12];
            reader
                .read_exact(&mut descriptor)
                .map_err(|_| Error::InvalidContainer("incomplete block descriptor".into()))?;
            let mut descriptor = Cursor::new(&descriptor[..]);
            let block_id = descriptor.read_u32::<LE>()?;
            let offset = descriptor.read_u32::<LE>()?;
            let length = descriptor.read_u32::<LE>()?;
            section1_descriptors.push((block_id, offset, length));
        }

        let mut container = Self::new();
        container.version = version;

        for (block_id, entry_count, offset) in section0_descriptors {
            let record_size = match segment0_record_size(block_id) {
                Some(size) => size,
                None => continue,
            };

            if container.segment0_blocks.contains_key(&block_id) {
                return Err(Error::DuplicateBlock {
                    segment: 0,
                    block_id: block_id.into(),
                });
            }

            reader.seek(SeekFrom::Start(u64::from(section0_offset) + u64::from(offset)))?;

            let mut records = Vec::with_capacity(entry_count as usize);
            for _ in 0..entry_count {
                let mut record = vec![0; record_size];
                reader.read_exact(&mut record).map_err(|_| {
                    Error::Truncated(format!(
                        "unexpected end of file reading section 0 block {} record",
                        block_id
                    ))
                })?;
                records.push(record);
            }
            container.segment0_blocks.insert(block_id, records);
        }

        let file_length = reader.seek(SeekFrom::End(0))?;

        for (block_id, offset, length) in section1_descriptors {
            if container.segment1_blocks.contains_key(&block_id) {
                return Err(Error::DuplicateBlock {
                    segment: 1,
                    block_id,
                });
            }

            // Block lengths are occasionally set to slightly wrong values by
            // the game's own tooling; interpret them liberally. The string
            // pool (block 3) is the known offender and is always clamped.
            let absolute_offset = u64::from(section1_offset) + u64::from(offset);
            let remaining = file_length.saturating_sub(absolute_offset);
            let mut length = u64::from(length);
            if length > remaining {
                warn!(
                    block_id,
                    declared = length,
                    remaining,
                    "segment 1 block length exceeds the file, clamping"
                );
                length = remaining;
            } else if block_id == 3 {
                length = remaining;
            }

            reader.seek(SeekFrom::Start(absolute_offset))?;

            let mut block = vec![0; length as usize];
            reader.read_exact(&mut block).map_err(|_| {
                Error::Truncated(format!(
                    "unexpected end of file reading section 1 block {}",
                    block_id
                ))
            })?;
            container.segment1_blocks.insert(block_id, block);
        }

        Ok(container)
    }

    /// Writes the framed container to a stream. Blocks are emitted in
    /// ascending block-id order and padded to 16-byte multiples.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut section0_bitmap: u64 = 0;
        let mut section1_bitmap: u64 = 0;
        let mut descriptors = Vec::new();
        let mut section0 = Vec::new();
        let mut section1 = Vec::new();

        let mut section0_descriptor_count: u32 = 0;
        for (&block_id, records) in self.segment0_blocks.range(..BLOCK_ID_LIMIT) {
            let offset = section0.len() as u32;
            descriptors.write_u16::<LE>(block_id)?;
            descriptors.write_u16::<LE>(records.len() as u16)?;
            descriptors.write_u32::<LE>(offset)?;

            for record in records {
                section0.extend_from_slice(record);
            }
            pad_to_16(&mut section0);

            section0_bitmap |= 1 << block_id;
            section0_descriptor_count += 1;
        }
        pad_to_16(&mut section0);
        let section0_length = section0.len() as u32;

        let mut section1_descriptor_count: u32 = 0;
        for (&block_id, block) in self.segment1_blocks.range(..u32::from(BLOCK_ID_LIMIT)) {
            descriptors.write_u32::<LE>(block_id)?;
            descriptors.write_u32::<LE>(section1.len() as u32)?;
            descriptors.write_u32::<LE>(block.len() as u32)?;

            section1.extend_from_slice(block);

            section1_bitmap |= 1 << block_id;
            section1_descriptor_count += 1;
        }
        let section1_length = section1.len() as u32;

        pad_to_16(&mut descriptors);

        // The header is written as 64 bytes, with a trailing zero that the
        // reader never consumes; the game's files carry the same.
        let header_size: u64 = 64;
        let section0_offset = header_size as u32 + descriptors.len() as u32;
        let section1_offset = section0_offset + section0_length;

        writer.write_all(MAGIC)?;
        writer.write_u32::<LE>(self.version)?;
        writer.write_u64::<LE>(header_size)?;
        writer.write_u64::<LE>(section0_bitmap)?;
        writer.write_u64::<LE>(section1_bitmap)?;
        writer.write_u32::<LE>(section0_descriptor_count)?;
        writer.write_u32::<LE>(section1_descriptor_count)?;
        writer.write_u32::<LE>(section0_offset)?;
        writer.write_u32::<LE>(section0_length)?;
        writer.write_u32::<LE>(section1_offset)?;
        writer.write_u32::<LE>(section1_length)?;
        writer.write_u64::<LE>(0)?;

        writer.write_all(&descriptors)?;
        writer.write_all(&section0)?;
        writer.write_all(&section1)?;

        Ok(())
    }
}

impl Default for FmdlContainer {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn pad_to_16(bytes: &mut Vec<u8>) {
    // Some PES files pad blocks less aggressively than this, but a full
    // 16-byte alignment is always accepted.
    let remainder = bytes.len() % 16;
    if remainder != 0 {
        bytes.resize(bytes.len() + 16 - remainder, 0);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample() -> FmdlContainer {
        let mut container = FmdlContainer::new();
        container
            .segment0_blocks
            .insert(6, vec![vec![1, 0, 2, 0], vec![3, 0, 4, 0]]);
        container
            .segment0_blocks
            .insert(17, vec![vec![0, 0, 0, 0, 9, 0, 0, 0]]);
        container.segment1_blocks.insert(2, vec![0xaa; 20]);
        container
    }

    #[test]
    fn round_trip() {
        let container = sample();

        let mut bytes = Vec::new();
        container.write(&mut bytes).unwrap();
        let actual = FmdlContainer::read(&mut Cursor::new(&bytes)).unwrap();

        assert_eq!(container, actual);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = Vec::new();
        sample().write(&mut bytes).unwrap();
        bytes[0] = b'X';

        let result = FmdlContainer::read(&mut Cursor::new(&bytes));
        assert!(matches!(result, Err(Error::InvalidContainer(_))));
    }

    #[test]
    fn rejects_truncated_header() {
        let result = FmdlContainer::read(&mut Cursor::new(b"FMDL"));
        assert!(matches!(result, Err(Error::InvalidContainer(_))));
    }

    #[test]
    fn rejects_duplicate_block() {
        // Two descriptors for segment 0 block 6, pointing at the same record.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION_2_03.to_le_bytes());
        bytes.extend_from_slice(&64u64.to_le_bytes());
        bytes.extend_from_slice(&(1u64 << 6).to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&80u32.to_le_bytes());
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&96u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        for _ in 0..2 {
            bytes.extend_from_slice(&6u16.to_le_bytes());
            bytes.extend_from_slice(&1u16.to_le_bytes());
            bytes.extend_from_slice(&0u32.to_le_bytes());
        }
        bytes.extend_from_slice(&[0; 16]);

        let result = FmdlContainer::read(&mut Cursor::new(&bytes));
        assert!(matches!(
            result,
            Err(Error::DuplicateBlock {
                segment: 0,
                block_id: 6
            })
        ));
    }

    #[test]
    fn skips_unknown_segment0_block() {
        // Block 15 has no known record size and must be ignored.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION_2_03.to_le_bytes());
        bytes.extend_from_slice(&64u64.to_le_bytes());
        bytes.extend_from_slice(&(1u64 << 15).to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&80u32.to_le_bytes());
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&96u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&15u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&[0; 8]);
        bytes.extend_from_slice(&[0; 16]);

        let container = FmdlContainer::read(&mut Cursor::new(&bytes)).unwrap();
        assert!(container.segment0_blocks.is_empty());
    }

    #[test]
    fn clamps_overlong_segment1_block() {
        let mut container = FmdlContainer::new();
        container.segment1_blocks.insert(0, vec![7; 16]);

        let mut bytes = Vec::new();
        container.write(&mut bytes).unwrap();

        // Inflate the declared length of the only segment 1 descriptor. The
        // descriptor table starts right after the 64-byte header, and the
        // length field sits 8 bytes into the 12-byte descriptor.
        let length_offset = 64 + 8;
        bytes[length_offset..length_offset + 4].copy_from_slice(&1000u32.to_le_bytes());

        let actual = FmdlContainer::read(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(vec![7; 16], actual.segment1_blocks[&0]);
    }

    #[test]
    fn string_pool_length_is_always_clamped() {
        let mut container = FmdlContainer::new();
        container.segment1_blocks.insert(3, vec![1, 2, 3, 4]);

        let mut bytes = Vec::new();
        container.write(&mut bytes).unwrap();

        // Understate the declared length; block 3 reads to end of file anyway.
        let length_offset = 64 + 8;
        bytes[length_offset..length_offset + 4].copy_from_slice(&2u32.to_le_bytes());

        let actual = FmdlContainer::read(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(vec![1, 2, 3, 4], actual.segment1_blocks[&3]);
    }

    #[test]
    fn empty_blocks_keep_their_descriptors() {
        let mut container = FmdlContainer::new();
        container.segment0_blocks.insert(0, Vec::new());
        container.segment1_blocks.insert(1, Vec::new());

        let mut bytes = Vec::new();
        container.write(&mut bytes).unwrap();
        let actual = FmdlContainer::read(&mut Cursor::new(&bytes)).unwrap();

        assert_eq!(container, actual);
    }
}
