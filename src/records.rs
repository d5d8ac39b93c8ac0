//! Typed layouts for the segment 0 record blocks.
//!
//! Each record type decodes from and encodes to the exact on-disk byte
//! layout; fields with no known semantics are skipped on read and written
//! back as the constants found in game assets.

use std::io::{Cursor, Seek, SeekFrom};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use glam::Vec4;

use crate::error::{Error, Result};
use crate::model::BoundingBox;
use crate::vertex::{VertexDatumFormat, VertexDatumType};

/// Segment 1 block holding material parameter vectors.
pub const MATERIAL_PARAMETERS_BLOCK_ID: u32 = 0;
/// Segment 1 block holding the position, data, and face buffers.
pub const VERTEX_BLOCK_ID: u32 = 2;
/// Segment 1 block holding the string pool.
pub const STRING_POOL_BLOCK_ID: u32 = 3;

/// A skeleton bone definition (block 0).
#[derive(Debug, Clone, PartialEq)]
pub struct BoneRecord {
    pub name_string_id: u16,
    /// `-1` means the bone has no parent.
    pub parent_id: i16,
    pub bounding_box_id: u16,
    pub local_position: Vec4,
    pub global_position: Vec4,
}

impl BoneRecord {
    pub const BLOCK_ID: u16 = 0;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        let name_string_id = reader.read_u16::<LE>()?;
        let parent_id = reader.read_i16::<LE>()?;
        let bounding_box_id = reader.read_u16::<LE>()?;
        // Unknown u16 plus 8 bytes of padding.
        reader.seek(SeekFrom::Current(10))?;
        let local_position = read_vec4(&mut reader)?;
        let global_position = read_vec4(&mut reader)?;
        Ok(Self {
            name_string_id,
            parent_id,
            bounding_box_id,
            local_position,
            global_position,
        })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<LE>(self.name_string_id)?;
        bytes.write_i16::<LE>(self.parent_id)?;
        bytes.write_u16::<LE>(self.bounding_box_id)?;
        bytes.write_u16::<LE>(1)?;
        bytes.write_u64::<LE>(0)?;
        write_vec4(bytes, self.local_position)?;
        write_vec4(bytes, self.global_position)?;
        Ok(())
    }
}

/// A mesh group definition (block 1).
#[derive(Debug, Clone, PartialEq)]
pub struct MeshGroupRecord {
    pub name_string_id: u16,
    pub invisible: u16,
    /// `-1` means the group has no parent.
    pub parent_id: i16,
}

impl MeshGroupRecord {
    pub const BLOCK_ID: u16 = 1;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        Ok(Self {
            name_string_id: reader.read_u16::<LE>()?,
            invisible: reader.read_u16::<LE>()?,
            parent_id: reader.read_i16::<LE>()?,
        })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<LE>(self.name_string_id)?;
        bytes.write_u16::<LE>(self.invisible)?;
        bytes.write_i16::<LE>(self.parent_id)?;
        bytes.write_i16::<LE>(-1)?;
        Ok(())
    }
}

/// Assigns a contiguous run of meshes to a mesh group (block 2).
#[derive(Debug, Clone, PartialEq)]
pub struct MeshGroupAssignmentRecord {
    pub mesh_group_id: u16,
    pub mesh_count: u16,
    pub first_mesh_id: u16,
    pub bounding_box_id: u16,
}

impl MeshGroupAssignmentRecord {
    pub const BLOCK_ID: u16 = 2;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        reader.seek(SeekFrom::Current(4))?;
        Ok(Self {
            mesh_group_id: reader.read_u16::<LE>()?,
            mesh_count: reader.read_u16::<LE>()?,
            first_mesh_id: reader.read_u16::<LE>()?,
            bounding_box_id: reader.read_u16::<LE>()?,
        })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.extend_from_slice(&[0; 4]);
        bytes.write_u16::<LE>(self.mesh_group_id)?;
        bytes.write_u16::<LE>(self.mesh_count)?;
        bytes.write_u16::<LE>(self.first_mesh_id)?;
        bytes.write_u16::<LE>(self.bounding_box_id)?;
        bytes.extend_from_slice(&[0; 4]);
        bytes.write_u16::<LE>(0)?;
        bytes.extend_from_slice(&[0; 14]);
        Ok(())
    }
}

/// A mesh definition (block 3).
#[derive(Debug, Clone, PartialEq)]
pub struct MeshRecord {
    pub alpha_enum: u8,
    pub shadow_enum: u8,
    pub material_instance_id: u16,
    pub bone_group_id: u16,
    /// Index of a mesh format assignment (block 9) record.
    pub mesh_format_id: u16,
    pub vertex_count: u16,
    pub first_face_vertex_index: u32,
    pub face_vertex_count: u32,
    pub first_face_index_id: u64,
}

impl MeshRecord {
    pub const BLOCK_ID: u16 = 3;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        let alpha_enum = reader.read_u8()?;
        let shadow_enum = reader.read_u8()?;
        reader.seek(SeekFrom::Current(2))?;
        let material_instance_id = reader.read_u16::<LE>()?;
        let bone_group_id = reader.read_u16::<LE>()?;
        let mesh_format_id = reader.read_u16::<LE>()?;
        let vertex_count = reader.read_u16::<LE>()?;
        reader.seek(SeekFrom::Current(4))?;
        let first_face_vertex_index = reader.read_u32::<LE>()?;
        let face_vertex_count = reader.read_u32::<LE>()?;
        let first_face_index_id = reader.read_u64::<LE>()?;
        Ok(Self {
            alpha_enum,
            shadow_enum,
            material_instance_id,
            bone_group_id,
            mesh_format_id,
            vertex_count,
            first_face_vertex_index,
            face_vertex_count,
            first_face_index_id,
        })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u8(self.alpha_enum)?;
        bytes.write_u8(self.shadow_enum)?;
        bytes.extend_from_slice(&[0; 2]);
        bytes.write_u16::<LE>(self.material_instance_id)?;
        bytes.write_u16::<LE>(self.bone_group_id)?;
        bytes.write_u16::<LE>(self.mesh_format_id)?;
        bytes.write_u16::<LE>(self.vertex_count)?;
        bytes.extend_from_slice(&[0; 4]);
        bytes.write_u32::<LE>(self.first_face_vertex_index)?;
        bytes.write_u32::<LE>(self.face_vertex_count)?;
        bytes.write_u64::<LE>(self.first_face_index_id)?;
        bytes.extend_from_slice(&[0; 16]);
        Ok(())
    }
}

/// A material instance definition (block 4).
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialInstanceRecord {
    pub name_string_id: u16,
    pub material_id: u16,
    pub texture_count: u8,
    pub parameter_count: u8,
    /// First block 7 record of the instance's texture assignments.
    pub first_texture_id: u16,
    /// First block 7 record of the instance's parameter assignments.
    pub first_parameter_id: u16,
}

impl MaterialInstanceRecord {
    pub const BLOCK_ID: u16 = 4;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        let name_string_id = reader.read_u16::<LE>()?;
        reader.seek(SeekFrom::Current(2))?;
        let material_id = reader.read_u16::<LE>()?;
        let texture_count = reader.read_u8()?;
        let parameter_count = reader.read_u8()?;
        let first_texture_id = reader.read_u16::<LE>()?;
        let first_parameter_id = reader.read_u16::<LE>()?;
        Ok(Self {
            name_string_id,
            material_id,
            texture_count,
            parameter_count,
            first_texture_id,
            first_parameter_id,
        })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<LE>(self.name_string_id)?;
        bytes.write_u16::<LE>(0)?;
        bytes.write_u16::<LE>(self.material_id)?;
        bytes.write_u8(self.texture_count)?;
        bytes.write_u8(self.parameter_count)?;
        bytes.write_u16::<LE>(self.first_texture_id)?;
        bytes.write_u16::<LE>(self.first_parameter_id)?;
        bytes.write_u32::<LE>(0)?;
        Ok(())
    }
}

/// A bone group: the per-mesh window of bones that vertex bone indices
/// select from (block 5).
#[derive(Debug, Clone, PartialEq)]
pub struct BoneGroupRecord {
    pub bone_ids: Vec<u16>,
}

impl BoneGroupRecord {
    pub const BLOCK_ID: u16 = 5;

    const MAX_BONES: usize = 32;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        reader.read_u16::<LE>()?;
        // Some assets declare more entries than the record can hold; read at
        // most the 32 that fit.
        let count = usize::from(reader.read_u16::<LE>()?).min(Self::MAX_BONES);
        let mut bone_ids = Vec::with_capacity(count);
        for _ in 0..count {
            bone_ids.push(reader.read_u16::<LE>()?);
        }
        Ok(Self { bone_ids })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        if self.bone_ids.len() > Self::MAX_BONES {
            return Err(Error::BoneGroupOverflow(self.bone_ids.len()));
        }
        bytes.write_u16::<LE>(4)?;
        bytes.write_u16::<LE>(self.bone_ids.len() as u16)?;
        for &bone_id in &self.bone_ids {
            bytes.write_u16::<LE>(bone_id)?;
        }
        bytes.resize(bytes.len() + 2 * (Self::MAX_BONES - self.bone_ids.len()), 0);
        Ok(())
    }
}

/// A texture file reference (block 6).
#[derive(Debug, Clone, PartialEq)]
pub struct TextureRecord {
    pub filename_string_id: u16,
    pub directory_string_id: u16,
}

impl TextureRecord {
    pub const BLOCK_ID: u16 = 6;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        Ok(Self {
            filename_string_id: reader.read_u16::<LE>()?,
            directory_string_id: reader.read_u16::<LE>()?,
        })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<LE>(self.filename_string_id)?;
        bytes.write_u16::<LE>(self.directory_string_id)?;
        Ok(())
    }
}

/// Binds a name to either a texture or a material parameter record
/// (block 7). Texture and parameter windows of one material instance both
/// point into this block.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterAssignmentRecord {
    pub name_string_id: u16,
    pub reference_id: u16,
}

impl ParameterAssignmentRecord {
    pub const BLOCK_ID: u16 = 7;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        Ok(Self {
            name_string_id: reader.read_u16::<LE>()?,
            reference_id: reader.read_u16::<LE>()?,
        })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<LE>(self.name_string_id)?;
        bytes.write_u16::<LE>(self.reference_id)?;
        Ok(())
    }
}

/// A shader/technique pair (block 8). The shader comes first on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialRecord {
    pub shader_string_id: u16,
    pub technique_string_id: u16,
}

impl MaterialRecord {
    pub const BLOCK_ID: u16 = 8;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        Ok(Self {
            shader_string_id: reader.read_u16::<LE>()?,
            technique_string_id: reader.read_u16::<LE>()?,
        })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<LE>(self.shader_string_id)?;
        bytes.write_u16::<LE>(self.technique_string_id)?;
        Ok(())
    }
}

/// Selects the windows of mesh format and vertex format records that make up
/// one mesh's vertex layout (block 9).
#[derive(Debug, Clone, PartialEq)]
pub struct MeshFormatAssignmentRecord {
    pub mesh_format_count: u8,
    pub vertex_format_count: u8,
    pub uv_count: u8,
    pub first_mesh_format_id: u16,
    pub first_vertex_format_id: u16,
}

impl MeshFormatAssignmentRecord {
    pub const BLOCK_ID: u16 = 9;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        let mesh_format_count = reader.read_u8()?;
        let vertex_format_count = reader.read_u8()?;
        reader.read_u8()?;
        let uv_count = reader.read_u8()?;
        let first_mesh_format_id = reader.read_u16::<LE>()?;
        let first_vertex_format_id = reader.read_u16::<LE>()?;
        Ok(Self {
            mesh_format_count,
            vertex_format_count,
            uv_count,
            first_mesh_format_id,
            first_vertex_format_id,
        })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u8(self.mesh_format_count)?;
        bytes.write_u8(self.vertex_format_count)?;
        bytes.write_u8(0)?;
        bytes.write_u8(self.uv_count)?;
        bytes.write_u16::<LE>(self.first_mesh_format_id)?;
        bytes.write_u16::<LE>(self.first_vertex_format_id)?;
        Ok(())
    }
}

/// Places a run of vertex format entries into a buffer (block 10).
#[derive(Debug, Clone, PartialEq)]
pub struct MeshFormatRecord {
    /// Index of a buffer offset (block 14) record.
    pub buffer_id: u8,
    pub vertex_format_count: u8,
    /// The per-vertex stride of the buffer, in bytes.
    pub stride: u8,
    /// Category of the entries: 0 position, 1 normal/tangent, 2 color,
    /// 3 bone mapping and UV.
    pub format_type: u8,
    /// Offset of this mesh's data within the buffer.
    pub buffer_offset: u32,
}

impl MeshFormatRecord {
    pub const BLOCK_ID: u16 = 10;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        Ok(Self {
            buffer_id: reader.read_u8()?,
            vertex_format_count: reader.read_u8()?,
            stride: reader.read_u8()?,
            format_type: reader.read_u8()?,
            buffer_offset: reader.read_u32::<LE>()?,
        })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u8(self.buffer_id)?;
        bytes.write_u8(self.vertex_format_count)?;
        bytes.write_u8(self.stride)?;
        bytes.write_u8(self.format_type)?;
        bytes.write_u32::<LE>(self.buffer_offset)?;
        Ok(())
    }
}

/// One vertex attribute of a layout (block 11). Unknown type or format
/// values are rejected at decode time.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexFormatRecord {
    pub datum_type: VertexDatumType,
    pub datum_format: VertexDatumFormat,
    /// Offset of the attribute within the per-vertex stride.
    pub offset: u16,
}

impl VertexFormatRecord {
    pub const BLOCK_ID: u16 = 11;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        let datum_type = VertexDatumType::from_id(reader.read_u8()?)?;
        let datum_format = VertexDatumFormat::from_id(reader.read_u8()?)?;
        let offset = reader.read_u16::<LE>()?;
        Ok(Self {
            datum_type,
            datum_format,
            offset,
        })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u8(self.datum_type.id())?;
        bytes.write_u8(self.datum_format.id())?;
        bytes.write_u16::<LE>(self.offset)?;
        Ok(())
    }
}

/// Locates a string inside a segment 1 block (block 12). The recorded length
/// excludes the NUL terminator the pool also stores.
#[derive(Debug, Clone, PartialEq)]
pub struct StringRecord {
    pub block_id: u16,
    pub length: u16,
    pub offset: u32,
}

impl StringRecord {
    pub const BLOCK_ID: u16 = 12;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        Ok(Self {
            block_id: reader.read_u16::<LE>()?,
            length: reader.read_u16::<LE>()?,
            offset: reader.read_u32::<LE>()?,
        })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u16::<LE>(self.block_id)?;
        bytes.write_u16::<LE>(self.length)?;
        bytes.write_u32::<LE>(self.offset)?;
        Ok(())
    }
}

pub const BOUNDING_BOX_BLOCK_ID: u16 = 13;

/// Reads a bounding box record (block 13): maximum corner, then minimum.
pub fn read_bounding_box(bytes: &[u8]) -> Result<BoundingBox> {
    let mut reader = Cursor::new(bytes);
    let max = read_vec4(&mut reader)?;
    let min = read_vec4(&mut reader)?;
    Ok(BoundingBox { max, min })
}

pub fn write_bounding_box(bounding_box: &BoundingBox, bytes: &mut Vec<u8>) -> Result<()> {
    write_vec4(bytes, bounding_box.max)?;
    write_vec4(bytes, bounding_box.min)?;
    Ok(())
}

/// The base offset of one of the vertex block's buffers (block 14).
#[derive(Debug, Clone, PartialEq)]
pub struct BufferOffsetRecord {
    /// Set on the final record; consumers rely on the flag.
    pub last: bool,
    pub length: u32,
    pub offset: u32,
}

impl BufferOffsetRecord {
    pub const BLOCK_ID: u16 = 14;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        let last = reader.read_u32::<LE>()? != 0;
        let length = reader.read_u32::<LE>()?;
        let offset = reader.read_u32::<LE>()?;
        Ok(Self {
            last,
            length,
            offset,
        })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u32::<LE>(u32::from(self.last))?;
        bytes.write_u32::<LE>(self.length)?;
        bytes.write_u32::<LE>(self.offset)?;
        bytes.extend_from_slice(&[0; 4]);
        Ok(())
    }
}

/// The level-of-detail table header (block 16). Typical assets use a single
/// level; the trailing floats have no known meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct LodRecord {
    pub levels: u32,
}

impl LodRecord {
    pub const BLOCK_ID: u16 = 16;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        let levels = reader.read_u32::<LE>()?;
        Ok(Self { levels })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u32::<LE>(self.levels)?;
        for _ in 0..3 {
            bytes.write_f32::<LE>(1.0)?;
        }
        Ok(())
    }
}

/// A per-level-of-detail slice of a mesh's triangle indices (block 17).
#[derive(Debug, Clone, PartialEq)]
pub struct FaceIndexRecord {
    pub first_face_vertex_index: u32,
    pub face_vertex_count: u32,
}

impl FaceIndexRecord {
    pub const BLOCK_ID: u16 = 17;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        Ok(Self {
            first_face_vertex_index: reader.read_u32::<LE>()?,
            face_vertex_count: reader.read_u32::<LE>()?,
        })
    }

    pub fn to_bytes(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.write_u32::<LE>(self.first_face_vertex_index)?;
        bytes.write_u32::<LE>(self.face_vertex_count)?;
        Ok(())
    }
}

fn read_vec4(reader: &mut Cursor<&[u8]>) -> Result<Vec4> {
    let mut components = [0f32; 4];
    reader.read_f32_into::<LE>(&mut components)?;
    Ok(Vec4::from(components))
}

fn write_vec4(bytes: &mut Vec<u8>, value: Vec4) -> Result<()> {
    for component in value.to_array() {
        bytes.write_f32::<LE>(component)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn bone_record_round_trip() {
        let record = BoneRecord {
            name_string_id: 3,
            parent_id: -1,
            bounding_box_id: 1,
            local_position: Vec4::new(1.0, 2.0, 3.0, 4.0),
            global_position: Vec4::new(5.0, 6.0, 7.0, 8.0),
        };

        let mut bytes = Vec::new();
        record.to_bytes(&mut bytes).unwrap();

        assert_eq!(48, bytes.len());
        assert_eq!(record, BoneRecord::from_bytes(&bytes).unwrap());
    }

    #[test]
    fn mesh_record_layout() {
        let record = MeshRecord {
            alpha_enum: 1,
            shadow_enum: 2,
            material_instance_id: 3,
            bone_group_id: 4,
            mesh_format_id: 5,
            vertex_count: 6,
            first_face_vertex_index: 7,
            face_vertex_count: 9,
            first_face_index_id: 10,
        };

        let mut bytes = Vec::new();
        record.to_bytes(&mut bytes).unwrap();

        assert_eq!(48, bytes.len());
        assert_eq!(
            [1, 2, 0, 0, 3, 0, 4, 0, 5, 0, 6, 0, 0, 0, 0, 0, 7, 0, 0, 0],
            bytes[..20]
        );
        assert_eq!(record, MeshRecord::from_bytes(&bytes).unwrap());
    }

    #[test]
    fn bone_group_record_pads_to_record_size() {
        let record = BoneGroupRecord {
            bone_ids: vec![8, 9, 10],
        };

        let mut bytes = Vec::new();
        record.to_bytes(&mut bytes).unwrap();

        assert_eq!(68, bytes.len());
        assert_eq!(record, BoneGroupRecord::from_bytes(&bytes).unwrap());
    }

    #[test]
    fn bone_group_record_holds_exactly_32_bones() {
        let record = BoneGroupRecord {
            bone_ids: (0..32).collect(),
        };

        let mut bytes = Vec::new();
        record.to_bytes(&mut bytes).unwrap();

        assert_eq!(68, bytes.len());
        assert_eq!(record, BoneGroupRecord::from_bytes(&bytes).unwrap());
    }

    #[test]
    fn bone_group_record_rejects_more_than_32_bones() {
        let record = BoneGroupRecord {
            bone_ids: (0..33).collect(),
        };

        let mut bytes = Vec::new();
        assert!(matches!(
            record.to_bytes(&mut bytes),
            Err(Error::BoneGroupOverflow(33))
        ));
    }

    #[test]
    fn bone_group_record_clamps_oversized_count() {
        // A corrupt count field declares more bones than the record holds.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&40u16.to_le_bytes());
        for i in 0..32u16 {
            bytes.extend_from_slice(&i.to_le_bytes());
        }

        let record = BoneGroupRecord::from_bytes(&bytes).unwrap();
        assert_eq!(32, record.bone_ids.len());
    }

    #[test]
    fn vertex_format_record_rejects_unknown_ids() {
        assert!(matches!(
            VertexFormatRecord::from_bytes(&[12, 7, 0, 0]),
            Err(Error::InvalidFormat(_))
        ));
        assert!(matches!(
            VertexFormatRecord::from_bytes(&[8, 2, 0, 0]),
            Err(Error::InvalidFormat(_))
        ));
    }
}
