//! Vertex layout vocabulary: attribute and packing enumerations, and the
//! fully resolved per-attribute plan a mesh format decodes into.

use crate::error::{Error, Result};

/// Identifies which vertex attribute a vertex format entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexDatumType {
    Position,
    BoneWeights,
    Normal,
    Color,
    BoneIndices,
    Uv0,
    Uv1,
    Uv2,
    Uv3,
    Tangent,
}

impl VertexDatumType {
    pub fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            0 => Self::Position,
            1 => Self::BoneWeights,
            2 => Self::Normal,
            3 => Self::Color,
            7 => Self::BoneIndices,
            8 => Self::Uv0,
            9 => Self::Uv1,
            10 => Self::Uv2,
            11 => Self::Uv3,
            14 => Self::Tangent,
            _ => {
                return Err(Error::InvalidFormat(format!(
                    "invalid vertex datum type {}",
                    id
                )))
            }
        })
    }

    pub fn id(self) -> u8 {
        match self {
            Self::Position => 0,
            Self::BoneWeights => 1,
            Self::Normal => 2,
            Self::Color => 3,
            Self::BoneIndices => 7,
            Self::Uv0 => 8,
            Self::Uv1 => 9,
            Self::Uv2 => 10,
            Self::Uv3 => 11,
            Self::Tangent => 14,
        }
    }

    /// The packing each datum type is bound to, on both read and write.
    pub fn format(self) -> VertexDatumFormat {
        match self {
            Self::Position => VertexDatumFormat::TripleFloat32,
            Self::BoneWeights | Self::Color => VertexDatumFormat::QuadFloat8,
            Self::Normal | Self::Tangent => VertexDatumFormat::QuadFloat16,
            Self::BoneIndices => VertexDatumFormat::QuadInt8,
            Self::Uv0 | Self::Uv1 | Self::Uv2 | Self::Uv3 => VertexDatumFormat::DoubleFloat16,
        }
    }

    /// The UV channel number, for the four UV datum types.
    pub fn uv_channel(self) -> Option<usize> {
        match self {
            Self::Uv0 => Some(0),
            Self::Uv1 => Some(1),
            Self::Uv2 => Some(2),
            Self::Uv3 => Some(3),
            _ => None,
        }
    }

    pub fn uv(channel: usize) -> Self {
        match channel {
            0 => Self::Uv0,
            1 => Self::Uv1,
            2 => Self::Uv2,
            3 => Self::Uv3,
            _ => unreachable!("uv channel {} out of range", channel),
        }
    }
}

/// Identifies how a vertex attribute is packed in the vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexDatumFormat {
    TripleFloat32,
    QuadFloat16,
    DoubleFloat16,
    QuadFloat8,
    QuadInt8,
}

impl VertexDatumFormat {
    pub fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            1 => Self::TripleFloat32,
            6 => Self::QuadFloat16,
            7 => Self::DoubleFloat16,
            8 => Self::QuadFloat8,
            9 => Self::QuadInt8,
            _ => {
                return Err(Error::InvalidFormat(format!(
                    "invalid vertex datum format {}",
                    id
                )))
            }
        })
    }

    pub fn id(self) -> u8 {
        match self {
            Self::TripleFloat32 => 1,
            Self::QuadFloat16 => 6,
            Self::DoubleFloat16 => 7,
            Self::QuadFloat8 => 8,
            Self::QuadInt8 => 9,
        }
    }

    /// The number of bytes one value of this packing occupies per vertex.
    pub fn size(self) -> usize {
        match self {
            Self::TripleFloat32 => 12,
            Self::QuadFloat16 => 8,
            Self::DoubleFloat16 | Self::QuadFloat8 | Self::QuadInt8 => 4,
        }
    }
}

/// One fully resolved entry of a mesh's vertex layout: which attribute, how
/// it is packed, its absolute offset in the vertex block, and the per-vertex
/// stride.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatEntry {
    pub datum_type: VertexDatumType,
    pub datum_format: VertexDatumFormat,
    pub offset: usize,
    pub stride: usize,
}
