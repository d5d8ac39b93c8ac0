//! The semantic model: the entity graph downstream tools manipulate.
//!
//! Entities live in arenas on [`Fmdl`] and refer to each other by index, so
//! the bone and mesh group trees stay acyclic by construction of the parent
//! links rather than by reference cycles.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, Write};

use glam::{Vec2, Vec3, Vec4};

use crate::container::FmdlContainer;
use crate::error::Result;
use crate::{reader, writer};

/// Represents a complete FMDL model: skeleton, materials, meshes, and the
/// mesh group tree. It's the in-memory form between a read and a write.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Fmdl {
    pub bones: Vec<Bone>,
    pub material_instances: Vec<MaterialInstance>,
    pub meshes: Vec<Mesh>,
    pub mesh_groups: Vec<MeshGroup>,
}

impl Fmdl {
    /// Deserializes a model from the bytes of an FMDL file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read(&mut Cursor::new(bytes))
    }

    /// Serializes the model into the bytes of an FMDL file.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write(&mut bytes)?;
        Ok(bytes)
    }

    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let container = FmdlContainer::read(reader)?;
        Self::from_container(&container)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.to_container()?.write(writer)
    }

    /// Builds the semantic model from a decoded container.
    pub fn from_container(container: &FmdlContainer) -> Result<Self> {
        reader::parse(container)
    }

    /// Serializes the semantic model into a fresh container.
    pub fn to_container(&self) -> Result<FmdlContainer> {
        writer::serialize(self)
    }
}

/// An axis-aligned bounding box. The maximum corner comes first on disk.
#[derive(Debug, Default, PartialEq, Clone, Copy)]
pub struct BoundingBox {
    pub max: Vec4,
    pub min: Vec4,
}

/// A joint of the skeleton tree.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Bone {
    pub name: String,
    /// The index of the parent bone in [`Fmdl::bones`], if any.
    pub parent: Option<usize>,
    /// The indices of the children of the bone, in source order.
    pub children: Vec<usize>,
    pub bounding_box: BoundingBox,
    /// The semantics of this pair vary across games using FMDL, and even
    /// across bones of one model. Kept as opaque values.
    pub local_position: Vec4,
    pub global_position: Vec4,
}

/// An ordered set of up to 32 bones. The position of a bone in the list is
/// the per-group index that a vertex's bone-index bytes refer to.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct BoneGroup {
    /// Indices into [`Fmdl::bones`].
    pub bones: Vec<usize>,
}

/// A texture file reference.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Texture {
    pub filename: String,
    pub directory: String,
}

/// A material instance: a shader/technique pair plus its textures and
/// parameter vectors. Role and parameter names are unique per instance.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct MaterialInstance {
    pub name: String,
    pub technique: String,
    pub shader: String,
    /// `(role name, texture)` pairs, in source order.
    pub textures: Vec<(String, Texture)>,
    /// `(parameter name, values)` pairs, in source order.
    pub parameters: Vec<(String, [f32; 4])>,
}

/// A single mesh vertex with its decoded attributes.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Option<Vec4>,
    pub tangent: Option<Vec4>,
    pub color: Option<[f32; 4]>,
    /// UV channels, monotonic: channel `i` exists only if all lower channels
    /// do.
    pub uv: Vec<Vec2>,
    /// Bone weights keyed by bone index into [`Fmdl::bones`]. `Some` marks
    /// the vertex as skinned even when every weight was dropped.
    pub bone_mapping: Option<BTreeMap<usize, f32>>,
}

/// A triangle. Indices refer to the owning mesh's vertex list.
#[derive(Debug, Default, PartialEq, Clone, Copy)]
pub struct Face {
    pub vertices: [u16; 3],
}

/// Summarizes which optional vertex attributes exist on a mesh, and which UV
/// channels share storage.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct VertexFields {
    pub has_normal: bool,
    pub has_tangent: bool,
    pub has_color: bool,
    pub has_bone_mapping: bool,
    pub uv_count: usize,
    /// For each UV channel, the other channels aliased to the same storage.
    /// A read fills an entry (possibly empty) for every channel.
    pub uv_equalities: BTreeMap<usize, Vec<usize>>,
}

/// A mesh: geometry plus its material and skinning bindings.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub faces: Vec<Face>,
    pub bone_group: Option<BoneGroup>,
    /// Index into [`Fmdl::material_instances`].
    pub material_instance: usize,
    pub alpha_enum: u8,
    pub shadow_enum: u8,
    pub vertex_fields: VertexFields,
}

/// A node of the mesh group tree.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct MeshGroup {
    pub name: String,
    /// The index of the parent group in [`Fmdl::mesh_groups`], if any.
    pub parent: Option<usize>,
    /// The indices of the children of the group, in source order.
    pub children: Vec<usize>,
    /// Indices into [`Fmdl::meshes`].
    pub meshes: Vec<usize>,
    /// `None` only for groups never named by an assignment record; the
    /// writer emits an all-zero box for those.
    pub bounding_box: Option<BoundingBox>,
    pub visible: bool,
}
