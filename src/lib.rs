//! Codec for the FMDL 3D model container format used by Pro Evolution
//! Soccer.
//!
//! The format is a two-segment, block-indexed container of fixed-size
//! records and variable-length byte buffers. [`FmdlContainer`] reads and
//! writes that framing; [`Fmdl`] translates the opaque blocks into a
//! semantic model of bones, mesh groups, meshes, materials, and textures,
//! and back.
//!
//! The format is not formally documented, so the codec mirrors what the
//! game's own assets accept and emit, including a few liberal-reader
//! concessions for known producer bugs.

pub mod container;
pub mod error;
pub mod half;
pub mod model;
pub mod records;
pub mod vertex;

mod reader;
mod writer;

pub use container::FmdlContainer;
pub use error::{Error, Result};
pub use model::{
    Bone, BoneGroup, BoundingBox, Face, Fmdl, MaterialInstance, Mesh, MeshGroup, Texture, Vertex,
    VertexFields,
};
pub use vertex::{FormatEntry, VertexDatumFormat, VertexDatumType};
