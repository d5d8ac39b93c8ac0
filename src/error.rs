use thiserror::Error;

/// The error type for FMDL read and write operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The stream does not hold a well-formed FMDL container: bad magic,
    /// truncated header, or truncated descriptor table.
    #[error("invalid container: {0}")]
    InvalidContainer(String),

    /// The stream ended in the middle of a block payload.
    #[error("unexpected end of file: {0}")]
    Truncated(String),

    /// The same (segment, block id) pair appeared twice.
    #[error("duplicate segment {segment} block {block_id}")]
    DuplicateBlock { segment: u8, block_id: u32 },

    /// An integer reference did not resolve to an existing entity.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// A string descriptor pointed at bytes that are not UTF-8.
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// A bone or mesh group is its own (direct or indirect) ancestor.
    #[error("parent loop detected in {0} hierarchy")]
    ParentCycle(&'static str),

    /// The mesh format tables (blocks 9, 10, 14) are mutually inconsistent.
    #[error("malformed mesh format: {0}")]
    MalformedFormat(String),

    /// Unknown or mismatched vertex datum type/format.
    #[error("invalid vertex format: {0}")]
    InvalidFormat(String),

    /// A mesh never appeared in any mesh group assignment.
    #[error("mesh {0} not assigned to a mesh group")]
    UnassignedMesh(usize),

    /// A mesh was claimed by two mesh group assignments, or a texture role or
    /// material parameter name was reused within one material instance.
    #[error("duplicate assignment: {0}")]
    DuplicateAssignment(String),

    /// A bone group holds more than the 32 bones the format can index.
    #[error("bone group holds {0} bones, the format limit is 32")]
    BoneGroupOverflow(usize),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
