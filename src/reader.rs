//! Builds the semantic model out of a decoded container: resolves string and
//! bounding box references, reconstructs the bone and mesh group trees,
//! plans each mesh's vertex layout, and materializes vertices and faces.

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LE};
use glam::{Vec2, Vec3, Vec4};

use crate::container::FmdlContainer;
use crate::error::{Error, Result};
use crate::half;
use crate::model::{
    Bone, BoneGroup, BoundingBox, Face, Fmdl, MaterialInstance, Mesh, MeshGroup, Texture, Vertex,
    VertexFields,
};
use crate::records::{
    read_bounding_box, BoneGroupRecord, BoneRecord, BufferOffsetRecord, FaceIndexRecord, LodRecord,
    MaterialInstanceRecord, MaterialRecord, MeshFormatAssignmentRecord, MeshFormatRecord,
    MeshGroupAssignmentRecord, MeshGroupRecord, MeshRecord, ParameterAssignmentRecord,
    StringRecord, TextureRecord, VertexFormatRecord, BOUNDING_BOX_BLOCK_ID,
    MATERIAL_PARAMETERS_BLOCK_ID, VERTEX_BLOCK_ID,
};
use crate::vertex::{FormatEntry, VertexDatumType};

/// Weights at or below this threshold are treated as unweighted slots.
const MIN_BONE_WEIGHT: f32 = 1e-6;

pub(crate) fn parse(container: &FmdlContainer) -> Result<Fmdl> {
    let strings = parse_strings(container)?;
    let bounding_boxes = parse_bounding_boxes(container)?;
    let bones = parse_bones(container, &strings, &bounding_boxes)?;
    let material_instances = parse_material_instances(container, &strings)?;
    let meshes = parse_meshes(container, bones.len(), material_instances.len())?;
    let mesh_groups = parse_mesh_groups(container, &strings, &bounding_boxes, meshes.len())?;

    Ok(Fmdl {
        bones,
        material_instances,
        meshes,
        mesh_groups,
    })
}

fn records(container: &FmdlContainer, block_id: u16) -> &[Vec<u8>] {
    container
        .segment0_blocks
        .get(&block_id)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn lookup<'a, T>(items: &'a [T], id: usize, what: &str) -> Result<&'a T> {
    items
        .get(id)
        .ok_or_else(|| Error::InvalidReference(format!("invalid {} {}", what, id)))
}

fn parse_strings(container: &FmdlContainer) -> Result<Vec<String>> {
    let mut strings = Vec::new();
    for bytes in records(container, StringRecord::BLOCK_ID) {
        let record = StringRecord::from_bytes(bytes)?;

        let block = container
            .segment1_blocks
            .get(&u32::from(record.block_id))
            .ok_or_else(|| {
                Error::InvalidReference(format!(
                    "invalid block {} referenced by string",
                    record.block_id
                ))
            })?;

        let start = record.offset as usize;
        let end = start + record.length as usize;
        if end > block.len() {
            return Err(Error::InvalidReference(format!(
                "invalid block location {}+{} referenced by string",
                record.offset, record.length
            )));
        }

        let string = std::str::from_utf8(&block[start..end]).map_err(|_| {
            Error::InvalidString(format!("invalid unicode in string at offset {}", start))
        })?;
        strings.push(string.to_owned());
    }
    Ok(strings)
}

fn parse_bounding_boxes(container: &FmdlContainer) -> Result<Vec<BoundingBox>> {
    records(container, BOUNDING_BOX_BLOCK_ID)
        .iter()
        .map(|bytes| read_bounding_box(bytes))
        .collect()
}

fn parse_bones(
    container: &FmdlContainer,
    strings: &[String],
    bounding_boxes: &[BoundingBox],
) -> Result<Vec<Bone>> {
    let entries = records(container, BoneRecord::BLOCK_ID);

    let mut bones = Vec::with_capacity(entries.len());
    let mut parent_ids = Vec::with_capacity(entries.len());
    for bytes in entries {
        let record = BoneRecord::from_bytes(bytes)?;

        let name = lookup(
            strings,
            record.name_string_id.into(),
            "string referenced by bone",
        )?
        .clone();
        let bounding_box = *lookup(
            bounding_boxes,
            record.bounding_box_id.into(),
            "bounding box referenced by bone",
        )?;

        parent_ids.push(record.parent_id);
        bones.push(Bone {
            name,
            parent: None,
            children: Vec::new(),
            bounding_box,
            local_position: record.local_position,
            global_position: record.global_position,
        });
    }

    resolve_parents(&parent_ids, "bone", |child, parent| {
        bones[child].parent = Some(parent);
        bones[parent].children.push(child);
    })?;
    detect_parent_cycles(
        &bones.iter().map(|bone| bone.parent).collect::<Vec<_>>(),
        "bone",
    )?;

    Ok(bones)
}

/// Resolves signed parent ids into links; `-1` means no parent. The callback
/// runs once per (child, parent) pair, children in source order.
fn resolve_parents(
    parent_ids: &[i16],
    kind: &'static str,
    mut link: impl FnMut(usize, usize),
) -> Result<()> {
    for (child, &parent_id) in parent_ids.iter().enumerate() {
        if parent_id < 0 {
            continue;
        }
        let parent = parent_id as usize;
        if parent >= parent_ids.len() {
            return Err(Error::InvalidReference(format!(
                "invalid {} parent id {}",
                kind, parent_id
            )));
        }
        link(child, parent);
    }
    Ok(())
}

/// Walks every ancestor chain; a chain longer than the arena can only mean a
/// cycle in the parent links.
fn detect_parent_cycles(parents: &[Option<usize>], kind: &'static str) -> Result<()> {
    for start in 0..parents.len() {
        let mut node = start;
        let mut hops = 0;
        while let Some(parent) = parents[node] {
            hops += 1;
            if hops > parents.len() {
                return Err(Error::ParentCycle(kind));
            }
            node = parent;
        }
    }
    Ok(())
}

fn parse_textures(container: &FmdlContainer, strings: &[String]) -> Result<Vec<Texture>> {
    let mut textures = Vec::new();
    for bytes in records(container, TextureRecord::BLOCK_ID) {
        let record = TextureRecord::from_bytes(bytes)?;
        textures.push(Texture {
            filename: lookup(
                strings,
                record.filename_string_id.into(),
                "string referenced by texture",
            )?
            .clone(),
            directory: lookup(
                strings,
                record.directory_string_id.into(),
                "string referenced by texture",
            )?
            .clone(),
        });
    }
    Ok(textures)
}

/// Parses block 8 into `(technique, shader)` pairs. The shader is stored
/// first on disk.
fn parse_materials(container: &FmdlContainer, strings: &[String]) -> Result<Vec<(String, String)>> {
    let mut materials = Vec::new();
    for bytes in records(container, MaterialRecord::BLOCK_ID) {
        let record = MaterialRecord::from_bytes(bytes)?;
        let shader = lookup(
            strings,
            record.shader_string_id.into(),
            "string referenced by material",
        )?;
        let technique = lookup(
            strings,
            record.technique_string_id.into(),
            "string referenced by material",
        )?;
        materials.push((technique.clone(), shader.clone()));
    }
    Ok(materials)
}

/// Parses block 7 into `(name, reference)` pairs shared by texture and
/// material parameter assignments.
fn parse_assignments(container: &FmdlContainer, strings: &[String]) -> Result<Vec<(String, u16)>> {
    let mut assignments = Vec::new();
    for bytes in records(container, ParameterAssignmentRecord::BLOCK_ID) {
        let record = ParameterAssignmentRecord::from_bytes(bytes)?;
        let name = lookup(
            strings,
            record.name_string_id.into(),
            "string referenced by texture / material parameter assignment",
        )?;
        assignments.push((name.clone(), record.reference_id));
    }
    Ok(assignments)
}

/// Parses segment 1 block 0: consecutive 16-byte vectors of four floats. A
/// trailing partial record is ignored.
fn parse_material_parameters(container: &FmdlContainer) -> Vec<[f32; 4]> {
    let block = match container.segment1_blocks.get(&MATERIAL_PARAMETERS_BLOCK_ID) {
        Some(block) => block,
        None => return Vec::new(),
    };

    block
        .chunks_exact(16)
        .map(|chunk| {
            let mut values = [0f32; 4];
            LE::read_f32_into(chunk, &mut values);
            values
        })
        .collect()
}

fn parse_material_instances(
    container: &FmdlContainer,
    strings: &[String],
) -> Result<Vec<MaterialInstance>> {
    let entries = records(container, MaterialInstanceRecord::BLOCK_ID);
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    let materials = parse_materials(container, strings)?;
    let textures = parse_textures(container, strings)?;
    let parameter_values = parse_material_parameters(container);
    let assignments = parse_assignments(container, strings)?;

    let mut instances = Vec::with_capacity(entries.len());
    for bytes in entries {
        let record = MaterialInstanceRecord::from_bytes(bytes)?;

        let name = lookup(
            strings,
            record.name_string_id.into(),
            "string referenced by material instance",
        )?
        .clone();
        let (technique, shader) = lookup(
            &materials,
            record.material_id.into(),
            "material referenced by material instance",
        )?
        .clone();

        let mut instance_textures: Vec<(String, Texture)> =
            Vec::with_capacity(record.texture_count.into());
        let first = usize::from(record.first_texture_id);
        for i in first..first + usize::from(record.texture_count) {
            let (role, texture_id) = lookup(
                &assignments,
                i,
                "texture assignment referenced by material instance",
            )?;
            let texture = lookup(
                &textures,
                (*texture_id).into(),
                "texture referenced by texture assignment",
            )?;

            if instance_textures.iter().any(|(existing, _)| existing == role) {
                return Err(Error::DuplicateAssignment(format!(
                    "texture role '{}' reused by material instance '{}'",
                    role, name
                )));
            }
            instance_textures.push((role.clone(), texture.clone()));
        }

        let mut instance_parameters: Vec<(String, [f32; 4])> =
            Vec::with_capacity(record.parameter_count.into());
        let first = usize::from(record.first_parameter_id);
        for i in first..first + usize::from(record.parameter_count) {
            let (parameter, values_id) = lookup(
                &assignments,
                i,
                "material parameter assignment referenced by material instance",
            )?;
            let values = lookup(
                &parameter_values,
                (*values_id).into(),
                "material parameter referenced by material parameter assignment",
            )?;

            if instance_parameters
                .iter()
                .any(|(existing, _)| existing == parameter)
            {
                return Err(Error::DuplicateAssignment(format!(
                    "material parameter '{}' reused by material instance '{}'",
                    parameter, name
                )));
            }
            instance_parameters.push((parameter.clone(), *values));
        }

        instances.push(MaterialInstance {
            name,
            technique,
            shader,
            textures: instance_textures,
            parameters: instance_parameters,
        });
    }
    Ok(instances)
}

fn parse_bone_groups(container: &FmdlContainer, bone_count: usize) -> Result<Vec<BoneGroup>> {
    let mut groups = Vec::new();
    for bytes in records(container, BoneGroupRecord::BLOCK_ID) {
        let record = BoneGroupRecord::from_bytes(bytes)?;
        let mut bones = Vec::with_capacity(record.bone_ids.len());
        for &bone_id in &record.bone_ids {
            if usize::from(bone_id) >= bone_count {
                return Err(Error::InvalidReference(format!(
                    "invalid bone {} referenced by bone group",
                    bone_id
                )));
            }
            bones.push(bone_id.into());
        }
        groups.push(BoneGroup { bones });
    }
    Ok(groups)
}

/// Validates the level-of-detail table: required, holding exactly one
/// record, whenever the container holds meshes.
fn parse_levels_of_detail(container: &FmdlContainer) -> Result<u32> {
    match container.segment0_blocks.get(&LodRecord::BLOCK_ID) {
        None => Err(Error::MalformedFormat(
            "level of detail specification missing".into(),
        )),
        Some(entries) if entries.len() != 1 => Err(Error::MalformedFormat(format!(
            "expected 1 level of detail record, found {}",
            entries.len()
        ))),
        Some(entries) => Ok(LodRecord::from_bytes(&entries[0])?.levels),
    }
}

fn parse_face_indices(container: &FmdlContainer) -> Result<Vec<(u32, u32)>> {
    records(container, FaceIndexRecord::BLOCK_ID)
        .iter()
        .map(|bytes| {
            let record = FaceIndexRecord::from_bytes(bytes)?;
            Ok((record.first_face_vertex_index, record.face_vertex_count))
        })
        .collect()
}

fn parse_buffer_offsets(container: &FmdlContainer) -> Result<Vec<u32>> {
    records(container, BufferOffsetRecord::BLOCK_ID)
        .iter()
        .map(|bytes| Ok(BufferOffsetRecord::from_bytes(bytes)?.offset))
        .collect()
}

/// Resolves blocks 9, 10, and 11 against the buffer base offsets into one
/// list of format entries per mesh format assignment.
fn parse_mesh_format_assignments(
    container: &FmdlContainer,
    buffer_offsets: &[u32],
) -> Result<Vec<Vec<FormatEntry>>> {
    let mesh_formats = records(container, MeshFormatRecord::BLOCK_ID)
        .iter()
        .map(|bytes| MeshFormatRecord::from_bytes(bytes))
        .collect::<Result<Vec<_>>>()?;
    let vertex_formats = records(container, VertexFormatRecord::BLOCK_ID)
        .iter()
        .map(|bytes| VertexFormatRecord::from_bytes(bytes))
        .collect::<Result<Vec<_>>>()?;

    let mut assignments = Vec::new();
    for bytes in records(container, MeshFormatAssignmentRecord::BLOCK_ID) {
        let record = MeshFormatAssignmentRecord::from_bytes(bytes)?;

        let first_mesh_format = usize::from(record.first_mesh_format_id);
        let mesh_format_end = first_mesh_format + usize::from(record.mesh_format_count);
        if mesh_format_end > mesh_formats.len() {
            return Err(Error::InvalidReference(format!(
                "invalid mesh format entry {} referenced by mesh format assignment",
                mesh_format_end
            )));
        }
        let first_vertex_format = usize::from(record.first_vertex_format_id);
        let vertex_format_end = first_vertex_format + usize::from(record.vertex_format_count);
        if vertex_format_end > vertex_formats.len() {
            return Err(Error::InvalidReference(format!(
                "invalid vertex format entry {} referenced by mesh format assignment",
                vertex_format_end
            )));
        }

        // Expand each mesh format record into one (base, stride) slot per
        // vertex format entry it covers.
        let mut bases = Vec::new();
        let mut strides = Vec::new();
        for mesh_format in &mesh_formats[first_mesh_format..mesh_format_end] {
            let buffer_base = *lookup(
                buffer_offsets,
                mesh_format.buffer_id.into(),
                "buffer offset referenced by mesh format",
            )?;
            for _ in 0..mesh_format.vertex_format_count {
                bases.push(buffer_base as usize + mesh_format.buffer_offset as usize);
                strides.push(usize::from(mesh_format.stride));
            }
        }

        if bases.len() != usize::from(record.vertex_format_count) {
            return Err(Error::MalformedFormat(format!(
                "found {} mesh format slots, expected {}",
                bases.len(),
                record.vertex_format_count
            )));
        }

        let entries = vertex_formats[first_vertex_format..vertex_format_end]
            .iter()
            .zip(bases.iter().zip(&strides))
            .map(|(vertex_format, (&base, &stride))| FormatEntry {
                datum_type: vertex_format.datum_type,
                datum_format: vertex_format.datum_format,
                offset: base + usize::from(vertex_format.offset),
                stride,
            })
            .collect();
        assignments.push(entries);
    }
    Ok(assignments)
}

/// Derives a mesh's [`VertexFields`] from its format entries and enforces the
/// field-presence invariants.
fn build_vertex_fields(format: &[FormatEntry]) -> Result<VertexFields> {
    let mut fields = VertexFields::default();
    let mut seen = Vec::with_capacity(format.len());
    let mut has_uv = [false; 4];
    let mut uv_offsets = [0usize; 4];
    let mut has_weights = false;
    let mut has_indices = false;

    for entry in format {
        if seen.contains(&entry.datum_type) {
            return Err(Error::InvalidFormat(format!(
                "duplicate vertex field {:?} in vertex format definition",
                entry.datum_type
            )));
        }
        seen.push(entry.datum_type);

        if entry.datum_format != entry.datum_type.format() {
            return Err(Error::InvalidFormat(format!(
                "unexpected format {:?} for {:?} data",
                entry.datum_format, entry.datum_type
            )));
        }

        match entry.datum_type {
            VertexDatumType::Normal => fields.has_normal = true,
            VertexDatumType::Tangent => fields.has_tangent = true,
            VertexDatumType::Color => fields.has_color = true,
            VertexDatumType::BoneWeights => {
                has_weights = true;
                fields.has_bone_mapping = true;
            }
            VertexDatumType::BoneIndices => {
                has_indices = true;
                fields.has_bone_mapping = true;
            }
            VertexDatumType::Position => {}
            uv => {
                let channel = usize::from(uv.id() - VertexDatumType::Uv0.id());
                has_uv[channel] = true;
                uv_offsets[channel] = entry.offset;
                fields.uv_count += 1;
            }
        }
    }

    for channel in 1..4 {
        if has_uv[channel] && !has_uv[channel - 1] {
            return Err(Error::InvalidFormat(format!(
                "non-monotonic uv map: has uv{} but not uv{}",
                channel,
                channel - 1
            )));
        }
    }
    if has_weights != has_indices {
        return Err(Error::InvalidFormat(
            "contains one of (bone weights, bone indices) but not the other".into(),
        ));
    }

    for i in 0..fields.uv_count {
        let aliases = (0..fields.uv_count)
            .filter(|&j| j != i && uv_offsets[i] == uv_offsets[j])
            .collect();
        fields.uv_equalities.insert(i, aliases);
    }

    Ok(fields)
}

fn parse_meshes(
    container: &FmdlContainer,
    bone_count: usize,
    material_instance_count: usize,
) -> Result<Vec<Mesh>> {
    if !container.segment0_blocks.contains_key(&MeshRecord::BLOCK_ID) {
        return Ok(Vec::new());
    }

    let bone_groups = parse_bone_groups(container, bone_count)?;
    parse_levels_of_detail(container)?;
    let face_indices = parse_face_indices(container)?;
    let buffer_offsets = parse_buffer_offsets(container)?;
    let mesh_formats = parse_mesh_format_assignments(container, &buffer_offsets)?;

    if buffer_offsets.len() < 3 {
        return Err(Error::MalformedFormat("missing face buffer".into()));
    }
    let face_buffer_offset = buffer_offsets[2];

    let mut meshes = Vec::new();
    for bytes in records(container, MeshRecord::BLOCK_ID) {
        let record = MeshRecord::from_bytes(bytes)?;

        let format = lookup(
            &mesh_formats,
            record.mesh_format_id.into(),
            "mesh format referenced by mesh",
        )?;
        let vertex_fields = build_vertex_fields(format)?;

        if usize::from(record.material_instance_id) >= material_instance_count {
            return Err(Error::InvalidReference(format!(
                "invalid material instance {} referenced by mesh",
                record.material_instance_id
            )));
        }

        // A mesh without bone index data ignores its bone group field.
        let bone_group = if vertex_fields.has_bone_mapping {
            Some(
                lookup(
                    &bone_groups,
                    record.bone_group_id.into(),
                    "bone group referenced by mesh",
                )?
                .clone(),
            )
        } else {
            None
        };

        let &(lod_first_index, lod_vertex_count) = lookup(
            &face_indices,
            record.first_face_index_id as usize,
            "face index referenced by mesh",
        )?;

        let vertices = parse_vertices(
            container,
            format,
            bone_group.as_ref(),
            record.vertex_count.into(),
        )?;
        let faces = parse_faces(
            container,
            face_buffer_offset,
            u64::from(record.first_face_vertex_index) + u64::from(lod_first_index),
            lod_vertex_count,
            vertices.len(),
        )?;

        meshes.push(Mesh {
            vertices,
            faces,
            bone_group,
            material_instance: record.material_instance_id.into(),
            alpha_enum: record.alpha_enum,
            shadow_enum: record.shadow_enum,
            vertex_fields,
        });
    }
    Ok(meshes)
}

fn vertex_block(container: &FmdlContainer) -> Result<&[u8]> {
    container
        .segment1_blocks
        .get(&VERTEX_BLOCK_ID)
        .map(Vec::as_slice)
        .ok_or_else(|| Error::MalformedFormat("vertex block not found".into()))
}

fn slice_at(buffer: &[u8], position: usize, length: usize) -> Result<&[u8]> {
    buffer.get(position..position + length).ok_or_else(|| {
        Error::Truncated(format!(
            "unexpected end of vertex block at offset {}",
            position
        ))
    })
}

fn parse_vertices(
    container: &FmdlContainer,
    format: &[FormatEntry],
    bone_group: Option<&BoneGroup>,
    vertex_count: usize,
) -> Result<Vec<Vertex>> {
    let buffer = vertex_block(container)?;

    let mut vertices = Vec::with_capacity(vertex_count);
    for index in 0..vertex_count {
        let mut vertex = Vertex::default();
        let mut uv = [None; 4];
        let mut bone_weights = None;
        let mut bone_indices = None;

        for entry in format {
            let position = entry.offset + index * entry.stride;

            match entry.datum_type {
                VertexDatumType::Position => {
                    let mut components = [0f32; 3];
                    LE::read_f32_into(slice_at(buffer, position, 12)?, &mut components);
                    vertex.position = Vec3::from(components);
                }
                VertexDatumType::Normal => {
                    vertex.normal = Some(read_quad_float16(buffer, position)?);
                }
                VertexDatumType::Tangent => {
                    vertex.tangent = Some(read_quad_float16(buffer, position)?);
                }
                VertexDatumType::Color => {
                    vertex.color = Some(read_quad_float8(buffer, position)?);
                }
                VertexDatumType::BoneWeights => {
                    bone_weights = Some(read_quad_float8(buffer, position)?);
                }
                VertexDatumType::BoneIndices => {
                    let bytes = slice_at(buffer, position, 4)?;
                    bone_indices = Some([bytes[0], bytes[1], bytes[2], bytes[3]]);
                }
                VertexDatumType::Uv0 => uv[0] = Some(read_double_float16(buffer, position)?),
                VertexDatumType::Uv1 => uv[1] = Some(read_double_float16(buffer, position)?),
                VertexDatumType::Uv2 => uv[2] = Some(read_double_float16(buffer, position)?),
                VertexDatumType::Uv3 => uv[3] = Some(read_double_float16(buffer, position)?),
            }
        }

        vertex.uv = uv.iter().flatten().copied().collect();

        if let (Some(weights), Some(indices), Some(group)) =
            (bone_weights, bone_indices, bone_group)
        {
            let mut mapping = BTreeMap::new();
            for (&weight, &bone_index) in weights.iter().zip(&indices) {
                if weight > MIN_BONE_WEIGHT {
                    // Out-of-range bone indices occur in real game assets;
                    // drop the weight instead of failing.
                    if let Some(&bone) = group.bones.get(usize::from(bone_index)) {
                        mapping.insert(bone, weight);
                    }
                }
            }
            vertex.bone_mapping = Some(mapping);
        }

        vertices.push(vertex);
    }
    Ok(vertices)
}

fn read_quad_float16(buffer: &[u8], position: usize) -> Result<Vec4> {
    let bytes = slice_at(buffer, position, 8)?;
    let mut encoded = [0u16; 4];
    LE::read_u16_into(bytes, &mut encoded);
    Ok(Vec4::new(
        half::decode(encoded[0]),
        half::decode(encoded[1]),
        half::decode(encoded[2]),
        half::decode(encoded[3]),
    ))
}

fn read_double_float16(buffer: &[u8], position: usize) -> Result<Vec2> {
    let bytes = slice_at(buffer, position, 4)?;
    Ok(Vec2::new(
        half::decode(LE::read_u16(&bytes[0..2])),
        half::decode(LE::read_u16(&bytes[2..4])),
    ))
}

fn read_quad_float8(buffer: &[u8], position: usize) -> Result<[f32; 4]> {
    let bytes = slice_at(buffer, position, 4)?;
    let mut values = [0f32; 4];
    for (value, &byte) in values.iter_mut().zip(bytes) {
        *value = f32::from(byte) / 255.0;
    }
    Ok(values)
}

fn parse_faces(
    container: &FmdlContainer,
    face_buffer_offset: u32,
    first_face_vertex_index: u64,
    face_vertex_count: u32,
    vertex_count: usize,
) -> Result<Vec<Face>> {
    let buffer = vertex_block(container)?;

    let first = first_face_vertex_index;
    let end = first + u64::from(face_vertex_count);
    let mut faces = Vec::new();
    for face_vertex_index in (first..end).step_by(3) {
        let position = face_vertex_index as usize * 2 + face_buffer_offset as usize;
        let bytes = slice_at(buffer, position, 6)?;

        let mut indices = [0u16; 3];
        LE::read_u16_into(bytes, &mut indices);
        for &index in &indices {
            if usize::from(index) >= vertex_count {
                return Err(Error::InvalidReference(format!(
                    "invalid vertex {} referenced by face",
                    index
                )));
            }
        }
        faces.push(Face { vertices: indices });
    }
    Ok(faces)
}

fn parse_mesh_groups(
    container: &FmdlContainer,
    strings: &[String],
    bounding_boxes: &[BoundingBox],
    mesh_count: usize,
) -> Result<Vec<MeshGroup>> {
    let entries = records(container, MeshGroupRecord::BLOCK_ID);

    let mut groups = Vec::with_capacity(entries.len());
    let mut parent_ids = Vec::with_capacity(entries.len());
    for bytes in entries {
        let record = MeshGroupRecord::from_bytes(bytes)?;
        let name = lookup(
            strings,
            record.name_string_id.into(),
            "string referenced by mesh group",
        )?
        .clone();

        parent_ids.push(record.parent_id);
        groups.push(MeshGroup {
            name,
            parent: None,
            children: Vec::new(),
            meshes: Vec::new(),
            bounding_box: None,
            visible: record.invisible == 0,
        });
    }

    resolve_parents(&parent_ids, "mesh group", |child, parent| {
        groups[child].parent = Some(parent);
        groups[parent].children.push(child);
    })?;
    detect_parent_cycles(
        &groups.iter().map(|group| group.parent).collect::<Vec<_>>(),
        "mesh group",
    )?;

    let mut assignment: Vec<Option<usize>> = vec![None; mesh_count];
    for bytes in records(container, MeshGroupAssignmentRecord::BLOCK_ID) {
        let record = MeshGroupAssignmentRecord::from_bytes(bytes)?;

        let group_id = usize::from(record.mesh_group_id);
        if group_id >= groups.len() {
            return Err(Error::InvalidReference(format!(
                "invalid mesh group {} referenced by mesh group assignment",
                group_id
            )));
        }
        let first = usize::from(record.first_mesh_id);
        let end = first + usize::from(record.mesh_count);
        if end > mesh_count {
            return Err(Error::InvalidReference(format!(
                "invalid mesh {} referenced by mesh group assignment",
                end
            )));
        }
        let bounding_box = *lookup(
            bounding_boxes,
            record.bounding_box_id.into(),
            "bounding box referenced by mesh group assignment",
        )?;

        for mesh in first..end {
            if assignment[mesh].is_some() {
                return Err(Error::DuplicateAssignment(format!(
                    "mesh {} assigned to more than one mesh group",
                    mesh
                )));
            }
            assignment[mesh] = Some(group_id);
        }

        match groups[group_id].bounding_box {
            Some(existing) if existing != bounding_box => {
                return Err(Error::DuplicateAssignment(format!(
                    "conflicting bounding boxes assigned to mesh group {}",
                    group_id
                )));
            }
            _ => groups[group_id].bounding_box = Some(bounding_box),
        }
    }

    for (mesh, group) in assignment.into_iter().enumerate() {
        match group {
            Some(group) => groups[group].meshes.push(mesh),
            None => return Err(Error::UnassignedMesh(mesh)),
        }
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use glam::Vec4;
    use pretty_assertions::assert_eq;

    use crate::records::write_bounding_box;

    use super::*;

    /// Appends a string to the pool and its descriptor record, the way a
    /// writer would.
    fn add_string(container: &mut FmdlContainer, string: &str) -> u16 {
        let pool = container.segment1_blocks.entry(3).or_default();
        let offset = pool.len() as u32;
        pool.extend_from_slice(string.as_bytes());
        pool.push(0);

        let mut record = Vec::new();
        StringRecord {
            block_id: 3,
            length: string.len() as u16,
            offset,
        }
        .to_bytes(&mut record)
        .unwrap();
        let block = container
            .segment0_blocks
            .entry(StringRecord::BLOCK_ID)
            .or_default();
        block.push(record);
        (block.len() - 1) as u16
    }

    fn add_bounding_box(container: &mut FmdlContainer) -> u16 {
        let mut record = Vec::new();
        write_bounding_box(&BoundingBox::default(), &mut record).unwrap();
        let block = container
            .segment0_blocks
            .entry(BOUNDING_BOX_BLOCK_ID)
            .or_default();
        block.push(record);
        (block.len() - 1) as u16
    }

    fn add_bone(container: &mut FmdlContainer, name: &str, parent_id: i16) {
        let name_string_id = add_string(container, name);
        let bounding_box_id = add_bounding_box(container);
        let mut record = Vec::new();
        BoneRecord {
            name_string_id,
            parent_id,
            bounding_box_id,
            local_position: Vec4::ZERO,
            global_position: Vec4::ZERO,
        }
        .to_bytes(&mut record)
        .unwrap();
        container
            .segment0_blocks
            .entry(BoneRecord::BLOCK_ID)
            .or_default()
            .push(record);
    }

    #[test]
    fn parses_bone_tree() {
        let mut container = FmdlContainer::new();
        add_bone(&mut container, "root", -1);
        add_bone(&mut container, "left", 0);
        add_bone(&mut container, "right", 0);

        let model = parse(&container).unwrap();

        assert_eq!(3, model.bones.len());
        assert_eq!("root", model.bones[0].name);
        assert_eq!(None, model.bones[0].parent);
        assert_eq!(vec![1, 2], model.bones[0].children);
        assert_eq!(Some(0), model.bones[1].parent);
        assert_eq!(Some(0), model.bones[2].parent);
    }

    #[test]
    fn rejects_bone_parent_cycle() {
        let mut container = FmdlContainer::new();
        add_bone(&mut container, "a", 1);
        add_bone(&mut container, "b", 0);

        let result = parse(&container);
        assert!(matches!(result, Err(Error::ParentCycle("bone"))));
    }

    #[test]
    fn rejects_out_of_range_bone_parent() {
        let mut container = FmdlContainer::new();
        add_bone(&mut container, "a", 7);

        let result = parse(&container);
        assert!(matches!(result, Err(Error::InvalidReference(_))));
    }

    #[test]
    fn rejects_invalid_string_bytes() {
        let mut container = FmdlContainer::new();
        container.segment1_blocks.insert(3, vec![0xf8, 0xa1, 0xa1]);
        let mut record = Vec::new();
        StringRecord {
            block_id: 3,
            length: 3,
            offset: 0,
        }
        .to_bytes(&mut record)
        .unwrap();
        container
            .segment0_blocks
            .insert(StringRecord::BLOCK_ID, vec![record]);

        let result = parse(&container);
        assert!(matches!(result, Err(Error::InvalidString(_))));
    }

    #[test]
    fn rejects_string_outside_pool() {
        let mut container = FmdlContainer::new();
        container.segment1_blocks.insert(3, vec![b'h', b'i', 0]);
        let mut record = Vec::new();
        StringRecord {
            block_id: 3,
            length: 10,
            offset: 0,
        }
        .to_bytes(&mut record)
        .unwrap();
        container
            .segment0_blocks
            .insert(StringRecord::BLOCK_ID, vec![record]);

        let result = parse(&container);
        assert!(matches!(result, Err(Error::InvalidReference(_))));
    }

    #[test]
    fn vertex_fields_detect_uv_aliasing() {
        let entry = |datum_type: VertexDatumType, offset: usize| FormatEntry {
            datum_type,
            datum_format: datum_type.format(),
            offset,
            stride: 20,
        };
        let format = [
            entry(VertexDatumType::Position, 0),
            entry(VertexDatumType::Uv0, 12),
            entry(VertexDatumType::Uv1, 12),
            entry(VertexDatumType::Uv2, 16),
        ];

        let fields = build_vertex_fields(&format).unwrap();

        assert_eq!(3, fields.uv_count);
        assert_eq!(vec![1], fields.uv_equalities[&0]);
        assert_eq!(vec![0], fields.uv_equalities[&1]);
        assert_eq!(Vec::<usize>::new(), fields.uv_equalities[&2]);
    }

    #[test]
    fn vertex_fields_reject_non_monotonic_uvs() {
        let entry = |datum_type: VertexDatumType, offset: usize| FormatEntry {
            datum_type,
            datum_format: datum_type.format(),
            offset,
            stride: 16,
        };
        let format = [
            entry(VertexDatumType::Position, 0),
            entry(VertexDatumType::Uv1, 12),
        ];

        let result = build_vertex_fields(&format);
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn vertex_fields_reject_unpaired_bone_data() {
        let entry = |datum_type: VertexDatumType, offset: usize| FormatEntry {
            datum_type,
            datum_format: datum_type.format(),
            offset,
            stride: 16,
        };
        let format = [
            entry(VertexDatumType::Position, 0),
            entry(VertexDatumType::BoneWeights, 12),
        ];

        let result = build_vertex_fields(&format);
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn vertex_fields_reject_duplicate_datum() {
        let entry = |offset: usize| FormatEntry {
            datum_type: VertexDatumType::Position,
            datum_format: VertexDatumType::Position.format(),
            offset,
            stride: 24,
        };

        let result = build_vertex_fields(&[entry(0), entry(12)]);
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }
}
