//! Serializes the semantic model into a container: registers entities in
//! arena order so their indices double as record ids, lays out a canonical
//! vertex format per mesh, and packs the three growing geometry buffers.

use std::collections::BTreeMap;
use std::io::Cursor;

use byteorder::{WriteBytesExt, LE};

use crate::container::{pad_to_16, FmdlContainer};
use crate::error::{Error, Result};
use crate::half;
use crate::model::{
    Bone, BoneGroup, BoundingBox, Face, Fmdl, MaterialInstance, Mesh, MeshGroup, Vertex,
    VertexFields,
};
use crate::records::{
    write_bounding_box, BoneGroupRecord, BoneRecord, BufferOffsetRecord, FaceIndexRecord,
    LodRecord, MaterialInstanceRecord, MaterialRecord, MeshFormatAssignmentRecord,
    MeshFormatRecord, MeshGroupAssignmentRecord, MeshGroupRecord, MeshRecord,
    ParameterAssignmentRecord, StringRecord, TextureRecord, VertexFormatRecord,
    BOUNDING_BOX_BLOCK_ID, MATERIAL_PARAMETERS_BLOCK_ID, STRING_POOL_BLOCK_ID, VERTEX_BLOCK_ID,
};
use crate::vertex::{VertexDatumFormat, VertexDatumType};

pub(crate) fn serialize(fmdl: &Fmdl) -> Result<FmdlContainer> {
    let mut serializer = Serializer::new();

    // Compatibility: the first string of a file is always the empty string.
    serializer.add_string("")?;
    serializer.store_bones(&fmdl.bones)?;
    serializer.store_material_instances(&fmdl.material_instances)?;
    serializer.store_meshes(&fmdl.meshes)?;
    serializer.store_mesh_groups(&fmdl.mesh_groups)?;

    serializer.finish()
}

/// One packed attribute slot of a mesh's canonical vertex layout. Aliased UV
/// channels emit a vertex format record but no slot.
struct PackEntry {
    buffer_id: usize,
    datum_type: VertexDatumType,
    /// Offset of the attribute within the buffer's per-vertex stride.
    offset: usize,
}

struct VertexLayout {
    assignment_id: usize,
    entries: Vec<PackEntry>,
    position_stride: usize,
    data_stride: usize,
}

struct Serializer {
    container: FmdlContainer,
}

impl Serializer {
    fn new() -> Self {
        Self {
            container: FmdlContainer::new(),
        }
    }

    /// The id the next record of the block will get. Probing also creates
    /// the block, so it gains a descriptor even if it stays empty.
    fn next_record_id(&mut self, block_id: u16) -> usize {
        self.container
            .segment0_blocks
            .entry(block_id)
            .or_default()
            .len()
    }

    fn add_record(&mut self, block_id: u16, record: Vec<u8>) -> usize {
        let block = self.container.segment0_blocks.entry(block_id).or_default();
        block.push(record);
        block.len() - 1
    }

    /// Appends a string to the pool and returns its descriptor record id.
    /// The pool stores a NUL terminator that the recorded length excludes.
    fn add_string(&mut self, string: &str) -> Result<usize> {
        let pool = self
            .container
            .segment1_blocks
            .entry(STRING_POOL_BLOCK_ID)
            .or_default();
        let offset = pool.len() as u32;
        pool.extend_from_slice(string.as_bytes());
        pool.push(0);

        let mut record = Vec::with_capacity(8);
        StringRecord {
            block_id: STRING_POOL_BLOCK_ID as u16,
            length: string.len() as u16,
            offset,
        }
        .to_bytes(&mut record)?;
        Ok(self.add_record(StringRecord::BLOCK_ID, record))
    }

    fn add_bounding_box(&mut self, bounding_box: &BoundingBox) -> Result<usize> {
        let mut record = Vec::with_capacity(32);
        write_bounding_box(bounding_box, &mut record)?;
        Ok(self.add_record(BOUNDING_BOX_BLOCK_ID, record))
    }

    fn store_bones(&mut self, bones: &[Bone]) -> Result<()> {
        // The block descriptor is emitted even for a boneless model.
        self.next_record_id(BoneRecord::BLOCK_ID);
        for bone in bones {
            self.add_bone(bone)?;
        }
        Ok(())
    }

    fn add_bone(&mut self, bone: &Bone) -> Result<usize> {
        let name_string_id = self.add_string(&bone.name)? as u16;
        let parent_id = bone.parent.map_or(-1, |parent| parent as i16);
        let bounding_box_id = self.add_bounding_box(&bone.bounding_box)? as u16;

        let mut record = Vec::with_capacity(48);
        BoneRecord {
            name_string_id,
            parent_id,
            bounding_box_id,
            local_position: bone.local_position,
            global_position: bone.global_position,
        }
        .to_bytes(&mut record)?;
        Ok(self.add_record(BoneRecord::BLOCK_ID, record))
    }

    fn store_material_instances(&mut self, instances: &[MaterialInstance]) -> Result<()> {
        for instance in instances {
            self.add_material_instance(instance)?;
        }
        Ok(())
    }

    fn add_material_instance(&mut self, instance: &MaterialInstance) -> Result<usize> {
        for (index, (role, _)) in instance.textures.iter().enumerate() {
            if instance.textures[..index].iter().any(|(other, _)| other == role) {
                return Err(Error::DuplicateAssignment(format!(
                    "texture role '{}' reused by material instance '{}'",
                    role, instance.name
                )));
            }
        }
        for (index, (parameter, _)) in instance.parameters.iter().enumerate() {
            if instance.parameters[..index]
                .iter()
                .any(|(other, _)| other == parameter)
            {
                return Err(Error::DuplicateAssignment(format!(
                    "material parameter '{}' reused by material instance '{}'",
                    parameter, instance.name
                )));
            }
        }

        let name_string_id = self.add_string(&instance.name)? as u16;
        let material_id = self.add_material(&instance.shader, &instance.technique)? as u16;

        let first_texture_id = self.next_record_id(ParameterAssignmentRecord::BLOCK_ID) as u16;
        for (role, texture) in &instance.textures {
            let texture_id = self.add_texture(&texture.filename, &texture.directory)?;
            self.add_parameter_assignment(role, texture_id as u16)?;
        }

        let first_parameter_id = self.next_record_id(ParameterAssignmentRecord::BLOCK_ID) as u16;
        for (parameter, values) in &instance.parameters {
            let values_id = self.add_material_parameter_values(values)?;
            self.add_parameter_assignment(parameter, values_id as u16)?;
        }

        let mut record = Vec::with_capacity(16);
        MaterialInstanceRecord {
            name_string_id,
            material_id,
            texture_count: instance.textures.len() as u8,
            parameter_count: instance.parameters.len() as u8,
            first_texture_id,
            first_parameter_id,
        }
        .to_bytes(&mut record)?;
        Ok(self.add_record(MaterialInstanceRecord::BLOCK_ID, record))
    }

    fn add_material(&mut self, shader: &str, technique: &str) -> Result<usize> {
        let shader_string_id = self.add_string(shader)? as u16;
        let technique_string_id = self.add_string(technique)? as u16;

        let mut record = Vec::with_capacity(4);
        MaterialRecord {
            shader_string_id,
            technique_string_id,
        }
        .to_bytes(&mut record)?;
        Ok(self.add_record(MaterialRecord::BLOCK_ID, record))
    }

    fn add_texture(&mut self, filename: &str, directory: &str) -> Result<usize> {
        let filename_string_id = self.add_string(filename)? as u16;
        let directory_string_id = self.add_string(directory)? as u16;

        let mut record = Vec::with_capacity(4);
        TextureRecord {
            filename_string_id,
            directory_string_id,
        }
        .to_bytes(&mut record)?;
        Ok(self.add_record(TextureRecord::BLOCK_ID, record))
    }

    fn add_parameter_assignment(&mut self, name: &str, reference_id: u16) -> Result<usize> {
        let name_string_id = self.add_string(name)? as u16;

        let mut record = Vec::with_capacity(4);
        ParameterAssignmentRecord {
            name_string_id,
            reference_id,
        }
        .to_bytes(&mut record)?;
        Ok(self.add_record(ParameterAssignmentRecord::BLOCK_ID, record))
    }

    /// Appends a 16-byte parameter vector to segment 1 block 0 and returns
    /// its index.
    fn add_material_parameter_values(&mut self, values: &[f32; 4]) -> Result<usize> {
        let block = self
            .container
            .segment1_blocks
            .entry(MATERIAL_PARAMETERS_BLOCK_ID)
            .or_default();
        let index = block.len() / 16;
        for &value in values {
            block.write_f32::<LE>(value)?;
        }
        Ok(index)
    }

    fn store_meshes(&mut self, meshes: &[Mesh]) -> Result<()> {
        let levels_of_detail = 1;
        self.add_levels_of_detail(levels_of_detail)?;

        let mut position_buffer = Vec::new();
        let mut data_buffer = Vec::new();
        let mut face_buffer = Vec::new();

        for mesh in meshes {
            self.add_mesh(
                mesh,
                levels_of_detail,
                &mut position_buffer,
                &mut data_buffer,
                &mut face_buffer,
            )?;
        }

        // All three records are emitted even when a buffer is empty;
        // consumers rely on the final one carrying the last flag.
        self.add_buffer_offset(false, position_buffer.len(), 0)?;
        self.add_buffer_offset(false, data_buffer.len(), position_buffer.len())?;
        self.add_buffer_offset(
            true,
            face_buffer.len(),
            position_buffer.len() + data_buffer.len(),
        )?;

        let mut vertex_block = position_buffer;
        vertex_block.append(&mut data_buffer);
        vertex_block.append(&mut face_buffer);
        self.container
            .segment1_blocks
            .insert(VERTEX_BLOCK_ID, vertex_block);
        Ok(())
    }

    fn add_mesh(
        &mut self,
        mesh: &Mesh,
        levels_of_detail: u32,
        position_buffer: &mut Vec<u8>,
        data_buffer: &mut Vec<u8>,
        face_buffer: &mut Vec<u8>,
    ) -> Result<usize> {
        let (bone_group_id, group_positions) = self.add_bone_group(mesh.bone_group.as_ref())?;
        let layout = self.add_mesh_format_assignment(
            &mesh.vertex_fields,
            position_buffer.len(),
            data_buffer.len(),
        )?;

        pack_vertices(
            &mesh.vertices,
            &layout,
            &group_positions,
            position_buffer,
            data_buffer,
        )?;

        let first_face_index_id = self.next_record_id(FaceIndexRecord::BLOCK_ID);
        for _ in 0..levels_of_detail {
            self.add_face_index(mesh.faces.len())?;
        }
        let first_face_vertex_index = pack_faces(&mesh.faces, face_buffer)?;

        let mut record = Vec::with_capacity(48);
        MeshRecord {
            alpha_enum: mesh.alpha_enum,
            shadow_enum: mesh.shadow_enum,
            material_instance_id: mesh.material_instance as u16,
            bone_group_id: bone_group_id as u16,
            mesh_format_id: layout.assignment_id as u16,
            vertex_count: mesh.vertices.len() as u16,
            first_face_vertex_index: first_face_vertex_index as u32,
            face_vertex_count: (mesh.faces.len() * 3) as u32,
            first_face_index_id: first_face_index_id as u64,
        }
        .to_bytes(&mut record)?;
        Ok(self.add_record(MeshRecord::BLOCK_ID, record))
    }

    /// Emits the bone group record and returns its id plus the slot each
    /// global bone index occupies within the group. A mesh without a bone
    /// group writes no record; readers ignore the id field in that case.
    fn add_bone_group(
        &mut self,
        bone_group: Option<&BoneGroup>,
    ) -> Result<(usize, BTreeMap<usize, usize>)> {
        let group = match bone_group {
            Some(group) => group,
            None => return Ok((0, BTreeMap::new())),
        };

        let mut positions = BTreeMap::new();
        for (slot, &bone) in group.bones.iter().enumerate() {
            positions.insert(bone, slot);
        }

        let mut record = Vec::with_capacity(68);
        BoneGroupRecord {
            bone_ids: group.bones.iter().map(|&bone| bone as u16).collect(),
        }
        .to_bytes(&mut record)?;
        Ok((self.add_record(BoneGroupRecord::BLOCK_ID, record), positions))
    }

    /// Emits the canonical vertex layout for a mesh: blocks 10 and 11 plus
    /// the block 9 assignment tying them together.
    fn add_mesh_format_assignment(
        &mut self,
        fields: &VertexFields,
        position_buffer_len: usize,
        data_buffer_len: usize,
    ) -> Result<VertexLayout> {
        if fields.uv_count > 4 {
            return Err(Error::InvalidFormat(format!(
                "a mesh can carry at most 4 uv channels, found {}",
                fields.uv_count
            )));
        }

        let first_mesh_format_id = self.next_record_id(MeshFormatRecord::BLOCK_ID);
        let first_vertex_format_id = self.next_record_id(VertexFormatRecord::BLOCK_ID);

        let mut entries = Vec::new();
        let mut position_stride = 0;
        let mut data_stride = 0;
        // Vertex format entries per block 10 category: position,
        // normal/tangent, color, bone mapping + uv.
        let mut category_entries = [0usize; 4];

        // The position attribute is always present.
        self.add_vertex_format(VertexDatumType::Position, position_stride as u16)?;
        entries.push(PackEntry {
            buffer_id: 0,
            datum_type: VertexDatumType::Position,
            offset: position_stride,
        });
        position_stride += VertexDatumFormat::TripleFloat32.size();
        category_entries[0] += 1;

        if fields.has_normal {
            self.add_vertex_format(VertexDatumType::Normal, data_stride as u16)?;
            entries.push(PackEntry {
                buffer_id: 1,
                datum_type: VertexDatumType::Normal,
                offset: data_stride,
            });
            data_stride += VertexDatumFormat::QuadFloat16.size();
            category_entries[1] += 1;
        }

        if fields.has_tangent {
            self.add_vertex_format(VertexDatumType::Tangent, data_stride as u16)?;
            entries.push(PackEntry {
                buffer_id: 1,
                datum_type: VertexDatumType::Tangent,
                offset: data_stride,
            });
            data_stride += VertexDatumFormat::QuadFloat16.size();
            category_entries[1] += 1;
        }

        if fields.has_color {
            self.add_vertex_format(VertexDatumType::Color, data_stride as u16)?;
            entries.push(PackEntry {
                buffer_id: 1,
                datum_type: VertexDatumType::Color,
                offset: data_stride,
            });
            data_stride += VertexDatumFormat::QuadFloat8.size();
            category_entries[2] += 1;
        }

        if fields.has_bone_mapping {
            self.add_vertex_format(VertexDatumType::BoneWeights, data_stride as u16)?;
            entries.push(PackEntry {
                buffer_id: 1,
                datum_type: VertexDatumType::BoneWeights,
                offset: data_stride,
            });
            data_stride += VertexDatumFormat::QuadFloat8.size();

            self.add_vertex_format(VertexDatumType::BoneIndices, data_stride as u16)?;
            entries.push(PackEntry {
                buffer_id: 1,
                datum_type: VertexDatumType::BoneIndices,
                offset: data_stride,
            });
            data_stride += VertexDatumFormat::QuadInt8.size();
            category_entries[3] += 2;
        }

        let mut uv_offsets: BTreeMap<usize, usize> = BTreeMap::new();
        for channel in 0..fields.uv_count {
            let datum_type = VertexDatumType::uv(channel);
            let alias = fields
                .uv_equalities
                .get(&channel)
                .into_iter()
                .flatten()
                .find_map(|other| uv_offsets.get(other).copied());

            if let Some(offset) = alias {
                // Aliased channels reuse the earlier channel's storage: same
                // offset, no stride growth, no packing slot.
                self.add_vertex_format(datum_type, offset as u16)?;
            } else {
                self.add_vertex_format(datum_type, data_stride as u16)?;
                entries.push(PackEntry {
                    buffer_id: 1,
                    datum_type,
                    offset: data_stride,
                });
                uv_offsets.insert(channel, data_stride);
                data_stride += VertexDatumFormat::DoubleFloat16.size();
            }
            category_entries[3] += 1;
        }

        self.add_mesh_format(MeshFormatRecord {
            buffer_id: 0,
            vertex_format_count: category_entries[0] as u8,
            stride: position_stride as u8,
            format_type: 0,
            buffer_offset: position_buffer_len as u32,
        })?;
        for category in 1..4 {
            if category_entries[category] > 0 {
                self.add_mesh_format(MeshFormatRecord {
                    buffer_id: 1,
                    vertex_format_count: category_entries[category] as u8,
                    stride: data_stride as u8,
                    format_type: category as u8,
                    buffer_offset: data_buffer_len as u32,
                })?;
            }
        }

        let mesh_format_count = self.next_record_id(MeshFormatRecord::BLOCK_ID) - first_mesh_format_id;
        let vertex_format_count =
            self.next_record_id(VertexFormatRecord::BLOCK_ID) - first_vertex_format_id;

        let mut record = Vec::with_capacity(8);
        MeshFormatAssignmentRecord {
            mesh_format_count: mesh_format_count as u8,
            vertex_format_count: vertex_format_count as u8,
            uv_count: fields.uv_count as u8,
            first_mesh_format_id: first_mesh_format_id as u16,
            first_vertex_format_id: first_vertex_format_id as u16,
        }
        .to_bytes(&mut record)?;
        let assignment_id = self.add_record(MeshFormatAssignmentRecord::BLOCK_ID, record);

        Ok(VertexLayout {
            assignment_id,
            entries,
            position_stride,
            data_stride,
        })
    }

    fn add_mesh_format(&mut self, mesh_format: MeshFormatRecord) -> Result<usize> {
        let mut record = Vec::with_capacity(8);
        mesh_format.to_bytes(&mut record)?;
        Ok(self.add_record(MeshFormatRecord::BLOCK_ID, record))
    }

    fn add_vertex_format(&mut self, datum_type: VertexDatumType, offset: u16) -> Result<usize> {
        let mut record = Vec::with_capacity(4);
        VertexFormatRecord {
            datum_type,
            datum_format: datum_type.format(),
            offset,
        }
        .to_bytes(&mut record)?;
        Ok(self.add_record(VertexFormatRecord::BLOCK_ID, record))
    }

    fn add_levels_of_detail(&mut self, levels: u32) -> Result<usize> {
        let mut record = Vec::with_capacity(16);
        LodRecord { levels }.to_bytes(&mut record)?;
        Ok(self.add_record(LodRecord::BLOCK_ID, record))
    }

    fn add_face_index(&mut self, face_count: usize) -> Result<usize> {
        let mut record = Vec::with_capacity(8);
        FaceIndexRecord {
            first_face_vertex_index: 0,
            face_vertex_count: (face_count * 3) as u32,
        }
        .to_bytes(&mut record)?;
        Ok(self.add_record(FaceIndexRecord::BLOCK_ID, record))
    }

    fn add_buffer_offset(&mut self, last: bool, length: usize, offset: usize) -> Result<usize> {
        let mut record = Vec::with_capacity(16);
        BufferOffsetRecord {
            last,
            length: length as u32,
            offset: offset as u32,
        }
        .to_bytes(&mut record)?;
        Ok(self.add_record(BufferOffsetRecord::BLOCK_ID, record))
    }

    fn store_mesh_groups(&mut self, groups: &[MeshGroup]) -> Result<()> {
        // The block descriptor is emitted even for a groupless model.
        self.next_record_id(MeshGroupRecord::BLOCK_ID);
        for group in groups {
            self.add_mesh_group(group)?;
        }
        Ok(())
    }

    fn add_mesh_group(&mut self, group: &MeshGroup) -> Result<usize> {
        let name_string_id = self.add_string(&group.name)? as u16;
        let parent_id = group.parent.map_or(-1, |parent| parent as i16);

        let mut record = Vec::with_capacity(8);
        MeshGroupRecord {
            name_string_id,
            invisible: u16::from(!group.visible),
            parent_id,
        }
        .to_bytes(&mut record)?;
        let mesh_group_id = self.add_record(MeshGroupRecord::BLOCK_ID, record);

        let bounding_box_id = self.add_bounding_box(&group.bounding_box.unwrap_or_default())?;

        // Consecutive mesh ids collapse into run-length assignment records.
        let mut runs: Vec<(usize, usize)> = Vec::new();
        for &mesh in &group.meshes {
            match runs.last_mut() {
                Some((first, count)) if mesh == *first + *count => *count += 1,
                _ => runs.push((mesh, 1)),
            }
        }
        // A meshless group still emits one record to carry its bounding box.
        if runs.is_empty() {
            runs.push((0, 0));
        }

        for (first_mesh, mesh_count) in runs {
            let mut record = Vec::with_capacity(32);
            MeshGroupAssignmentRecord {
                mesh_group_id: mesh_group_id as u16,
                mesh_count: mesh_count as u16,
                first_mesh_id: first_mesh as u16,
                bounding_box_id: bounding_box_id as u16,
            }
            .to_bytes(&mut record)?;
            self.add_record(MeshGroupAssignmentRecord::BLOCK_ID, record);
        }

        Ok(mesh_group_id)
    }

    fn finish(mut self) -> Result<FmdlContainer> {
        // Two trailing blocks of unknown purpose; their presence and size
        // are required for interoperability.
        self.add_record(18, vec![0; 8]);
        let mut unknown = Vec::with_capacity(128);
        for value in [0.0f32, 1.0, 1.0, 1.0] {
            unknown.write_f32::<LE>(value)?;
        }
        for value in [0u32, 0, 0] {
            unknown.write_u32::<LE>(value)?;
        }
        unknown.write_i32::<LE>(-1)?;
        unknown.resize(128, 0);
        self.add_record(20, unknown);

        // Legacy consumers expect this block even when empty.
        self.container.segment1_blocks.insert(1, Vec::new());

        Ok(self.container)
    }
}

fn pack_vertices(
    vertices: &[Vertex],
    layout: &VertexLayout,
    group_positions: &BTreeMap<usize, usize>,
    position_buffer: &mut Vec<u8>,
    data_buffer: &mut Vec<u8>,
) -> Result<()> {
    let mut positions = vec![0; vertices.len() * layout.position_stride];
    let mut data = vec![0; vertices.len() * layout.data_stride];

    for (index, vertex) in vertices.iter().enumerate() {
        // Bone slots sorted by weight, descending; only four are stored.
        let mut bones: Vec<(usize, f32)> = Vec::new();
        if let Some(mapping) = &vertex.bone_mapping {
            for (&bone, &weight) in mapping {
                let slot = *group_positions.get(&bone).ok_or_else(|| {
                    Error::InvalidReference(format!(
                        "bone {} weighted by a vertex is not in the mesh bone group",
                        bone
                    ))
                })?;
                bones.push((slot, weight));
            }
            bones.sort_by(|a, b| b.1.total_cmp(&a.1));
        }

        for entry in &layout.entries {
            let (buffer, stride) = match entry.buffer_id {
                0 => (&mut positions, layout.position_stride),
                _ => (&mut data, layout.data_stride),
            };
            let mut cursor = Cursor::new(buffer.as_mut_slice());
            cursor.set_position((index * stride + entry.offset) as u64);

            match entry.datum_type {
                VertexDatumType::Position => {
                    for component in vertex.position.to_array() {
                        cursor.write_f32::<LE>(component)?;
                    }
                }
                VertexDatumType::Normal => {
                    let normal = vertex.normal.ok_or_else(|| {
                        Error::InvalidFormat("vertex is missing normal data".into())
                    })?;
                    for component in normal.to_array() {
                        cursor.write_u16::<LE>(half::encode(component))?;
                    }
                }
                VertexDatumType::Tangent => {
                    let tangent = vertex.tangent.ok_or_else(|| {
                        Error::InvalidFormat("vertex is missing tangent data".into())
                    })?;
                    for component in tangent.to_array() {
                        cursor.write_u16::<LE>(half::encode(component))?;
                    }
                }
                VertexDatumType::Color => {
                    let color = vertex.color.ok_or_else(|| {
                        Error::InvalidFormat("vertex is missing color data".into())
                    })?;
                    for component in color {
                        cursor.write_u8(pack_unit_float(component))?;
                    }
                }
                VertexDatumType::BoneWeights => {
                    for slot in 0..4 {
                        let weight = bones.get(slot).map_or(0.0, |&(_, weight)| weight);
                        cursor.write_u8(pack_unit_float(weight))?;
                    }
                }
                VertexDatumType::BoneIndices => {
                    for slot in 0..4 {
                        let bone_slot = bones.get(slot).map_or(0, |&(bone_slot, _)| bone_slot);
                        cursor.write_u8(bone_slot as u8)?;
                    }
                }
                VertexDatumType::Uv0
                | VertexDatumType::Uv1
                | VertexDatumType::Uv2
                | VertexDatumType::Uv3 => {
                    let channel =
                        usize::from(entry.datum_type.id() - VertexDatumType::Uv0.id());
                    let uv = vertex.uv.get(channel).ok_or_else(|| {
                        Error::InvalidFormat(format!("vertex is missing uv{} data", channel))
                    })?;
                    cursor.write_u16::<LE>(half::encode(uv.x))?;
                    cursor.write_u16::<LE>(half::encode(uv.y))?;
                }
            }
        }
    }

    pad_to_16(&mut positions);
    pad_to_16(&mut data);
    position_buffer.extend_from_slice(&positions);
    data_buffer.extend_from_slice(&data);
    Ok(())
}

/// Truncates a `[0, 1]` float into a byte, the way the game's own tooling
/// does; the saturating cast also clamps out-of-range values.
fn pack_unit_float(value: f32) -> u8 {
    (value * 255.0) as u8
}

/// Appends the mesh's triangles to the shared face buffer and returns the
/// mesh's first face vertex index within it.
fn pack_faces(faces: &[Face], face_buffer: &mut Vec<u8>) -> Result<usize> {
    let first_face_vertex_index = face_buffer.len() / 2;
    for face in faces {
        for &vertex in &face.vertices {
            face_buffer.write_u16::<LE>(vertex)?;
        }
    }
    Ok(first_face_vertex_index)
}

#[cfg(test)]
mod tests {
    use glam::{Vec2, Vec3, Vec4};
    use pretty_assertions::assert_eq;

    use crate::model::Texture;

    use super::*;

    fn basic_material() -> MaterialInstance {
        MaterialInstance {
            name: "mat".into(),
            technique: "pes3ddc_3ds_skin".into(),
            shader: "fox3ddf_blin".into(),
            textures: vec![(
                "Base_Tex_SRGB".into(),
                Texture {
                    filename: "body.dds".into(),
                    directory: "textures/".into(),
                },
            )],
            parameters: vec![("MatParamIndex_0".into(), [0.25, 0.5, 0.75, 1.0])],
        }
    }

    fn group_of(meshes: Vec<usize>) -> MeshGroup {
        MeshGroup {
            name: "group".into(),
            meshes,
            bounding_box: Some(BoundingBox::default()),
            visible: true,
            ..Default::default()
        }
    }

    fn skinned_model() -> Fmdl {
        let unit_box = BoundingBox {
            max: Vec4::new(1.0, 1.0, 1.0, 1.0),
            min: Vec4::ZERO,
        };

        let vertex = |position: Vec3| Vertex {
            position,
            normal: Some(Vec4::new(0.0, 1.0, 0.0, 1.0)),
            tangent: Some(Vec4::new(1.0, 0.0, 0.0, 1.0)),
            color: Some([51.0 / 255.0, 102.0 / 255.0, 204.0 / 255.0, 1.0]),
            uv: vec![Vec2::new(0.0, 1.0), Vec2::new(0.5, 0.25)],
            bone_mapping: Some(BTreeMap::from([
                (0, 153.0 / 255.0),
                (1, 102.0 / 255.0),
            ])),
        };

        let mesh = Mesh {
            vertices: vec![
                vertex(Vec3::ZERO),
                vertex(Vec3::new(1.0, 0.0, 0.0)),
                vertex(Vec3::new(0.0, 1.0, 0.0)),
            ],
            faces: vec![Face {
                vertices: [0, 1, 2],
            }],
            bone_group: Some(BoneGroup { bones: vec![0, 1] }),
            material_instance: 0,
            alpha_enum: 128,
            shadow_enum: 1,
            vertex_fields: VertexFields {
                has_normal: true,
                has_tangent: true,
                has_color: true,
                has_bone_mapping: true,
                uv_count: 2,
                uv_equalities: BTreeMap::from([(0, vec![]), (1, vec![])]),
            },
        };

        Fmdl {
            bones: vec![
                Bone {
                    name: "root".into(),
                    children: vec![1],
                    local_position: Vec4::new(1.0, 2.0, 3.0, 4.0),
                    global_position: Vec4::new(4.0, 3.0, 2.0, 1.0),
                    ..Default::default()
                },
                Bone {
                    name: "tip".into(),
                    parent: Some(0),
                    ..Default::default()
                },
            ],
            material_instances: vec![basic_material()],
            meshes: vec![mesh],
            mesh_groups: vec![
                MeshGroup {
                    name: "body".into(),
                    children: vec![1],
                    bounding_box: Some(BoundingBox::default()),
                    visible: true,
                    ..Default::default()
                },
                MeshGroup {
                    name: "head".into(),
                    parent: Some(0),
                    meshes: vec![0],
                    bounding_box: Some(unit_box),
                    visible: false,
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn minimal_model_round_trips() {
        let model = Fmdl {
            bones: vec![Bone {
                name: "root".into(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let bytes = model.to_bytes().unwrap();
        let actual = Fmdl::from_bytes(&bytes).unwrap();

        assert_eq!(model, actual);
        assert_eq!("root", actual.bones[0].name);
        assert_eq!(None, actual.bones[0].parent);
        assert!(actual.meshes.is_empty());
        assert!(actual.mesh_groups.is_empty());
    }

    #[test]
    fn skinned_model_round_trips() {
        let model = skinned_model();

        let bytes = model.to_bytes().unwrap();
        let actual = Fmdl::from_bytes(&bytes).unwrap();

        assert_eq!(model, actual);
    }

    #[test]
    fn second_round_trip_is_stable() {
        let first = Fmdl::from_bytes(&skinned_model().to_bytes().unwrap()).unwrap();
        let second = Fmdl::from_bytes(&first.to_bytes().unwrap()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn writer_emits_required_scaffolding() {
        let container = Fmdl::default().to_container().unwrap();

        assert_eq!(vec![0u8; 8], container.segment0_blocks[&18][0]);
        let unknown = &container.segment0_blocks[&20][0];
        assert_eq!(128, unknown.len());
        assert_eq!(0.0f32.to_le_bytes(), unknown[0..4]);
        assert_eq!(1.0f32.to_le_bytes(), unknown[4..8]);
        assert_eq!((-1i32).to_le_bytes(), unknown[28..32]);
        assert!(container.segment1_blocks[&1].is_empty());
        assert!(container.segment1_blocks[&VERTEX_BLOCK_ID].is_empty());

        // Three buffer offset records, only the last one flagged.
        let offsets: Vec<_> = container.segment0_blocks[&BufferOffsetRecord::BLOCK_ID]
            .iter()
            .map(|bytes| BufferOffsetRecord::from_bytes(bytes).unwrap())
            .collect();
        assert_eq!(3, offsets.len());
        assert_eq!(vec![false, false, true], offsets.iter().map(|o| o.last).collect::<Vec<_>>());

        // A single level of detail.
        let lods = &container.segment0_blocks[&LodRecord::BLOCK_ID];
        assert_eq!(1, lods.len());
        assert_eq!(1, LodRecord::from_bytes(&lods[0]).unwrap().levels);
    }

    #[test]
    fn first_string_is_empty() {
        let model = Fmdl {
            bones: vec![Bone {
                name: "hips".into(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let container = model.to_container().unwrap();

        let first = StringRecord::from_bytes(&container.segment0_blocks[&12][0]).unwrap();
        assert_eq!(0, first.length);
        assert_eq!(0, first.offset);
        assert_eq!(0, container.segment1_blocks[&STRING_POOL_BLOCK_ID][0]);

        let actual = Fmdl::from_container(&container).unwrap();
        assert_eq!("hips", actual.bones[0].name);
    }

    #[test]
    fn aliased_uv_channels_share_storage() {
        let mesh = Mesh {
            vertices: vec![Vertex {
                position: Vec3::ZERO,
                uv: vec![Vec2::new(0.5, 0.25); 2],
                ..Default::default()
            }],
            bone_group: None,
            material_instance: 0,
            vertex_fields: VertexFields {
                uv_count: 2,
                uv_equalities: BTreeMap::from([(0, vec![1]), (1, vec![0])]),
                ..Default::default()
            },
            ..Default::default()
        };
        let model = Fmdl {
            material_instances: vec![basic_material()],
            meshes: vec![mesh],
            mesh_groups: vec![group_of(vec![0])],
            ..Default::default()
        };

        let bytes = model.to_bytes().unwrap();
        let actual = Fmdl::from_bytes(&bytes).unwrap();

        assert_eq!(model, actual);
        let fields = &actual.meshes[0].vertex_fields;
        assert_eq!(vec![1], fields.uv_equalities[&0]);
        assert_eq!(vec![0], fields.uv_equalities[&1]);

        // Both channels resolve to the same on-disk offset.
        let container = FmdlContainer::read(&mut Cursor::new(&bytes)).unwrap();
        let formats: Vec<_> = container.segment0_blocks[&VertexFormatRecord::BLOCK_ID]
            .iter()
            .map(|bytes| VertexFormatRecord::from_bytes(bytes).unwrap())
            .collect();
        assert_eq!(VertexDatumType::Uv0, formats[1].datum_type);
        assert_eq!(VertexDatumType::Uv1, formats[2].datum_type);
        assert_eq!(formats[1].offset, formats[2].offset);
    }

    #[test]
    fn bone_weights_sorted_and_truncated() {
        let bones: Vec<Bone> = (0..5)
            .map(|i| Bone {
                name: format!("b{}", i),
                ..Default::default()
            })
            .collect();
        let mesh = Mesh {
            vertices: vec![Vertex {
                position: Vec3::ZERO,
                bone_mapping: Some(BTreeMap::from([
                    (0, 0.4f32),
                    (1, 0.3),
                    (2, 0.2),
                    (3, 0.05),
                    (4, 0.05),
                ])),
                ..Default::default()
            }],
            faces: vec![Face {
                vertices: [0, 0, 0],
            }],
            bone_group: Some(BoneGroup {
                bones: vec![0, 1, 2, 3, 4],
            }),
            material_instance: 0,
            vertex_fields: VertexFields {
                has_bone_mapping: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let model = Fmdl {
            bones,
            material_instances: vec![basic_material()],
            meshes: vec![mesh],
            mesh_groups: vec![group_of(vec![0])],
            ..Default::default()
        };

        let container = model.to_container().unwrap();

        // The 12-byte position section pads to 16; the data section opens
        // with the weight bytes, then the bone index bytes.
        let vertex_block = &container.segment1_blocks[&VERTEX_BLOCK_ID];
        assert_eq!([102, 76, 51, 12], vertex_block[16..20]);
        assert_eq!([0, 1, 2, 3], vertex_block[20..24]);
    }

    #[test]
    fn out_of_range_bone_index_is_dropped_on_read() {
        let mesh = Mesh {
            vertices: vec![Vertex {
                position: Vec3::ZERO,
                bone_mapping: Some(BTreeMap::from([(0, 1.0f32)])),
                ..Default::default()
            }],
            bone_group: Some(BoneGroup { bones: vec![0] }),
            material_instance: 0,
            vertex_fields: VertexFields {
                has_bone_mapping: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let model = Fmdl {
            bones: vec![Bone {
                name: "root".into(),
                ..Default::default()
            }],
            material_instances: vec![basic_material()],
            meshes: vec![mesh],
            mesh_groups: vec![group_of(vec![0])],
            ..Default::default()
        };

        let mut container = model.to_container().unwrap();
        // Point the first bone index byte outside the one-bone group.
        container.segment1_blocks.get_mut(&VERTEX_BLOCK_ID).unwrap()[20] = 9;

        let actual = Fmdl::from_container(&container).unwrap();
        assert_eq!(
            Some(BTreeMap::new()),
            actual.meshes[0].vertices[0].bone_mapping
        );
    }

    #[test]
    fn oversized_bone_group_fails() {
        let bones: Vec<Bone> = (0..33)
            .map(|i| Bone {
                name: format!("b{}", i),
                ..Default::default()
            })
            .collect();
        let mesh = Mesh {
            vertices: vec![Vertex {
                position: Vec3::ZERO,
                bone_mapping: Some(BTreeMap::new()),
                ..Default::default()
            }],
            bone_group: Some(BoneGroup {
                bones: (0..33).collect(),
            }),
            material_instance: 0,
            vertex_fields: VertexFields {
                has_bone_mapping: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let model = Fmdl {
            bones,
            material_instances: vec![basic_material()],
            meshes: vec![mesh],
            mesh_groups: vec![group_of(vec![0])],
            ..Default::default()
        };

        assert!(matches!(
            model.to_container(),
            Err(Error::BoneGroupOverflow(33))
        ));
    }

    #[test]
    fn unassigned_mesh_is_rejected_on_read() {
        let model = Fmdl {
            material_instances: vec![basic_material()],
            meshes: vec![Mesh {
                vertices: vec![Vertex {
                    position: Vec3::ZERO,
                    ..Default::default()
                }],
                material_instance: 0,
                ..Default::default()
            }],
            mesh_groups: vec![group_of(vec![0])],
            ..Default::default()
        };

        let mut container = model.to_container().unwrap();
        container
            .segment0_blocks
            .remove(&MeshGroupAssignmentRecord::BLOCK_ID);

        assert!(matches!(
            Fmdl::from_container(&container),
            Err(Error::UnassignedMesh(0))
        ));
    }

    #[test]
    fn doubly_assigned_mesh_is_rejected_on_read() {
        let model = Fmdl {
            material_instances: vec![basic_material()],
            meshes: vec![Mesh {
                vertices: vec![Vertex {
                    position: Vec3::ZERO,
                    ..Default::default()
                }],
                material_instance: 0,
                ..Default::default()
            }],
            mesh_groups: vec![group_of(vec![0])],
            ..Default::default()
        };

        let mut container = model.to_container().unwrap();
        let block = container
            .segment0_blocks
            .get_mut(&MeshGroupAssignmentRecord::BLOCK_ID)
            .unwrap();
        let record = block[0].clone();
        block.push(record);

        assert!(matches!(
            Fmdl::from_container(&container),
            Err(Error::DuplicateAssignment(_))
        ));
    }

    #[test]
    fn duplicate_texture_role_fails_on_write() {
        let mut material = basic_material();
        material.textures.push(material.textures[0].clone());
        let model = Fmdl {
            material_instances: vec![material],
            ..Default::default()
        };

        assert!(matches!(
            model.to_container(),
            Err(Error::DuplicateAssignment(_))
        ));
    }

    #[test]
    fn meshless_group_keeps_its_bounding_box() {
        let unit_box = BoundingBox {
            max: Vec4::new(2.0, 2.0, 2.0, 1.0),
            min: Vec4::new(-2.0, -2.0, -2.0, 1.0),
        };
        let model = Fmdl {
            mesh_groups: vec![MeshGroup {
                name: "empty".into(),
                bounding_box: Some(unit_box),
                visible: true,
                ..Default::default()
            }],
            ..Default::default()
        };

        let actual = Fmdl::from_bytes(&model.to_bytes().unwrap()).unwrap();

        assert_eq!(model, actual);
        assert_eq!(Some(unit_box), actual.mesh_groups[0].bounding_box);
    }
}
