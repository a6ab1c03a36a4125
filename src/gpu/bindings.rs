use bevy::render::render_resource::{
    BindGroupLayoutEntry, BindingType, BufferBindingType, ShaderStages, StorageTextureAccess,
    TextureFormat, TextureSampleType, TextureViewDimension,
};

use crate::stages::{PARAMS_BINDING, ResourceSlot, StageDescriptor};

/// Texel format of every field texture and of the environment.
pub const FIELD_FORMAT: TextureFormat = TextureFormat::R32Float;

// binding 0: Params (uniform)
fn params_entry() -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding: PARAMS_BINDING,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Layout entry for a slot. The access has to match the declaration in
/// slime.wgsl, not the stage's logical access: the trail is declared
/// read_write once and shared by every entry point.
pub fn slot_entry(slot: ResourceSlot) -> BindGroupLayoutEntry {
    let ty = match slot {
        // 1: particles (rw storage)
        ResourceSlot::Particles => BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        // 2: trail (rw storage texture)
        ResourceSlot::Trail => BindingType::StorageTexture {
            access: StorageTextureAccess::ReadWrite,
            format: FIELD_FORMAT,
            view_dimension: TextureViewDimension::D2,
        },
        // 3: diffused (write-only storage texture)
        ResourceSlot::Diffused => BindingType::StorageTexture {
            access: StorageTextureAccess::WriteOnly,
            format: FIELD_FORMAT,
            view_dimension: TextureViewDimension::D2,
        },
        // 4: environment (sampled with textureLoad only)
        ResourceSlot::Environment => BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: false },
            view_dimension: TextureViewDimension::D2,
            multisampled: false,
        },
    };
    BindGroupLayoutEntry {
        binding: slot.binding(),
        visibility: ShaderStages::COMPUTE,
        ty,
        count: None,
    }
}

/// Params plus one entry per declared slot, in binding order.
pub fn layout_entries(stage: &StageDescriptor) -> Vec<BindGroupLayoutEntry> {
    let mut entries = vec![params_entry()];
    entries.extend(stage.slots.iter().map(|b| slot_entry(b.slot)));
    entries.sort_by_key(|e| e.binding);
    entries
}
