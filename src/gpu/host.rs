use std::borrow::Cow;
use std::collections::HashMap;

use bevy::log::info;
use bevy::render::render_resource::{
    BindGroup, BindGroupEntry, BindGroupLayout, BindingResource, Buffer, BufferInitDescriptor,
    BufferUsages, ComputePipeline, RawComputePipelineDescriptor, Sampler, Texture, TextureView,
};
use bevy::render::renderer::{RenderDevice, RenderQueue};
use bevy::tasks::block_on;

use crate::config::FieldFilter;
use crate::error::HostError;
use crate::gpu::bindings::{FIELD_FORMAT, layout_entries};
use crate::gpu::ffi::SlimeParams;
use crate::host::{
    BufferHandle, ComputeHost, HostLimits, ResourceHandle, TextureDescriptor, TextureHandle, UniformName,
    UniformValue,
};
use crate::stages::{FieldExtent, GroupCount, PARAMS_BINDING, ResourceSlot, StageDescriptor, StageId};

pub const SLIME_SHADER: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/shaders/slime.wgsl"
));

struct GpuField {
    texture: Texture,
    view: TextureView,
    sampler: Sampler,
    extent: FieldExtent,
}

struct GpuStage {
    descriptor: StageDescriptor,
    layout: BindGroupLayout,
    pipeline: ComputePipeline,
    bindings: HashMap<ResourceSlot, ResourceHandle>,
    // rebuilt lazily after any bind()
    bind_group: Option<BindGroup>,
}

/// What an external presenter needs to sample the display surface.
#[derive(Clone)]
pub struct DisplaySurface {
    pub texture: Texture,
    pub view: TextureView,
    pub sampler: Sampler,
}

/// [`ComputeHost`] over Bevy's render device and queue.
///
/// Uniform writes are staged with `write_buffer`, so every command in one
/// submission sees the uniform values current at `submit`.
pub struct RenderDeviceHost {
    device: RenderDevice,
    queue: RenderQueue,
    module: wgpu::ShaderModule,
    textures: Vec<Option<GpuField>>,
    buffers: Vec<Option<Buffer>>,
    stages: HashMap<StageId, GpuStage>,
    params: SlimeParams,
    params_buffer: Buffer,
    params_dirty: bool,
    encoder: Option<wgpu::CommandEncoder>,
}

// the device's scope stack is shared with the render thread, so a scope
// never outlives the single call it wraps
trait ErrorScopes {
    fn push_scope(&self, filter: wgpu::ErrorFilter);
    fn pop_scope(&self) -> Option<wgpu::Error>;
}

impl ErrorScopes for wgpu::Device {
    fn push_scope(&self, filter: wgpu::ErrorFilter) {
        self.push_error_scope(filter);
    }

    fn pop_scope(&self) -> Option<wgpu::Error> {
        block_on(self.pop_error_scope())
    }
}

fn scoped<S: ErrorScopes + ?Sized, T>(
    scopes: &S,
    filter: wgpu::ErrorFilter,
    call: impl FnOnce() -> T,
) -> Result<T, HostError> {
    scopes.push_scope(filter);
    let value = call();
    match scopes.pop_scope() {
        None => Ok(value),
        Some(wgpu::Error::OutOfMemory { .. }) => Err(HostError::OutOfMemory),
        Some(err) => Err(HostError::Validation(err.to_string())),
    }
}

fn filter_mode(filter: FieldFilter) -> wgpu::FilterMode {
    match filter {
        FieldFilter::Point => wgpu::FilterMode::Nearest,
        FieldFilter::Linear => wgpu::FilterMode::Linear,
    }
}

fn extent3d(extent: FieldExtent) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: extent.width,
        height: extent.height,
        depth_or_array_layers: 1,
    }
}

impl RenderDeviceHost {
    pub fn new(device: RenderDevice, queue: RenderQueue) -> Result<Self, HostError> {
        let wgpu_device = device.wgpu_device();
        let module = scoped(wgpu_device, wgpu::ErrorFilter::Validation, || {
            wgpu_device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("slime_kernels"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(SLIME_SHADER)),
            })
        })?;

        let params = SlimeParams::default();
        let params_buffer = device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("slime_params"),
            contents: bytemuck::bytes_of(&params),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });

        Ok(Self {
            device,
            queue,
            module,
            textures: Vec::new(),
            buffers: Vec::new(),
            stages: HashMap::new(),
            params,
            params_buffer,
            params_dirty: false,
            encoder: None,
        })
    }

    /// Texture, view and sampler behind a handle, for the external presenter.
    pub fn display_surface(&self, handle: TextureHandle) -> Option<DisplaySurface> {
        let field = self.textures.get(handle.0 as usize)?.as_ref()?;
        Some(DisplaySurface {
            texture: field.texture.clone(),
            view: field.view.clone(),
            sampler: field.sampler.clone(),
        })
    }

    fn field(&self, handle: TextureHandle) -> Result<&GpuField, HostError> {
        self.textures
            .get(handle.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(HostError::UnknownHandle)
    }

    fn flush_params(&mut self) {
        if self.params_dirty {
            self.queue
                .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&self.params));
            self.params_dirty = false;
        }
    }

    fn ensure_recording(&mut self) {
        if self.encoder.is_none() {
            // recording errors surface at finish(), inside submit's scope
            self.encoder = Some(self.device.create_command_encoder(
                &wgpu::CommandEncoderDescriptor {
                    label: Some("slime_commands"),
                },
            ));
        }
    }

    fn ensure_bind_group(&mut self, stage: StageId) -> Result<(), HostError> {
        let gpu_stage = self.stages.get(&stage).ok_or(HostError::UnknownHandle)?;
        if gpu_stage.bind_group.is_some() {
            return Ok(());
        }

        let bind_group = {
            let mut entries = vec![BindGroupEntry {
                binding: PARAMS_BINDING,
                resource: self.params_buffer.as_entire_binding(),
            }];
            for binding in &gpu_stage.descriptor.slots {
                let handle = gpu_stage
                    .bindings
                    .get(&binding.slot)
                    .ok_or(HostError::Unbound {
                        stage,
                        slot: binding.slot,
                    })?;
                let resource = match *handle {
                    ResourceHandle::Texture(t) => BindingResource::TextureView(&self.field(t)?.view),
                    ResourceHandle::Buffer(b) => self
                        .buffers
                        .get(b.0 as usize)
                        .and_then(Option::as_ref)
                        .ok_or(HostError::UnknownHandle)?
                        .as_entire_binding(),
                };
                entries.push(BindGroupEntry {
                    binding: binding.slot.binding(),
                    resource,
                });
            }
            self.device
                .create_bind_group(stage.label(), &gpu_stage.layout, &entries)
        };

        if let Some(gpu_stage) = self.stages.get_mut(&stage) {
            gpu_stage.bind_group = Some(bind_group);
        }
        Ok(())
    }

    fn invalidate_bind_groups(&mut self) {
        for stage in self.stages.values_mut() {
            stage.bind_group = None;
        }
    }
}

impl ComputeHost for RenderDeviceHost {
    fn limits(&self) -> HostLimits {
        let limits = self.device.limits();
        HostLimits {
            max_texture_dimension: limits.max_texture_dimension_2d,
            max_buffer_size: (limits.max_storage_buffer_binding_size as u64)
                .min(limits.max_buffer_size),
            max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
        }
    }

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        texels: Option<&[f32]>,
    ) -> Result<TextureHandle, HostError> {
        let FieldExtent { width, height } = desc.extent;
        if width == 0 || height == 0 {
            return Err(HostError::ZeroSized("texture"));
        }
        let limit = self.limits().max_texture_dimension;
        if width.max(height) > limit {
            return Err(HostError::ExceedsLimit {
                what: "texture dimension",
                requested: width.max(height) as u64,
                limit: limit as u64,
            });
        }
        if let Some(texels) = texels {
            if texels.len() as u64 != desc.extent.pixel_count() {
                return Err(HostError::Validation(
                    "texel count does not match extent".into(),
                ));
            }
        }

        let usage = if desc.random_write {
            wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST
        } else {
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST
        };

        let texture = scoped(self.device.wgpu_device(), wgpu::ErrorFilter::OutOfMemory, || {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(desc.label),
                size: extent3d(desc.extent),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: FIELD_FORMAT,
                usage,
                view_formats: &[],
            })
        })?;

        if let Some(texels) = texels {
            self.queue.write_texture(
                texture.as_image_copy(),
                bytemuck::cast_slice(texels),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * 4),
                    rows_per_image: Some(height),
                },
                extent3d(desc.extent),
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let filter = filter_mode(desc.filter);
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(desc.label),
            mag_filter: filter,
            min_filter: filter,
            ..Default::default()
        });

        let handle = TextureHandle(self.textures.len() as u32);
        self.textures.push(Some(GpuField {
            texture,
            view,
            sampler,
            extent: desc.extent,
        }));
        info!("{}: {}x{} texture", desc.label, width, height);
        Ok(handle)
    }

    fn create_buffer(
        &mut self,
        label: &'static str,
        contents: &[u8],
    ) -> Result<BufferHandle, HostError> {
        let size = contents.len() as u64;
        if size == 0 {
            return Err(HostError::ZeroSized("buffer"));
        }
        let limit = self.limits().max_buffer_size;
        if size > limit {
            return Err(HostError::ExceedsLimit {
                what: "storage buffer size",
                requested: size,
                limit,
            });
        }

        let buffer = scoped(self.device.wgpu_device(), wgpu::ErrorFilter::OutOfMemory, || {
            self.device.create_buffer_with_data(&BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            })
        })?;

        let handle = BufferHandle(self.buffers.len() as u32);
        self.buffers.push(Some(buffer));
        info!("{label}: {size} byte storage buffer");
        Ok(handle)
    }

    fn register_stage(&mut self, stage: &StageDescriptor) -> Result<(), HostError> {
        let label = stage.id.label();
        let entries = layout_entries(stage);

        let scopes = self.device.wgpu_device();
        let (layout, pipeline) = scoped(scopes, wgpu::ErrorFilter::Validation, || {
            let layout = self.device.create_bind_group_layout(Some(label), &entries);
            let pipeline_layout = self
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(label),
                    bind_group_layouts: &[&*layout],
                    push_constant_ranges: &[],
                });
            let pipeline = self
                .device
                .create_compute_pipeline(&RawComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(&pipeline_layout),
                    module: &self.module,
                    entry_point: Some(stage.entry_point),
                    compilation_options: Default::default(),
                    cache: None,
                });
            (layout, pipeline)
        })?;

        self.stages.insert(
            stage.id,
            GpuStage {
                descriptor: stage.clone(),
                layout,
                pipeline,
                bindings: HashMap::new(),
                bind_group: None,
            },
        );
        info!("{label} pipeline READY ({})", stage.entry_point);
        Ok(())
    }

    fn bind(
        &mut self,
        stage: StageId,
        slot: ResourceSlot,
        resource: ResourceHandle,
    ) -> Result<(), HostError> {
        let exists = match resource {
            ResourceHandle::Texture(t) => self.field(t).is_ok(),
            ResourceHandle::Buffer(b) => matches!(self.buffers.get(b.0 as usize), Some(Some(_))),
        };
        if !exists {
            return Err(HostError::UnknownHandle);
        }
        let gpu_stage = self
            .stages
            .get_mut(&stage)
            .ok_or(HostError::Unbound { stage, slot })?;
        if gpu_stage.descriptor.slot(slot).is_none() {
            return Err(HostError::Unbound { stage, slot });
        }
        gpu_stage.bindings.insert(slot, resource);
        gpu_stage.bind_group = None;
        Ok(())
    }

    fn set_uniform(&mut self, name: UniformName, value: UniformValue) -> Result<(), HostError> {
        self.params.set(name, value);
        self.params_dirty = true;
        Ok(())
    }

    fn dispatch(&mut self, stage: StageId, groups: GroupCount) -> Result<(), HostError> {
        let max = self.limits().max_workgroups_per_dimension;
        let dims = groups.as_array();
        if dims.iter().any(|&d| d == 0 || d > max) {
            return Err(HostError::InvalidGroupCount(dims));
        }

        self.ensure_bind_group(stage)?;
        self.flush_params();
        self.ensure_recording();

        let (Some(encoder), Some(gpu_stage)) = (self.encoder.as_mut(), self.stages.get(&stage))
        else {
            return Err(HostError::UnknownHandle);
        };
        let bind_group = gpu_stage
            .bind_group
            .as_ref()
            .ok_or(HostError::UnknownHandle)?;

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(stage.label()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&gpu_stage.pipeline);
        pass.set_bind_group(0, &**bind_group, &[]);
        pass.dispatch_workgroups(groups.x, groups.y, groups.z);
        Ok(())
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<(), HostError> {
        let src_extent = self.field(src)?.extent;
        let dst_extent = self.field(dst)?.extent;
        if src_extent != dst_extent {
            return Err(HostError::SizeMismatch);
        }
        self.ensure_recording();

        let (Some(Some(src)), Some(Some(dst))) = (
            self.textures.get(src.0 as usize),
            self.textures.get(dst.0 as usize),
        ) else {
            return Err(HostError::UnknownHandle);
        };
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(HostError::UnknownHandle);
        };
        encoder.copy_texture_to_texture(
            src.texture.as_image_copy(),
            dst.texture.as_image_copy(),
            extent3d(src_extent),
        );
        Ok(())
    }

    fn submit(&mut self) -> Result<(), HostError> {
        self.flush_params();
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };
        scoped(self.device.wgpu_device(), wgpu::ErrorFilter::Validation, || {
            self.queue.submit([encoder.finish()]);
        })
    }

    fn abandon(&mut self) {
        self.encoder = None;
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if let Some(field) = self
            .textures
            .get_mut(texture.0 as usize)
            .and_then(Option::take)
        {
            field.texture.destroy();
            self.invalidate_bind_groups();
        }
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buffer) = self
            .buffers
            .get_mut(buffer.0 as usize)
            .and_then(Option::take)
        {
            buffer.destroy();
            self.invalidate_bind_groups();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;

    #[derive(Default)]
    struct ScopeStack {
        depth: Cell<u32>,
        pending: RefCell<Option<wgpu::Error>>,
    }

    impl ErrorScopes for ScopeStack {
        fn push_scope(&self, _filter: wgpu::ErrorFilter) {
            self.depth.set(self.depth.get() + 1);
        }

        fn pop_scope(&self) -> Option<wgpu::Error> {
            self.depth.set(self.depth.get() - 1);
            self.pending.borrow_mut().take()
        }
    }

    #[test]
    fn scope_is_closed_when_the_call_returns() {
        let stack = ScopeStack::default();
        let value = scoped(&stack, wgpu::ErrorFilter::Validation, || {
            assert_eq!(stack.depth.get(), 1);
            7
        });
        assert_eq!(value, Ok(7));
        assert_eq!(stack.depth.get(), 0);
    }

    #[test]
    fn scoped_errors_become_host_errors() {
        let stack = ScopeStack::default();
        *stack.pending.borrow_mut() = Some(wgpu::Error::OutOfMemory {
            source: Box::new(std::fmt::Error),
        });
        assert_eq!(
            scoped(&stack, wgpu::ErrorFilter::OutOfMemory, || ()),
            Err(HostError::OutOfMemory)
        );

        *stack.pending.borrow_mut() = Some(wgpu::Error::Validation {
            source: Box::new(std::fmt::Error),
            description: "bad binding".into(),
        });
        let err = scoped(&stack, wgpu::ErrorFilter::Validation, || ());
        assert!(matches!(err, Err(HostError::Validation(_))));
        assert_eq!(stack.depth.get(), 0);
    }

    #[test]
    fn filters_map_to_wgpu_modes() {
        assert_eq!(filter_mode(FieldFilter::Point), wgpu::FilterMode::Nearest);
        assert_eq!(filter_mode(FieldFilter::Linear), wgpu::FilterMode::Linear);
    }

    #[test]
    fn fields_are_single_layer() {
        let size = extent3d(FieldExtent::new(1920, 1080));
        assert_eq!((size.width, size.height, size.depth_or_array_layers), (1920, 1080, 1));
    }
}
