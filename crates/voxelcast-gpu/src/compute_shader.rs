//! Compute pipeline with its descriptor set and push-constant block.

use crate::context::GpuContext;
use crate::descriptors::{
    check_binding, pool_sizes, write_buffer, write_storage_image, DescriptorBindingInfo,
    DescriptorPool, DescriptorSetLayoutBuilder,
};
use crate::error::{GpuError, Result};
use crate::image::Image3D;
use crate::memory::GpuBuffer;
use ash::vk;

/// A compute shader ready to dispatch.
///
/// Owns the pipeline, its layout, one descriptor set and a host copy of the
/// push-constant block that is pushed on every recorded dispatch.
pub struct ComputeShader<'ctx> {
    ctx: &'ctx GpuContext,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layout: vk::DescriptorSetLayout,
    // Frees the set when dropped
    #[allow(dead_code)]
    descriptor_pool: DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    bindings: Vec<DescriptorBindingInfo>,
    push_constants: Vec<u8>,
}

impl<'ctx> ComputeShader<'ctx> {
    /// Build a pipeline from SPIR-V words.
    ///
    /// `push_constant_size` is the byte size of the shader's push-constant
    /// block, 0 if it declares none.
    pub fn new(
        ctx: &'ctx GpuContext,
        spirv: &[u32],
        bindings: &[DescriptorBindingInfo],
        push_constant_size: u32,
    ) -> Result<Self> {
        let device = ctx.device();

        let shader_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        let module = unsafe { device.create_shader_module(&shader_info, None) }
            .map_err(|e| GpuError::ShaderLoad(format!("Shader module creation failed: {e}")))?;

        // Module is only needed until the pipeline exists
        let built = unsafe {
            Self::build_layouts_and_pipeline(device, module, bindings, push_constant_size)
        };
        unsafe { device.destroy_shader_module(module, None) };
        let (set_layout, layout, pipeline) = built?;

        let descriptors = DescriptorPool::new(device, 1, &pool_sizes(bindings)).and_then(|pool| {
            let set = pool
                .allocate(&[set_layout])?
                .first()
                .copied()
                .ok_or_else(|| GpuError::InvalidState("No descriptor set allocated".to_string()))?;
            Ok((pool, set))
        });

        let (descriptor_pool, descriptor_set) = match descriptors {
            Ok(descriptors) => descriptors,
            Err(e) => {
                unsafe { Self::destroy_pipeline(device, pipeline, layout, set_layout) };
                return Err(e);
            }
        };

        tracing::debug!(
            "Created compute pipeline with {} bindings, {push_constant_size} push-constant bytes",
            bindings.len()
        );

        Ok(Self {
            ctx,
            pipeline,
            layout,
            set_layout,
            descriptor_pool,
            descriptor_set,
            bindings: bindings.to_vec(),
            push_constants: vec![0; push_constant_size as usize],
        })
    }

    unsafe fn build_layouts_and_pipeline(
        device: &ash::Device,
        module: vk::ShaderModule,
        bindings: &[DescriptorBindingInfo],
        push_constant_size: u32,
    ) -> Result<(vk::DescriptorSetLayout, vk::PipelineLayout, vk::Pipeline)> {
        let set_layout = DescriptorSetLayoutBuilder::new()
            .compute_bindings(bindings)
            .build(device)?;

        let push_constant_ranges: Vec<vk::PushConstantRange> = (push_constant_size > 0)
            .then(|| {
                vk::PushConstantRange::default()
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
                    .offset(0)
                    .size(push_constant_size)
            })
            .into_iter()
            .collect();

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(std::slice::from_ref(&set_layout))
            .push_constant_ranges(&push_constant_ranges);

        let layout = match device.create_pipeline_layout(&layout_info, None) {
            Ok(layout) => layout,
            Err(e) => {
                device.destroy_descriptor_set_layout(set_layout, None);
                return Err(GpuError::PipelineCreation(e.to_string()));
            }
        };

        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main");

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage_info)
            .layout(layout);

        let pipeline = device
            .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_pipelines, e)| GpuError::PipelineCreation(e.to_string()))
            .and_then(|pipelines| {
                pipelines.first().copied().ok_or_else(|| {
                    GpuError::PipelineCreation("No pipeline returned".to_string())
                })
            });

        match pipeline {
            Ok(pipeline) => Ok((set_layout, layout, pipeline)),
            Err(e) => {
                device.destroy_pipeline_layout(layout, None);
                device.destroy_descriptor_set_layout(set_layout, None);
                Err(e)
            }
        }
    }

    unsafe fn destroy_pipeline(
        device: &ash::Device,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        set_layout: vk::DescriptorSetLayout,
    ) {
        device.destroy_pipeline(pipeline, None);
        device.destroy_pipeline_layout(layout, None);
        device.destroy_descriptor_set_layout(set_layout, None);
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    /// Bind a storage image; it is accessed in `GENERAL` layout.
    pub fn update_storage_image(&self, binding: u32, image: &Image3D<'_>) -> Result<()> {
        check_binding(&self.bindings, binding, vk::DescriptorType::STORAGE_IMAGE)?;
        unsafe {
            write_storage_image(
                self.ctx.device(),
                self.descriptor_set,
                binding,
                image.view(),
                vk::ImageLayout::GENERAL,
            );
        }
        Ok(())
    }

    /// Bind the whole of `buffer` as a storage buffer.
    pub fn update_storage_buffer(&self, binding: u32, buffer: &GpuBuffer<'_>) -> Result<()> {
        self.update_buffer(binding, vk::DescriptorType::STORAGE_BUFFER, buffer)
    }

    /// Bind the whole of `buffer` as a uniform buffer.
    pub fn update_uniform_buffer(&self, binding: u32, buffer: &GpuBuffer<'_>) -> Result<()> {
        self.update_buffer(binding, vk::DescriptorType::UNIFORM_BUFFER, buffer)
    }

    fn update_buffer(
        &self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        buffer: &GpuBuffer<'_>,
    ) -> Result<()> {
        check_binding(&self.bindings, binding, descriptor_type)?;
        unsafe {
            write_buffer(
                self.ctx.device(),
                self.descriptor_set,
                binding,
                descriptor_type,
                buffer.handle(),
                buffer.size(),
            );
        }
        Ok(())
    }

    /// Whether the shader declared a push-constant block.
    pub fn has_push_constants(&self) -> bool {
        !self.push_constants.is_empty()
    }

    /// Replace the push-constant block; `value` must match its size exactly.
    pub fn set_push_constants<T: bytemuck::Pod>(&mut self, value: &T) -> Result<()> {
        let bytes = bytemuck::bytes_of(value);
        if bytes.len() != self.push_constants.len() {
            return Err(GpuError::InvalidState(format!(
                "Push constants are {} bytes, got {}",
                self.push_constants.len(),
                bytes.len()
            )));
        }
        self.push_constants.copy_from_slice(bytes);
        Ok(())
    }

    /// Record pipeline and descriptor binds, push constants (if any) and the
    /// dispatch itself.
    ///
    /// # Safety
    /// `cmd` must be in the recording state.
    pub unsafe fn record_dispatch(&self, cmd: vk::CommandBuffer, group_counts: [u32; 3]) {
        let device = self.ctx.device();

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::COMPUTE,
            self.layout,
            0,
            &[self.descriptor_set],
            &[],
        );

        if self.has_push_constants() {
            device.cmd_push_constants(
                cmd,
                self.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                &self.push_constants,
            );
        }

        let [x, y, z] = group_counts;
        device.cmd_dispatch(cmd, x, y, z);
    }
}

impl Drop for ComputeShader<'_> {
    fn drop(&mut self) {
        unsafe {
            Self::destroy_pipeline(self.ctx.device(), self.pipeline, self.layout, self.set_layout);
        }
    }
}
