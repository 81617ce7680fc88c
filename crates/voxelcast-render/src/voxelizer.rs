//! Mesh voxelization on the GPU.

use std::path::Path;

use ash::vk;
use voxelcast_core::constants::LOCAL_SIZE;
use voxelcast_core::{load_obj, GridExtent, MeshData, Params};
use voxelcast_gpu::{
    ComputeShader, DescriptorBindingInfo, GpuBuffer, GpuContext, GpuError, Image3D,
    MemoryLocation, Result,
};

pub const IMAGE_BINDING: u32 = 0;
pub const VERTEX_BINDING: u32 = 1;
pub const INDEX_BINDING: u32 = 2;
pub const PARAMS_BINDING: u32 = 3;

/// Descriptor bindings the voxelization shader declares.
pub const BINDINGS: [DescriptorBindingInfo; 4] = [
    DescriptorBindingInfo::storage_image(IMAGE_BINDING),
    DescriptorBindingInfo::storage_buffer(VERTEX_BINDING),
    DescriptorBindingInfo::storage_buffer(INDEX_BINDING),
    DescriptorBindingInfo::uniform_buffer(PARAMS_BINDING),
];

/// Owns the voxel grid image, the mesh buffers and the compute shader that
/// fills the grid.
pub struct Voxelizer<'ctx> {
    ctx: &'ctx GpuContext,
    shader: ComputeShader<'ctx>,
    image: Image3D<'ctx>,
    vertex_buffer: GpuBuffer<'ctx>,
    index_buffer: GpuBuffer<'ctx>,
    params_buffer: GpuBuffer<'ctx>,
    index_count: u32,
}

impl<'ctx> Voxelizer<'ctx> {
    /// Build every resource, loading the mesh from an OBJ file.
    ///
    /// Creation order is shader, image, mesh, vertex and index buffers,
    /// params buffer, descriptor writes. The first failure stops the
    /// sequence and everything created so far is released.
    pub fn new(
        ctx: &'ctx GpuContext,
        spirv: &[u32],
        extent: GridExtent,
        mesh_path: &Path,
    ) -> Result<Self> {
        Self::build(ctx, spirv, extent, || Ok(load_obj(mesh_path)?))
    }

    /// Build every resource around an in-memory mesh.
    pub fn from_mesh(
        ctx: &'ctx GpuContext,
        spirv: &[u32],
        extent: GridExtent,
        mesh: MeshData,
    ) -> Result<Self> {
        Self::build(ctx, spirv, extent, || {
            mesh.validate()?;
            Ok(mesh)
        })
    }

    fn build(
        ctx: &'ctx GpuContext,
        spirv: &[u32],
        extent: GridExtent,
        load_mesh: impl FnOnce() -> Result<MeshData>,
    ) -> Result<Self> {
        let extent = extent.validate()?;
        let group_counts = extent.group_counts();
        if !ctx.capabilities().supports_dispatch(
            LOCAL_SIZE,
            group_counts,
            [extent.width, extent.height, extent.depth],
        ) {
            return Err(GpuError::InvalidState(format!(
                "Device cannot dispatch {group_counts:?} groups over a {extent} image"
            )));
        }

        let shader = ComputeShader::new(ctx, spirv, &BINDINGS, 0)?;
        let image = Image3D::new(ctx, extent, "voxel grid")?;

        let mesh = load_mesh()?;
        let index_count = mesh.index_count();

        let vertex_buffer = GpuBuffer::with_data(
            ctx,
            &mesh.padded_positions(),
            vk::BufferUsageFlags::STORAGE_BUFFER,
            "mesh vertices",
        )?;
        let index_buffer = GpuBuffer::with_data(
            ctx,
            &mesh.indices,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            "mesh indices",
        )?;

        let params_buffer = GpuBuffer::new(
            ctx,
            u64::from(Params::SIZE),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            "voxelize params",
        )?;

        shader.update_storage_image(IMAGE_BINDING, &image)?;
        shader.update_storage_buffer(VERTEX_BINDING, &vertex_buffer)?;
        shader.update_storage_buffer(INDEX_BINDING, &index_buffer)?;
        shader.update_uniform_buffer(PARAMS_BINDING, &params_buffer)?;

        tracing::info!(
            "Voxelizer ready: {extent} grid, {} triangles, {group_counts:?} workgroups",
            index_count / 3
        );

        let mut voxelizer = Self {
            ctx,
            shader,
            image,
            vertex_buffer,
            index_buffer,
            params_buffer,
            index_count,
        };
        voxelizer.set_scale(1.0)?;
        Ok(voxelizer)
    }

    pub fn extent(&self) -> GridExtent {
        self.image.extent()
    }

    /// Number of mesh indices passed to the shader.
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Size of the mesh buffers in bytes, vertices then indices.
    pub fn mesh_buffer_sizes(&self) -> (u64, u64) {
        (self.vertex_buffer.size(), self.index_buffer.size())
    }

    /// Write `Params { index_count, scale }` for the next dispatch.
    pub fn set_scale(&mut self, scale: f32) -> Result<()> {
        self.params_buffer
            .write(&[Params::new(self.index_count, scale)])
    }

    /// Run the shader over the whole grid and leave the image ready to copy.
    ///
    /// Blocks until the compute queue is idle.
    pub fn dispatch(&self) -> Result<()> {
        let device = self.ctx.device();
        let image = self.image.handle();
        let group_counts = self.extent().group_counts();

        unsafe {
            self.ctx.execute(self.ctx.command_pool().primary(), |cmd| {
                record_image_barrier(device, cmd, storage_write_barrier(image));
                self.shader.record_dispatch(cmd, group_counts);
                record_image_barrier(device, cmd, transfer_read_barrier(image));
            })
        }
    }

    /// Copy the grid back to the host. Call after [`Self::dispatch`].
    pub fn read_back(&self) -> Result<Vec<u8>> {
        self.image.read_back()
    }
}

/// Previous contents are discarded; the shader writes every texel.
pub fn storage_write_barrier(image: vk::Image) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
        .src_access_mask(vk::AccessFlags2::NONE)
        .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
        .dst_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::GENERAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(Image3D::subresource_range())
}

/// Makes shader writes visible to the read-back copy.
pub fn transfer_read_barrier(image: vk::Image) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
        .src_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
        .dst_access_mask(vk::AccessFlags2::TRANSFER_READ)
        .old_layout(vk::ImageLayout::GENERAL)
        .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(Image3D::subresource_range())
}

unsafe fn record_image_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    barrier: vk::ImageMemoryBarrier2<'_>,
) {
    let dependency_info =
        vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
    device.cmd_pipeline_barrier2(cmd, &dependency_info);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_match_shader_layout() {
        let types: Vec<_> = BINDINGS.iter().map(|b| (b.binding, b.descriptor_type)).collect();
        assert_eq!(
            types,
            vec![
                (0, vk::DescriptorType::STORAGE_IMAGE),
                (1, vk::DescriptorType::STORAGE_BUFFER),
                (2, vk::DescriptorType::STORAGE_BUFFER),
                (3, vk::DescriptorType::UNIFORM_BUFFER),
            ]
        );
    }

    #[test]
    fn barriers_chain_layouts() {
        let image = vk::Image::null();
        let write = storage_write_barrier(image);
        let read = transfer_read_barrier(image);

        assert_eq!(write.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(write.new_layout, read.old_layout);
        assert_eq!(read.new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);

        assert_eq!(write.dst_stage_mask, read.src_stage_mask);
        assert_eq!(write.dst_access_mask, read.src_access_mask);
        assert_eq!(read.dst_access_mask, vk::AccessFlags2::TRANSFER_READ);
    }
}
