//! Mesh and material definitions.
//!
//! Loaded assets are kept as CPU-side [`MeshData`]/[`Material`] so that
//! parsing, normalization and transform application never require a GPU
//! device. The matching GPU resources ([`GpuModel`]) are created lazily on the
//! render loop's turn and can be released and re-created at any time.

use wgpu::util::DeviceExt;

use crate::data_structures::texture::Texture;

pub trait Vertex {
    fn desc() -> wgpu::VertexBufferLayout<'static>;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub normal: [f32; 3],
}

impl Vertex for ModelVertex {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<ModelVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 5]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

/// Decoded RGBA8 pixel data for a base-color texture.
#[derive(Clone, Debug)]
pub struct Rgba8Image {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// CPU-side surface description.
///
/// `unlit` materials are not physically based; tint and wireframe requests
/// leave them untouched. Every material renders double-sided because source
/// assets are inconsistent about winding.
#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub double_sided: bool,
    pub unlit: bool,
    pub tint: Option<[f32; 3]>,
    pub wireframe: bool,
    pub base_color_image: Option<Rgba8Image>,
}

impl Material {
    /// A neutral physically-based material: mid grey, 0.5 metallic/roughness.
    pub fn neutral(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_color: [0.62, 0.62, 0.62, 1.0],
            metallic: 0.5,
            roughness: 0.5,
            double_sided: true,
            unlit: false,
            tint: None,
            wireframe: false,
            base_color_image: None,
        }
    }

    pub fn supports_tint(&self) -> bool {
        !self.unlit
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUniform {
    base_color: [f32; 4],
    // w encodes whether the tint is active
    tint: [f32; 4],
    // metallic, roughness, unlit flag, has_texture flag
    params: [f32; 4],
}

impl MaterialUniform {
    pub fn from_material(material: &Material) -> Self {
        let tint = match material.tint {
            Some([r, g, b]) if material.supports_tint() => [r, g, b, 1.0],
            _ => [1.0, 1.0, 1.0, 0.0],
        };
        Self {
            base_color: material.base_color,
            tint,
            params: [
                material.metallic,
                material.roughness,
                if material.unlit { 1.0 } else { 0.0 },
                if material.base_color_image.is_some() {
                    1.0
                } else {
                    0.0
                },
            ],
        }
    }
}

/// CPU-side triangle mesh.
#[derive(Clone, Debug)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
    pub material: usize,
}

/// A set of meshes plus the materials they index into.
#[derive(Clone, Debug, Default)]
pub struct Model {
    pub meshes: Vec<MeshData>,
    pub materials: Vec<Material>,
}

pub struct GpuMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub num_elements: u32,
    pub material: usize,
}

pub struct GpuMaterial {
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub texture: Texture,
}

/// GPU resources for one [`Model`]: buffers, bind groups and the per-node
/// instance buffer.
pub struct GpuModel {
    pub meshes: Vec<GpuMesh>,
    pub materials: Vec<GpuMaterial>,
    pub instance_buffer: wgpu::Buffer,
}

impl GpuModel {
    /// Destroys the underlying buffers and textures immediately instead of
    /// waiting for the handles to drop. Returns the number of released
    /// resource bundles.
    pub fn destroy(self) -> usize {
        let released = self.meshes.len() + self.materials.len();
        for mesh in &self.meshes {
            mesh.vertex_buffer.destroy();
            mesh.index_buffer.destroy();
        }
        for material in &self.materials {
            material.buffer.destroy();
            material.texture.texture.destroy();
        }
        self.instance_buffer.destroy();
        released
    }
}

impl Model {
    /// Uploads every mesh and material. Materials with no image get a 1x1
    /// white texture so one bind group layout serves all of them.
    pub fn upload(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        material_layout: &wgpu::BindGroupLayout,
    ) -> GpuModel {
        let meshes = self
            .meshes
            .iter()
            .map(|mesh| {
                let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("{:?} Vertex Buffer", mesh.name)),
                    contents: bytemuck::cast_slice(&mesh.vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                });
                let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("{:?} Index Buffer", mesh.name)),
                    contents: bytemuck::cast_slice(&mesh.indices),
                    usage: wgpu::BufferUsages::INDEX,
                });
                GpuMesh {
                    vertex_buffer,
                    index_buffer,
                    num_elements: mesh.indices.len() as u32,
                    material: mesh.material.min(self.materials.len().saturating_sub(1)),
                }
            })
            .collect();

        let materials = self
            .materials
            .iter()
            .map(|material| {
                let texture = match &material.base_color_image {
                    Some(img) => {
                        Texture::from_rgba8(device, queue, &img.pixels, [img.width, img.height], &material.name)
                    }
                    None => Texture::create_default_base_color(device, queue),
                };
                let uniform = MaterialUniform::from_material(material);
                let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("{:?} Material Buffer", material.name)),
                    contents: bytemuck::cast_slice(&[uniform]),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                });
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    layout: material_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&texture.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(
                                texture.sampler.as_ref().expect("base color sampler"),
                            ),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: buffer.as_entire_binding(),
                        },
                    ],
                    label: Some("material_bind_group"),
                });
                GpuMaterial {
                    buffer,
                    bind_group,
                    texture,
                }
            })
            .collect();

        let instance_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Instance Buffer"),
            contents: bytemuck::cast_slice(&[crate::data_structures::instance::Instance::default()
                .to_raw()]),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        });

        GpuModel {
            meshes,
            materials,
            instance_buffer,
        }
    }
}

/// Bind group layout shared by every material: base-color texture, sampler and
/// the material uniform.
pub fn material_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
        label: Some("Model material_bind_group_layout"),
    })
}
