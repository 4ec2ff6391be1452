//! Render pipeline construction.
//!
//! Two pipelines share one shader: a fill pipeline that renders everything
//! double-sided, and an optional line pipeline for the wireframe toggle
//! (available only where the adapter exposes line polygon mode).

pub mod basic;
pub mod wireframe;

/// The pipelines the viewer draws with.
#[derive(Debug)]
pub struct RenderPipelines {
    pub fill: wgpu::RenderPipeline,
    pub wireframe: Option<wgpu::RenderPipeline>,
}

impl RenderPipelines {
    pub fn new(
        device: &wgpu::Device,
        config: &wgpu::SurfaceConfiguration,
        material_layout: &wgpu::BindGroupLayout,
        camera_layout: &wgpu::BindGroupLayout,
        supports_lines: bool,
    ) -> Self {
        let fill = basic::mk_fill_pipeline(device, config, material_layout, camera_layout);
        let wireframe = supports_lines
            .then(|| wireframe::mk_wireframe_pipeline(device, config, material_layout, camera_layout));
        Self { fill, wireframe }
    }
}
