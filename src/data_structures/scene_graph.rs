//! Scene graph and hierarchical scene organization.
//!
//! A loaded asset becomes a tree of [`SceneNode`]s wrapped in a [`SceneGraph`].
//! The graph owns two implicit container levels above the asset:
//!
//! - the *user* node, whose local transform is whatever the viewer's transform
//!   controls last set (always written absolutely, never composed)
//! - the *framing* node, whose local transform centers the asset at the origin
//!   and scales its largest dimension to two units
//!
//! GPU buffers live inside the nodes but are created lazily on the render
//! loop's turn, so a graph can be built, normalized and transformed entirely
//! without a device.

use cgmath::{ElementWise, Vector3};

use crate::data_structures::instance::Instance;
use crate::data_structures::model::{GpuMaterial, GpuMesh, GpuModel, Material, Model};

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug)]
pub struct Aabb {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: Vector3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Vector3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    pub fn extend(&mut self, point: Vector3<f32>) {
        self.min = Vector3::new(
            self.min.x.min(point.x),
            self.min.y.min(point.y),
            self.min.z.min(point.z),
        );
        self.max = Vector3::new(
            self.max.x.max(point.x),
            self.max.y.max(point.y),
            self.max.z.max(point.z),
        );
    }

    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) * 0.5
    }

    pub fn max_dimension(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let size = self.max - self.min;
        size.x.max(size.y).max(size.z)
    }
}

/// One draw for the render pass: mesh, its material, and the owning node's
/// instance buffer. `wireframe` selects the line pipeline when available.
pub struct DrawCall<'a> {
    pub mesh: &'a GpuMesh,
    pub material: &'a GpuMaterial,
    pub instance_buffer: &'a wgpu::Buffer,
    pub wireframe: bool,
}

pub trait SceneNode {
    fn children(&self) -> &[Box<dyn SceneNode>];

    fn children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>>;

    fn add_child(&mut self, child: Box<dyn SceneNode>);

    fn local_transform(&self) -> Instance;

    fn set_local_transform(&mut self, instance: Instance);

    fn visible(&self) -> bool;

    /// Hides or shows the node and its subtree. A hidden but attached node
    /// keeps its GPU resources.
    fn set_visible(&mut self, visible: bool);

    /// Recomputes the world transform of this node and its subtree from the
    /// parent's world transform.
    fn update_world_transforms(&mut self, parent: &Instance);

    /// Grows `aabb` by every vertex of the subtree, transformed by
    /// `parent * local`.
    fn extend_aabb(&self, parent: &Instance, aabb: &mut Aabb);

    fn for_each_material(&mut self, apply: &mut dyn FnMut(&mut Material));

    /// Creates missing GPU resources and refreshes instance and material
    /// buffers. Must only run on the render loop's turn.
    fn write_to_buffers(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        material_layout: &wgpu::BindGroupLayout,
    );

    /// Releases the subtree's GPU resources. Returns how many buffer bundles
    /// were destroyed. The CPU-side data stays; resources are re-created on
    /// the next `write_to_buffers`.
    fn release_gpu(&mut self) -> usize;

    fn collect_draws<'a>(&'a self, draws: &mut Vec<DrawCall<'a>>);
}

/// A node without geometry; groups children under a shared transform.
pub struct ContainerNode {
    pub children: Vec<Box<dyn SceneNode>>,
    local: Instance,
    world: Instance,
    visible: bool,
}

impl ContainerNode {
    pub fn new() -> Self {
        Self {
            children: Vec::new(),
            local: Instance::default(),
            world: Instance::default(),
            visible: true,
        }
    }
}

impl Default for ContainerNode {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneNode for ContainerNode {
    fn children(&self) -> &[Box<dyn SceneNode>] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>> {
        &mut self.children
    }

    fn add_child(&mut self, child: Box<dyn SceneNode>) {
        self.children.push(child);
    }

    fn local_transform(&self) -> Instance {
        self.local.clone()
    }

    fn set_local_transform(&mut self, instance: Instance) {
        self.local = instance;
    }

    fn visible(&self) -> bool {
        self.visible
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn update_world_transforms(&mut self, parent: &Instance) {
        self.world = parent * &self.local;
        for child in self.children.iter_mut() {
            child.update_world_transforms(&self.world);
        }
    }

    fn extend_aabb(&self, parent: &Instance, aabb: &mut Aabb) {
        let world = parent * &self.local;
        for child in &self.children {
            child.extend_aabb(&world, aabb);
        }
    }

    fn for_each_material(&mut self, apply: &mut dyn FnMut(&mut Material)) {
        for child in self.children.iter_mut() {
            child.for_each_material(apply);
        }
    }

    fn write_to_buffers(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        material_layout: &wgpu::BindGroupLayout,
    ) {
        for child in self.children.iter_mut() {
            child.write_to_buffers(device, queue, material_layout);
        }
    }

    fn release_gpu(&mut self) -> usize {
        self.children
            .iter_mut()
            .map(|child| child.release_gpu())
            .sum()
    }

    fn collect_draws<'a>(&'a self, draws: &mut Vec<DrawCall<'a>>) {
        if !self.visible {
            return;
        }
        for child in &self.children {
            child.collect_draws(draws);
        }
    }
}

/// A node carrying renderable geometry.
pub struct MeshNode {
    pub model: Model,
    children: Vec<Box<dyn SceneNode>>,
    gpu: Option<GpuModel>,
    local: Instance,
    world: Instance,
    visible: bool,
}

impl MeshNode {
    pub fn from_model(model: Model) -> Self {
        Self {
            model,
            children: Vec::new(),
            gpu: None,
            local: Instance::default(),
            world: Instance::default(),
            visible: true,
        }
    }

    pub fn has_gpu_resources(&self) -> bool {
        self.gpu.is_some()
    }
}

impl SceneNode for MeshNode {
    fn children(&self) -> &[Box<dyn SceneNode>] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>> {
        &mut self.children
    }

    fn add_child(&mut self, child: Box<dyn SceneNode>) {
        self.children.push(child);
    }

    fn local_transform(&self) -> Instance {
        self.local.clone()
    }

    fn set_local_transform(&mut self, instance: Instance) {
        self.local = instance;
    }

    fn visible(&self) -> bool {
        self.visible
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn update_world_transforms(&mut self, parent: &Instance) {
        self.world = parent * &self.local;
        for child in self.children.iter_mut() {
            child.update_world_transforms(&self.world);
        }
    }

    fn extend_aabb(&self, parent: &Instance, aabb: &mut Aabb) {
        let world = parent * &self.local;
        for mesh in &self.model.meshes {
            for vertex in &mesh.vertices {
                let p = Vector3::from(vertex.position);
                let p = world.rotation * p.mul_element_wise(world.scale) + world.position;
                aabb.extend(p);
            }
        }
        for child in &self.children {
            child.extend_aabb(&world, aabb);
        }
    }

    fn for_each_material(&mut self, apply: &mut dyn FnMut(&mut Material)) {
        for material in self.model.materials.iter_mut() {
            apply(material);
        }
        for child in self.children.iter_mut() {
            child.for_each_material(apply);
        }
    }

    fn write_to_buffers(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        material_layout: &wgpu::BindGroupLayout,
    ) {
        if self.gpu.is_none() {
            self.gpu = Some(self.model.upload(device, queue, material_layout));
        }
        let gpu = self.gpu.as_ref().expect("gpu resources just created");
        queue.write_buffer(
            &gpu.instance_buffer,
            0,
            bytemuck::cast_slice(&[self.world.to_raw()]),
        );
        // Tint and wireframe edits land here; re-writing the uniform each
        // frame keeps the applied transform idempotent.
        for (material, gpu_material) in self.model.materials.iter().zip(gpu.materials.iter()) {
            let uniform = crate::data_structures::model::MaterialUniform::from_material(material);
            queue.write_buffer(&gpu_material.buffer, 0, bytemuck::cast_slice(&[uniform]));
        }
        for child in self.children.iter_mut() {
            child.write_to_buffers(device, queue, material_layout);
        }
    }

    fn release_gpu(&mut self) -> usize {
        let mut released = match self.gpu.take() {
            Some(gpu) => gpu.destroy(),
            None => 0,
        };
        released += self
            .children
            .iter_mut()
            .map(|child| child.release_gpu())
            .sum::<usize>();
        released
    }

    fn collect_draws<'a>(&'a self, draws: &mut Vec<DrawCall<'a>>) {
        if !self.visible {
            return;
        }
        if let Some(gpu) = self.gpu.as_ref() {
            for mesh in &gpu.meshes {
                let material = &self.model.materials[mesh.material];
                draws.push(DrawCall {
                    mesh,
                    material: &gpu.materials[mesh.material],
                    instance_buffer: &gpu.instance_buffer,
                    wireframe: material.wireframe,
                });
            }
        }
        for child in &self.children {
            child.collect_draws(draws);
        }
    }
}

/// The in-memory representation of one loaded asset, plus orphans awaiting
/// reclamation.
///
/// Exactly one graph is attached to the viewport at a time; the previous one
/// must be released before its successor attaches.
pub struct SceneGraph {
    root: ContainerNode,
    orphans: Vec<Box<dyn SceneNode>>,
    label: String,
    placeholder: bool,
}

impl SceneGraph {
    /// Wraps a loaded asset subtree in the user and framing container levels.
    pub fn new(asset_root: Box<dyn SceneNode>, label: impl Into<String>, placeholder: bool) -> Self {
        let mut frame = ContainerNode::new();
        frame.add_child(asset_root);
        let mut root = ContainerNode::new();
        root.add_child(Box::new(frame));
        Self {
            root,
            orphans: Vec::new(),
            label: label.into(),
            placeholder,
        }
    }

    /// The reference this graph was loaded from, for diagnostics.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether this graph is the built-in fallback asset.
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    fn frame_mut(&mut self) -> &mut Box<dyn SceneNode> {
        &mut self.root.children[0]
    }

    fn frame(&self) -> &Box<dyn SceneNode> {
        &self.root.children[0]
    }

    /// Bounding box of the whole graph, framing and user transform included.
    pub fn aabb(&self) -> Aabb {
        let mut aabb = Aabb::empty();
        self.root.extend_aabb(&Instance::default(), &mut aabb);
        aabb
    }

    /// Centers the asset at the origin and scales its largest dimension to
    /// two units. Zero-sized content is left untouched.
    pub fn normalize_framing(&mut self) {
        let mut raw = Aabb::empty();
        for child in self.frame().children() {
            child.extend_aabb(&Instance::default(), &mut raw);
        }
        let size = raw.max_dimension();
        if size <= 0.0 {
            return;
        }
        let scale = 2.0 / size;
        let center = raw.center();
        let mut framing = Instance::default();
        framing.scale = Vector3::new(scale, scale, scale);
        framing.position = -center * scale;
        self.frame_mut().set_local_transform(framing);
        self.root.update_world_transforms(&Instance::default());
    }

    /// Writes the user-level transform absolutely. Never composes with the
    /// previously applied value, so re-application cannot compound.
    pub fn set_user_transform(&mut self, instance: Instance) {
        self.root.set_local_transform(instance);
        self.root.update_world_transforms(&Instance::default());
    }

    pub fn user_transform(&self) -> Instance {
        self.root.local_transform()
    }

    pub fn for_each_material(&mut self, mut apply: impl FnMut(&mut Material)) {
        self.root.for_each_material(&mut apply);
    }

    pub fn write_to_buffers(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        material_layout: &wgpu::BindGroupLayout,
    ) {
        self.root.write_to_buffers(device, queue, material_layout);
    }

    pub fn collect_draws(&self) -> Vec<DrawCall<'_>> {
        let mut draws = Vec::new();
        self.root.collect_draws(&mut draws);
        draws
    }

    /// Detaches a node from the graph but keeps it around for a possible
    /// re-attach. Orphans that stay invisible are reclaimed on the next sweep.
    pub fn orphan(&mut self, node: Box<dyn SceneNode>) {
        self.orphans.push(node);
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// Releases GPU resources of invisible orphans. Attached nodes are never
    /// touched here, hidden or not.
    pub fn sweep_orphans(&mut self) -> usize {
        self.orphans
            .iter_mut()
            .filter(|node| !node.visible())
            .map(|node| node.release_gpu())
            .sum()
    }

    /// Releases every GPU resource in the graph, orphans included.
    pub fn release_gpu(&mut self) -> usize {
        let mut released = self.root.release_gpu();
        released += self
            .orphans
            .iter_mut()
            .map(|node| node.release_gpu())
            .sum::<usize>();
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::model::{Material, MeshData, Model, ModelVertex};

    fn vertex(position: [f32; 3]) -> ModelVertex {
        ModelVertex {
            position,
            tex_coords: [0.0, 0.0],
            normal: [0.0, 1.0, 0.0],
        }
    }

    fn box_node(min: [f32; 3], max: [f32; 3]) -> Box<dyn SceneNode> {
        let vertices = vec![
            vertex(min),
            vertex([max[0], min[1], min[2]]),
            vertex([min[0], max[1], min[2]]),
            vertex(max),
        ];
        let model = Model {
            meshes: vec![MeshData {
                name: "box".to_string(),
                vertices,
                indices: vec![0, 1, 2, 1, 3, 2],
                material: 0,
            }],
            materials: vec![Material::neutral("box")],
        };
        Box::new(MeshNode::from_model(model))
    }

    #[test]
    fn normalization_produces_canonical_framing() {
        let mut graph = SceneGraph::new(box_node([2.0, 2.0, 2.0], [10.0, 6.0, 4.0]), "test", false);
        graph.normalize_framing();
        let aabb = graph.aabb();
        assert!((aabb.max_dimension() - 2.0).abs() < 1e-5);
        let center = aabb.center();
        assert!(center.x.abs() < 1e-5);
        assert!(center.y.abs() < 1e-5);
        assert!(center.z.abs() < 1e-5);
    }

    #[test]
    fn normalization_skips_degenerate_content() {
        let mut graph = SceneGraph::new(box_node([1.0, 1.0, 1.0], [1.0, 1.0, 1.0]), "point", false);
        graph.normalize_framing();
        // A single point cannot be scaled into frame; the transform stays
        // identity instead of dividing by zero.
        let frame = graph.frame().local_transform();
        assert!((frame.scale.x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn user_transform_is_absolute() {
        let mut graph = SceneGraph::new(box_node([0.0; 3], [1.0; 3]), "test", false);
        graph.normalize_framing();
        let mut t = Instance::default();
        t.scale = Vector3::new(3.0, 3.0, 3.0);
        graph.set_user_transform(t.clone());
        let first = graph.aabb();
        graph.set_user_transform(t);
        let second = graph.aabb();
        assert!((first.max_dimension() - second.max_dimension()).abs() < 1e-5);
        assert!((first.max_dimension() - 6.0).abs() < 1e-4);
    }

    #[test]
    fn sweep_releases_only_invisible_orphans() {
        let mut graph = SceneGraph::new(box_node([0.0; 3], [1.0; 3]), "test", false);
        let mut hidden = box_node([0.0; 3], [1.0; 3]);
        hidden.set_visible(false);
        graph.orphan(hidden);
        graph.orphan(box_node([0.0; 3], [1.0; 3]));
        // No GPU resources were ever created, so nothing is released, but the
        // sweep must not touch the visible orphan or the attached tree.
        assert_eq!(graph.sweep_orphans(), 0);
        assert_eq!(graph.orphan_count(), 2);
    }

    #[test]
    fn draws_skip_hidden_subtrees() {
        let graph = {
            let mut node = box_node([0.0; 3], [1.0; 3]);
            node.set_visible(false);
            SceneGraph::new(node, "hidden", false)
        };
        assert!(graph.collect_draws().is_empty());
    }
}
