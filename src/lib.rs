//! modelview
//!
//! A lightweight, cross-platform viewer runtime for remotely generated 3D
//! assets, focused on native and WASM compatibility. The crate takes an
//! opaque asset reference and reliably gets it onto the screen: fetching with
//! cross-origin and credential fallbacks, caching, canonical framing, safe
//! display through a loss-prone graphics surface, and bounded GPU memory
//! under repeated asset switching.
//!
//! High-level modules
//! - `cache`: content-addressed store for fetched asset bytes
//! - `camera`: orbit camera, controller and uniforms for view/projection
//! - `context`: central GPU and window context that owns device/queue/pipelines
//! - `data_structures`: scene data models (meshes, materials, scene graphs)
//! - `pipelines`: fill and wireframe render pipelines
//! - `reclaim`: periodic release of GPU resources that left the visible scene
//! - `recovery`: context-loss state machine with bounded backoff retries
//! - `resolve`: fetch strategy chains (local, direct, transfer proxy)
//! - `resources`: parsing fetched bytes into normalized scene graphs
//! - `transform`: the user-controlled, idempotently re-applicable transform
//! - `viewer`: session orchestration and the application event loop
//!

pub mod cache;
pub mod camera;
pub mod context;
pub mod data_structures;
pub mod pipelines;
pub mod reclaim;
pub mod recovery;
pub mod resolve;
pub mod resources;
pub mod transform;
pub mod viewer;

// Re-exports commonly used types for convenience in downstream code.
pub use cache::Blob;
pub use cgmath::*;
pub use resolve::{AssetReference, Resolver, ResolverConfig};
pub use transform::ViewTransform;
pub use viewer::run;
pub use wgpu::*;
pub use winit::event::DeviceEvent;
pub use winit::event::WindowEvent;
