//! Viewer session and application event loop.
//!
//! This module wires the resolution, loading, transform, recovery and
//! reclamation pieces into one display pipeline. Asset fetches run off the
//! loop and re-enter it as user events; every scene-graph mutation happens on
//! the loop's turn so a frame never observes a half-switched scene.
//!
//! # Lifecycle
//!
//! 1. `run()` builds the winit event loop and the [`App`]
//! 2. a requested [`AssetReference`] bumps the session's request token and a
//!    fetch task is spawned; a stale token on completion discards the result
//! 3. the fetched payload is parsed and normalized on the loop turn, the
//!    previous scene is retired and synchronously reclaimed, the new one
//!    attaches, and the current [`ViewTransform`] is re-applied
//! 4. any resolution or parse failure installs the placeholder asset and
//!    raises a dismissible notice instead of leaving the viewport empty
//! 5. surface loss feeds the recovery state machine; an exhausted retry
//!    budget raises a persistent reload-required notice

use std::iter;
use std::sync::Arc;

use instant::Instant;
use winit::{
    application::ApplicationHandler,
    event::{DeviceEvent, DeviceId, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy},
    window::Window,
};

use crate::{
    cache::Blob,
    context::Context,
    data_structures::scene_graph::SceneGraph,
    reclaim::Reclaimer,
    recovery::{ContextLossExhausted, SurfaceEvent, SurfaceRecovery, SurfaceState},
    resolve::{AssetReference, Resolver, ResolverConfig, UnresolvedAssetError},
    resources,
    transform::{self, ViewTransform},
};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeSeverity {
    Warning,
    Fatal,
}

/// A user-facing message next to the viewport.
///
/// Warnings are dismissible and the viewer stays interactive (the placeholder
/// asset is shown). Fatal notices persist and require a full reload.
#[derive(Clone, Debug)]
pub struct ViewerNotice {
    pub message: String,
    pub severity: NoticeSeverity,
    pub dismissible: bool,
}

/// Everything one viewing surface displays: the active scene, scenes awaiting
/// reclamation, the user transform and notice state.
///
/// The session is deliberately independent of the window and GPU plumbing so
/// the whole fetch/install/fallback flow runs headless in tests.
pub struct ViewerSession {
    resolver: Resolver,
    current_token: u64,
    active: Option<SceneGraph>,
    retired: Vec<SceneGraph>,
    reclaimer: Reclaimer,
    transform: ViewTransform,
    notice: Option<ViewerNotice>,
}

impl ViewerSession {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            resolver,
            current_token: 0,
            active: None,
            retired: Vec::new(),
            reclaimer: Reclaimer::default(),
            transform: ViewTransform::default(),
            notice: None,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Starts a new request generation. Results carrying an older token are
    /// dropped when they arrive.
    pub fn begin_request(&mut self) -> u64 {
        self.current_token += 1;
        self.current_token
    }

    pub fn current_token(&self) -> u64 {
        self.current_token
    }

    /// Installs a fetch result, or the placeholder on failure.
    ///
    /// Returns `false` when the result was stale and discarded. Runs on the
    /// loop turn; the in-flight fetch itself is never cancelled.
    pub fn install_fetched(
        &mut self,
        token: u64,
        origin: &str,
        result: Result<Blob, UnresolvedAssetError>,
    ) -> bool {
        if token != self.current_token {
            log::debug!(
                "dropping stale resolution for {} (token {} < {})",
                origin,
                token,
                self.current_token
            );
            return false;
        }
        let graph = match result {
            Ok(blob) => match resources::load_scene(&blob, origin) {
                Ok(graph) => {
                    self.notice = None;
                    graph
                }
                Err(err) => {
                    log::error!("failed to parse asset {}: {}", origin, err);
                    self.raise_warning(format!("Could not display this asset ({err})"));
                    resources::placeholder_scene()
                }
            },
            Err(err) => {
                for attempt in &err.attempts {
                    log::warn!(
                        "fetch strategy {} failed for {}: {}",
                        attempt.strategy,
                        origin,
                        attempt.outcome
                    );
                }
                self.raise_warning("Could not download this asset".to_string());
                resources::placeholder_scene()
            }
        };
        self.switch_to(graph);
        true
    }

    /// Replaces the active scene. The previous graph is retired and reclaimed
    /// before the new one attaches.
    fn switch_to(&mut self, mut graph: SceneGraph) {
        transform::apply(&mut graph, &self.transform);
        if let Some(previous) = self.active.take() {
            self.retired.push(previous);
        }
        let released = self
            .reclaimer
            .sweep(Instant::now(), None, &mut self.retired);
        if released > 0 {
            log::debug!("released {} resource bundles on asset switch", released);
        }
        self.active = Some(graph);
    }

    /// Stores and applies the user transform. Absolute semantics make this
    /// safe to call on every slider tick.
    pub fn set_transform(&mut self, transform: ViewTransform) {
        self.transform = transform;
        if let Some(scene) = self.active.as_mut() {
            transform::apply(scene, &self.transform);
        }
    }

    pub fn transform(&self) -> &ViewTransform {
        &self.transform
    }

    /// Periodic housekeeping on the render loop's turn.
    pub fn on_frame(&mut self, now: Instant) {
        if self.reclaimer.due(now) {
            let released = self
                .reclaimer
                .sweep(now, self.active.as_mut(), &mut self.retired);
            if released > 0 {
                log::debug!("periodic sweep released {} resource bundles", released);
            }
        }
    }

    /// Marks the viewing session unrecoverable after context-loss exhaustion.
    pub fn raise_context_lost(&mut self, err: &ContextLossExhausted) {
        self.notice = Some(ViewerNotice {
            message: format!("{err}"),
            severity: NoticeSeverity::Fatal,
            dismissible: false,
        });
    }

    fn raise_warning(&mut self, message: String) {
        self.notice = Some(ViewerNotice {
            message,
            severity: NoticeSeverity::Warning,
            dismissible: true,
        });
    }

    /// Clears a dismissible notice; fatal ones stay.
    pub fn dismiss_notice(&mut self) {
        if self.notice.as_ref().is_some_and(|n| n.dismissible) {
            self.notice = None;
        }
    }

    pub fn notice(&self) -> Option<&ViewerNotice> {
        self.notice.as_ref()
    }

    pub fn active_scene(&self) -> Option<&SceneGraph> {
        self.active.as_ref()
    }

    pub fn active_scene_mut(&mut self) -> Option<&mut SceneGraph> {
        self.active.as_mut()
    }

    pub fn showing_placeholder(&self) -> bool {
        self.active.as_ref().is_some_and(|scene| scene.is_placeholder())
    }
}

/// Events delivered back into the winit loop.
pub enum ViewerEvent {
    #[allow(dead_code)]
    Initialized { ctx: Context },
    AssetFetched {
        token: u64,
        reference: String,
        result: Result<Blob, UnresolvedAssetError>,
    },
}

impl std::fmt::Debug for ViewerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized { .. } => f.write_str("Initialized"),
            Self::AssetFetched { token, reference, result } => f
                .debug_struct("AssetFetched")
                .field("token", token)
                .field("reference", reference)
                .field("ok", &result.is_ok())
                .finish(),
        }
    }
}

/// Application state bundle: GPU context and surface status.
struct AppState {
    ctx: Context,
    is_surface_configured: bool,
}

impl AppState {
    fn render(&mut self, session: &mut ViewerSession) -> Result<(), wgpu::SurfaceError> {
        let output = self.ctx.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        // Buffer creation and refresh happen here, on the loop turn, never
        // from a fetch callback.
        if let Some(scene) = session.active_scene_mut() {
            scene.write_to_buffers(&self.ctx.device, &self.ctx.queue, &self.ctx.material_layout);
        }

        let mut encoder: wgpu::CommandEncoder =
            self.ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Render Encoder"),
                });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.ctx.clear_colour),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.ctx.depth_texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
                multiview_mask: None,
            });

            if let Some(scene) = session.active_scene() {
                render_pass.set_bind_group(1, &self.ctx.camera.bind_group, &[]);
                for draw in scene.collect_draws() {
                    let pipeline = if draw.wireframe {
                        self.ctx
                            .pipelines
                            .wireframe
                            .as_ref()
                            .unwrap_or(&self.ctx.pipelines.fill)
                    } else {
                        &self.ctx.pipelines.fill
                    };
                    render_pass.set_pipeline(pipeline);
                    render_pass.set_bind_group(0, &draw.material.bind_group, &[]);
                    render_pass.set_vertex_buffer(0, draw.mesh.vertex_buffer.slice(..));
                    render_pass.set_vertex_buffer(1, draw.instance_buffer.slice(..));
                    render_pass
                        .set_index_buffer(draw.mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    render_pass.draw_indexed(0..draw.mesh.num_elements, 0, 0..1);
                }
            }
        }

        self.ctx.queue.submit(iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

pub struct App {
    #[cfg(not(target_arch = "wasm32"))]
    async_runtime: tokio::runtime::Runtime,
    proxy: EventLoopProxy<ViewerEvent>,
    state: Option<AppState>,
    session: ViewerSession,
    recovery: SurfaceRecovery,
    initial_reference: Option<AssetReference>,
    last_time: Instant,
    mouse_pressed: bool,
}

impl App {
    fn new(
        event_loop: &EventLoop<ViewerEvent>,
        config: ResolverConfig,
        initial_reference: Option<AssetReference>,
    ) -> Self {
        let proxy = event_loop.create_proxy();
        #[cfg(not(target_arch = "wasm32"))]
        let async_runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
        Self {
            #[cfg(not(target_arch = "wasm32"))]
            async_runtime,
            proxy,
            state: None,
            session: ViewerSession::new(Resolver::new(config)),
            recovery: SurfaceRecovery::new(),
            initial_reference,
            last_time: Instant::now(),
            mouse_pressed: false,
        }
    }

    /// Spawns the resolution off the loop; the result re-enters through the
    /// event proxy and is installed on the loop turn.
    pub fn request_asset(&mut self, reference: AssetReference) {
        let token = self.session.begin_request();
        let resolver = self.session.resolver().clone();
        let proxy = self.proxy.clone();
        let fut = async move {
            let result = resolver.resolve(&reference).await;
            // The loop may already be gone on shutdown; nothing to do then.
            let _ = proxy.send_event(ViewerEvent::AssetFetched {
                token,
                reference: reference.to_string(),
                result,
            });
        };
        #[cfg(not(target_arch = "wasm32"))]
        {
            self.async_runtime.spawn(fut);
        }
        #[cfg(target_arch = "wasm32")]
        {
            wasm_bindgen_futures::spawn_local(fut);
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        if let Some(state) = self.state.as_mut() {
            if width > 0 && height > 0 {
                state.ctx.resize(width, height, self.recovery.resolution_scale());
                state.is_surface_configured = true;
                self.recovery.on_surface_configured();
            }
        }
    }

    fn redraw(&mut self) {
        let now = Instant::now();
        let dt = self.last_time.elapsed();
        self.last_time = Instant::now();

        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.ctx.window.request_redraw();
        if !state.is_surface_configured {
            return;
        }

        if self.recovery.is_abandoned() {
            // Terminal; the persistent notice was raised when the budget ran
            // out and no further automatic retry happens.
            return;
        }

        match self.recovery.state() {
            SurfaceState::Lost => {
                if !self.recovery.retry_due(now) {
                    return;
                }
                self.recovery.begin_restore();
                let size = state.ctx.window.inner_size();
                state
                    .ctx
                    .resize(size.width, size.height, self.recovery.resolution_scale());
                match state.ctx.surface.get_current_texture() {
                    Ok(frame) => {
                        drop(frame);
                        self.recovery.handle(SurfaceEvent::RestoreSucceeded, now);
                        self.session.dismiss_notice();
                    }
                    Err(err) => {
                        log::warn!("restoration attempt failed: {}", err);
                        self.recovery.handle(SurfaceEvent::RestoreFailed, now);
                        if let Some(err) = self.recovery.error() {
                            self.session.raise_context_lost(err);
                        }
                    }
                }
                return;
            }
            SurfaceState::Restoring => return,
            _ => {}
        }

        self.session.on_frame(now);

        // Update the camera
        state
            .ctx
            .camera
            .controller
            .update(&mut state.ctx.camera.camera, dt);
        state
            .ctx
            .camera
            .uniform
            .update_view_proj(&state.ctx.camera.camera, &state.ctx.projection);
        state.ctx.queue.write_buffer(
            &state.ctx.camera.buffer,
            0,
            bytemuck::cast_slice(&[state.ctx.camera.uniform]),
        );

        match state.render(&mut self.session) {
            Ok(_) => {}
            // Loss arrives asynchronously and carries no reason; only the
            // event itself is observable.
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.recovery.handle(SurfaceEvent::Lost, now);
            }
            Err(e) => {
                log::error!("Unable to render {}", e);
            }
        }
    }
}

impl ApplicationHandler<ViewerEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        #[allow(unused_mut)]
        let mut window_attributes = Window::default_attributes();

        #[cfg(target_arch = "wasm32")]
        {
            use wasm_bindgen::JsCast;
            use winit::platform::web::WindowAttributesExtWebSys;

            const CANVAS_ID: &str = "canvas";

            let window = wgpu::web_sys::window().unwrap_throw();
            let document = window.document().unwrap_throw();
            let canvas = document.get_element_by_id(CANVAS_ID).unwrap_throw();
            let html_canvas_element = canvas.unchecked_into();
            window_attributes = window_attributes.with_canvas(Some(html_canvas_element));
        }

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .expect("Failed to create window"),
        );

        #[cfg(not(target_arch = "wasm32"))]
        {
            let ctx = match self.async_runtime.block_on(Context::new(window)) {
                Ok(ctx) => ctx,
                Err(e) => panic!(
                    "App initialization failed. Cannot create the main context: {}",
                    e
                ),
            };
            self.state = Some(AppState {
                ctx,
                is_surface_configured: false,
            });
            if let Some(reference) = self.initial_reference.take() {
                self.request_asset(reference);
            }
        }

        #[cfg(target_arch = "wasm32")]
        {
            let proxy = self.proxy.clone();
            wasm_bindgen_futures::spawn_local(async move {
                let ctx = Context::new(window)
                    .await
                    .expect("Cannot create the main context");
                assert!(proxy.send_event(ViewerEvent::Initialized { ctx }).is_ok());
            });
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: ViewerEvent) {
        match event {
            ViewerEvent::Initialized { ctx } => {
                // This is the message from our wasm `spawn_local`
                let size = ctx.window.inner_size();
                self.state = Some(AppState {
                    ctx,
                    is_surface_configured: false,
                });
                self.resize(size.width, size.height);
                if let Some(reference) = self.initial_reference.take() {
                    self.request_asset(reference);
                }
                if let Some(state) = self.state.as_ref() {
                    state.ctx.window.request_redraw();
                }
            }
            ViewerEvent::AssetFetched {
                token,
                reference,
                result,
            } => {
                self.session.install_fetched(token, &reference, result);
            }
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: DeviceId,
        event: DeviceEvent,
    ) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            if self.mouse_pressed {
                state.ctx.camera.controller.handle_mouse(dx, dy);
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        if let Some(state) = self.state.as_mut() {
            state.ctx.camera.controller.handle_window_events(&event);
        }

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => self.resize(size.width, size.height),
            WindowEvent::RedrawRequested => self.redraw(),
            WindowEvent::MouseInput { state: button_state, button, .. } => {
                if button == MouseButton::Left {
                    self.mouse_pressed = button_state.is_pressed();
                }
            }
            _ => {}
        }
    }
}

/// Runs the viewer until its window closes.
///
/// `config` carries the proxy endpoint, provider hosts and optional bearer
/// token; `initial_reference` is shown once the surface is up.
pub fn run(config: ResolverConfig, initial_reference: Option<AssetReference>) -> anyhow::Result<()> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        console_log::init_with_level(log::Level::Info).unwrap_throw();
    }

    let event_loop: EventLoop<ViewerEvent> = EventLoop::with_user_event().build()?;
    let mut app = App::new(&event_loop, config, initial_reference);
    event_loop.run_app(&mut app)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::LoadAttempt;

    fn session() -> ViewerSession {
        let config = ResolverConfig::new("https://app.example.com/proxy");
        ViewerSession::new(Resolver::new(config))
    }

    fn obj_blob() -> Blob {
        Blob::new(b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n".to_vec(), "model/obj")
    }

    fn unresolved(reference: &str) -> UnresolvedAssetError {
        UnresolvedAssetError {
            reference: reference.to_string(),
            attempts: vec![
                LoadAttempt {
                    strategy: "direct",
                    outcome: "upstream returned status 404".to_string(),
                },
                LoadAttempt {
                    strategy: "proxy",
                    outcome: "proxy rejected fetch with status 502: bad gateway".to_string(),
                },
            ],
        }
    }

    #[test]
    fn successful_fetch_installs_the_asset() {
        let mut session = session();
        let token = session.begin_request();
        assert!(session.install_fetched(token, "https://cdn/x.obj", Ok(obj_blob())));
        assert!(!session.showing_placeholder());
        assert!(session.notice().is_none());
    }

    #[test]
    fn failed_resolution_falls_back_to_placeholder_with_banner() {
        let mut session = session();
        let token = session.begin_request();
        session.install_fetched(token, "https://down.example/x.glb", Err(unresolved("x")));
        assert!(session.showing_placeholder());
        let notice = session.notice().expect("banner raised");
        assert_eq!(notice.severity, NoticeSeverity::Warning);
        assert!(notice.dismissible);
        session.dismiss_notice();
        assert!(session.notice().is_none());
    }

    #[test]
    fn malformed_payload_falls_back_to_placeholder() {
        let mut session = session();
        let token = session.begin_request();
        let garbage = Blob::new(vec![1, 2, 3], "model/gltf-binary");
        session.install_fetched(token, "https://cdn/x.glb", Ok(garbage));
        assert!(session.showing_placeholder());
        assert!(session.notice().is_some());
    }

    #[test]
    fn stale_results_are_discarded() {
        let mut session = session();
        let stale = session.begin_request();
        let current = session.begin_request();
        assert!(!session.install_fetched(stale, "https://cdn/old.obj", Ok(obj_blob())));
        assert!(session.active_scene().is_none());
        assert!(session.install_fetched(current, "https://cdn/new.obj", Ok(obj_blob())));
        assert_eq!(session.active_scene().unwrap().label(), "https://cdn/new.obj");
    }

    #[test]
    fn switching_retires_the_previous_scene_synchronously() {
        let mut session = session();
        let token = session.begin_request();
        session.install_fetched(token, "first.obj", Ok(obj_blob()));
        let token = session.begin_request();
        session.install_fetched(token, "second.obj", Ok(obj_blob()));
        // The retired list drains on the switch itself, not on the interval.
        assert!(session.retired.is_empty());
        assert_eq!(session.active_scene().unwrap().label(), "second.obj");
    }

    #[test]
    fn transform_survives_asset_switches() {
        let mut session = session();
        let mut t = ViewTransform::default();
        t.scale = 2.0;
        t.wireframe = true;
        session.set_transform(t);
        let token = session.begin_request();
        session.install_fetched(token, "x.obj", Ok(obj_blob()));
        let scene = session.active_scene().unwrap();
        assert!((scene.aabb().max_dimension() - 4.0).abs() < 1e-4);
    }

    #[test]
    fn context_loss_exhaustion_is_fatal_and_sticky() {
        let mut session = session();
        session.raise_context_lost(&ContextLossExhausted { attempts: 3 });
        let notice = session.notice().unwrap();
        assert_eq!(notice.severity, NoticeSeverity::Fatal);
        assert!(!notice.dismissible);
        session.dismiss_notice();
        assert!(session.notice().is_some());
    }

    #[test]
    fn keeping_the_same_token_allows_reinstall() {
        let mut session = session();
        let token = session.begin_request();
        assert!(session.install_fetched(token, "x.obj", Ok(obj_blob())));
        // A retry of the same generation (e.g. after a reload action) with the
        // same token still wins.
        assert!(session.install_fetched(token, "x.obj", Ok(obj_blob())));
    }
}
