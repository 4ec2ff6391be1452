//! Viewer camera: orbit controller, projection and GPU uniform.
//!
//! Loaded assets are normalized into a ~2-unit frame at the origin, so the
//! camera orbits the origin at an adjustable distance. Dragging rotates,
//! scrolling zooms.

use instant::Duration;
use winit::event::{MouseScrollDelta, WindowEvent};

/// Position and orientation of the eye, described as an orbit around the
/// origin.
#[derive(Debug)]
pub struct Camera {
    pub distance: f32,
    pub yaw: cgmath::Rad<f32>,
    pub pitch: cgmath::Rad<f32>,
}

impl Camera {
    pub fn new<Y: Into<cgmath::Rad<f32>>, P: Into<cgmath::Rad<f32>>>(
        distance: f32,
        yaw: Y,
        pitch: P,
    ) -> Self {
        Self {
            distance,
            yaw: yaw.into(),
            pitch: pitch.into(),
        }
    }

    pub fn position(&self) -> cgmath::Point3<f32> {
        let (sin_pitch, cos_pitch) = self.pitch.0.sin_cos();
        let (sin_yaw, cos_yaw) = self.yaw.0.sin_cos();
        cgmath::Point3::new(
            self.distance * cos_pitch * cos_yaw,
            self.distance * sin_pitch,
            self.distance * cos_pitch * sin_yaw,
        )
    }

    pub fn calc_matrix(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::look_at_rh(
            self.position(),
            cgmath::Point3::new(0.0, 0.0, 0.0),
            cgmath::Vector3::unit_y(),
        )
    }
}

#[derive(Debug)]
pub struct Projection {
    aspect: f32,
    fovy: cgmath::Rad<f32>,
    znear: f32,
    zfar: f32,
}

impl Projection {
    pub fn new<F: Into<cgmath::Rad<f32>>>(width: u32, height: u32, fovy: F, znear: f32, zfar: f32) -> Self {
        Self {
            aspect: width as f32 / height.max(1) as f32,
            fovy: fovy.into(),
            znear,
            zfar,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height.max(1) as f32;
    }

    pub fn calc_matrix(&self) -> cgmath::Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * cgmath::perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }
}

// wgpu clip space is 0..1 in z while cgmath produces -1..1.
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: cgmath::Matrix4<f32> = cgmath::Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    view_position: [f32; 4],
    view_proj: [[f32; 4]; 4],
}

impl CameraUniform {
    pub fn new() -> Self {
        use cgmath::SquareMatrix;
        Self {
            view_position: [0.0; 4],
            view_proj: cgmath::Matrix4::identity().into(),
        }
    }

    pub fn update_view_proj(&mut self, camera: &Camera, projection: &Projection) {
        let position = camera.position();
        self.view_position = [position.x, position.y, position.z, 1.0];
        self.view_proj = (projection.calc_matrix() * camera.calc_matrix()).into();
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

/// Mouse-driven orbit control.
pub struct CameraController {
    sensitivity: f32,
    zoom_speed: f32,
    pending_yaw: f32,
    pending_pitch: f32,
    pending_zoom: f32,
}

impl CameraController {
    pub fn new(sensitivity: f32, zoom_speed: f32) -> Self {
        Self {
            sensitivity,
            zoom_speed,
            pending_yaw: 0.0,
            pending_pitch: 0.0,
            pending_zoom: 0.0,
        }
    }

    /// Accumulates a drag delta; applied on the next `update`.
    pub fn handle_mouse(&mut self, dx: f64, dy: f64) {
        self.pending_yaw += dx as f32;
        self.pending_pitch += dy as f32;
    }

    pub fn handle_window_events(&mut self, event: &WindowEvent) {
        if let WindowEvent::MouseWheel { delta, .. } = event {
            self.pending_zoom -= match delta {
                MouseScrollDelta::LineDelta(_, scroll) => *scroll,
                MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 50.0,
            };
        }
    }

    pub fn update(&mut self, camera: &mut Camera, dt: Duration) {
        let dt = dt.as_secs_f32();
        camera.yaw += cgmath::Rad(self.pending_yaw * self.sensitivity * dt);
        camera.pitch += cgmath::Rad(self.pending_pitch * self.sensitivity * dt);
        self.pending_yaw = 0.0;
        self.pending_pitch = 0.0;

        // Keep the eye off the poles so look_at stays well defined.
        let limit = std::f32::consts::FRAC_PI_2 - 0.01;
        camera.pitch = cgmath::Rad(camera.pitch.0.clamp(-limit, limit));

        camera.distance = (camera.distance + self.pending_zoom * self.zoom_speed * dt)
            .clamp(0.5, 50.0);
        self.pending_zoom = 0.0;
    }
}

/// Camera state plus its GPU resources, bundled the way the render loop
/// consumes them.
#[derive(Debug)]
pub struct CameraResources {
    pub camera: Camera,
    pub controller: CameraController,
    pub uniform: CameraUniform,
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl std::fmt::Debug for CameraController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CameraController")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Deg;

    #[test]
    fn orbit_position_respects_distance() {
        let camera = Camera::new(4.0, Deg(0.0), Deg(0.0));
        let p = camera.position();
        assert!((p.x - 4.0).abs() < 1e-5);
        assert!(p.y.abs() < 1e-5);
    }

    #[test]
    fn pitch_is_clamped_away_from_the_poles() {
        let mut camera = Camera::new(4.0, Deg(0.0), Deg(0.0));
        let mut controller = CameraController::new(1.0, 1.0);
        controller.handle_mouse(0.0, 10_000.0);
        controller.update(&mut camera, Duration::from_secs(1));
        assert!(camera.pitch.0 < std::f32::consts::FRAC_PI_2);
    }
}
