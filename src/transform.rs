//! User-controlled, non-destructive view transform.
//!
//! A [`ViewTransform`] is a pure value: applying it writes the scene's
//! user-level transform and material overrides absolutely, so the same value
//! can be re-applied after every edit or re-render without compounding
//! rotation or scale, and without re-loading the asset.

use cgmath::{Deg, Euler, Quaternion, Vector3};

use crate::data_structures::instance::Instance;
use crate::data_structures::scene_graph::SceneGraph;

/// Uniform scale, per-axis rotation in degrees, optional tint and wireframe
/// toggle.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewTransform {
    pub scale: f32,
    pub rotation_x: f32,
    pub rotation_y: f32,
    pub rotation_z: f32,
    pub tint: Option<[f32; 3]>,
    pub wireframe: bool,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            rotation_x: 0.0,
            rotation_y: 0.0,
            rotation_z: 0.0,
            tint: None,
            wireframe: false,
        }
    }
}

impl ViewTransform {
    /// Clamps the value into its documented domain: positive scale, rotations
    /// wrapped into `[0, 360)`.
    pub fn sanitized(&self) -> Self {
        let wrap = |deg: f32| deg.rem_euclid(360.0);
        Self {
            scale: if self.scale > 0.0 { self.scale } else { 1.0 },
            rotation_x: wrap(self.rotation_x),
            rotation_y: wrap(self.rotation_y),
            rotation_z: wrap(self.rotation_z),
            tint: self.tint,
            wireframe: self.wireframe,
        }
    }

    fn rotation(&self) -> Quaternion<f32> {
        Quaternion::from(Euler::new(
            Deg(self.rotation_x),
            Deg(self.rotation_y),
            Deg(self.rotation_z),
        ))
    }

    fn instance(&self) -> Instance {
        let mut instance = Instance::default();
        instance.rotation = self.rotation();
        instance.scale = Vector3::new(self.scale, self.scale, self.scale);
        instance
    }
}

/// Applies `transform` onto a loaded scene graph.
///
/// Rotation and scale are absolute each time; tint and wireframe reach only
/// materials that support them (physically based variants), other materials
/// are left untouched rather than erroring.
pub fn apply(scene: &mut SceneGraph, transform: &ViewTransform) {
    let transform = transform.sanitized();
    scene.set_user_transform(transform.instance());
    scene.for_each_material(|material| {
        if material.supports_tint() {
            material.tint = transform.tint;
            material.wireframe = transform.wireframe;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::placeholder_scene;
    use cgmath::InnerSpace;

    fn transform() -> ViewTransform {
        ViewTransform {
            scale: 2.5,
            rotation_x: 30.0,
            rotation_y: 120.0,
            rotation_z: 315.0,
            tint: Some([0.9, 0.3, 0.3]),
            wireframe: true,
        }
    }

    #[test]
    fn reapplication_is_idempotent() {
        let mut scene = placeholder_scene();
        apply(&mut scene, &transform());
        let once = scene.user_transform();
        let aabb_once = scene.aabb();

        apply(&mut scene, &transform());
        let twice = scene.user_transform();
        let aabb_twice = scene.aabb();

        assert!((once.scale - twice.scale).magnitude() < 1e-6);
        assert!((once.rotation - twice.rotation).magnitude() < 1e-6);
        assert!((aabb_once.max_dimension() - aabb_twice.max_dimension()).abs() < 1e-5);
    }

    #[test]
    fn scale_reaches_the_scene_bounds() {
        let mut scene = placeholder_scene();
        let mut t = ViewTransform::default();
        t.scale = 3.0;
        apply(&mut scene, &t);
        // Placeholder cube is normalized to 2 units before the user scale.
        let aabb = scene.aabb();
        assert!((aabb.max_dimension() - 6.0).abs() < 1e-4);
    }

    #[test]
    fn tint_and_wireframe_reach_pbr_materials_only() {
        let mut scene = placeholder_scene();
        scene.for_each_material(|m| m.unlit = true);
        apply(&mut scene, &transform());
        let mut tints = Vec::new();
        scene.for_each_material(|m| tints.push((m.tint, m.wireframe)));
        assert!(tints.iter().all(|(tint, wireframe)| tint.is_none() && !wireframe));

        let mut scene = placeholder_scene();
        apply(&mut scene, &transform());
        let mut tints = Vec::new();
        scene.for_each_material(|m| tints.push((m.tint, m.wireframe)));
        assert!(tints.iter().all(|(tint, wireframe)| tint.is_some() && *wireframe));
    }

    #[test]
    fn sanitize_wraps_rotations_and_rejects_nonpositive_scale() {
        let t = ViewTransform {
            scale: -1.0,
            rotation_x: 540.0,
            rotation_y: -90.0,
            rotation_z: 360.0,
            tint: None,
            wireframe: false,
        };
        let s = t.sanitized();
        assert_eq!(s.scale, 1.0);
        assert_eq!(s.rotation_x, 180.0);
        assert_eq!(s.rotation_y, 270.0);
        assert_eq!(s.rotation_z, 0.0);
    }
}
