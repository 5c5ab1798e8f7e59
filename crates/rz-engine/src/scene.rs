//! Engine errors and the built-in demo scene

use rz_core::prelude::*;
use rz_render::BackendError;
use rz_sdf::ShaderError;
use thiserror::Error;

/// Errors raised while building or rendering a scene
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("No scene loaded")]
    NoScene,

    #[error("Scene build failed: {0}")]
    Build(#[from] ShaderError),

    #[error("Render failed: {0}")]
    Render(#[from] BackendError),

    #[error("Modules failed to compile: {}", .0.join(", "))]
    CompileFailed(Vec<String>),

    #[error("Invalid config: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    #[error("Invalid scene: {0}")]
    Invalid(#[from] rz_core::Error),
}

const SPHERE: &str = "        out_distance = length(position) - ${radius}.x;";

const ROUNDED_BOX: &str = r"        let q = abs(position) - ${size}.xyz + vec3<f32>(${rounding}.x);
        out_distance = length(max(q, vec3<f32>(0.0))) + min(max(q.x, max(q.y, q.z)), 0.0) - ${rounding}.x;";

const PLANE: &str = r"        if (ray_direction.y < 0.0) {
            let t = -ray_origin.y / ray_direction.y;
            if (t < max_distance) {
                out_shape = vec4<f32>(0.0, t, ground_material, ground_id);
                out_normal = vec3<f32>(0.0, 1.0, 0.0);
            }
        }";

const LAMBERT: &str = r"        let diffuse = max(dot(hit_normal, direction_to_light), 0.0) * shadow;
        let lit = ${albedo}.xyz * (diffuse * light_color.xyz + vec3<f32>(0.08 * occlusion));
        out_color = vec4<f32>(lit, 1.0);";

const MIRROR: &str = r"        let diffuse = max(dot(hit_normal, direction_to_light), 0.0) * shadow;
        out_color = vec4<f32>(${albedo}.xyz * diffuse * light_color.xyz, 1.0);
        out_mask = vec3<f32>(${reflectance}.x);
        out_reflection_dir = reflect(incoming_direction, hit_normal);
        out_reflection_dist = 0.02;";

const CHECKER: &str = r"        let cell = floor(hit_position.xz * ${scale}.x);
        let odd = abs(cell.x + cell.y) % 2.0;
        let albedo = mix(vec3<f32>(0.85), vec3<f32>(0.25), odd);
        let diffuse = max(dot(hit_normal, direction_to_light), 0.0) * shadow;
        out_color = vec4<f32>(albedo * (diffuse * light_color.xyz + vec3<f32>(0.05 * occlusion)), 1.0);";

fn lambert(albedo: [f32; 3]) -> MaterialSlot {
    MaterialSlot::new(
        Component::new("lambert", ComponentType::Material3d)
            .with_value("albedo", Vec3::from(albedo))
            .with_code(LAMBERT),
    )
}

/// A sphere and a mirrored box on a checkered plane, lit by one point light
pub fn demo_scene() -> Scene {
    let camera = Camera::look_at(Vec3::new(0.0, 1.6, 4.5), Vec3::new(0.0, 0.5, 0.0));

    let sphere = StageItem::new("sphere")
        .with_shape(
            Component::new("sphere", ComponentType::Sdf3d)
                .with_value("radius", 0.6)
                .with_code(SPHERE),
        )
        .with_transform(
            Component::new("transform", ComponentType::Transform3d)
                .with_value("_posX", -0.8)
                .with_value("_posY", 0.6),
        )
        .with_material(lambert([0.9, 0.35, 0.2]));

    let cube = StageItem::new("box")
        .with_shape(
            Component::new("rounded box", ComponentType::Sdf3d)
                .with_value("size", Vec3::splat(0.45))
                .with_value("rounding", 0.05)
                .with_code(ROUNDED_BOX),
        )
        .with_transform(
            Component::new("transform", ComponentType::Transform3d)
                .with_value("_posX", 0.9)
                .with_value("_posY", 0.45)
                .with_value("_posZ", -0.3),
        )
        .with_material(MaterialSlot::new(
            Component::new("mirror", ComponentType::Material3d)
                .with_value("albedo", Vec3::new(0.2, 0.25, 0.3))
                .with_value("reflectance", 0.6)
                .with_code(MIRROR),
        ));

    let ground = StageItem::new("ground")
        .with_ground(Component::new("plane", ComponentType::Ground3d).with_code(PLANE))
        .with_material(MaterialSlot::new(
            Component::new("checker", ComponentType::Material3d)
                .with_value("scale", 2.0)
                .with_code(CHECKER),
        ));

    Scene::new(camera.to_component())
        .with_object(ground)
        .with_object(sphere)
        .with_object(cube)
        .with_light(PointLight::new(Vec3::new(2.5, 4.0, 3.0), Vec3::ONE, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_scene_is_valid() {
        let scene = demo_scene();
        assert!(scene.validate().is_ok());
        assert_eq!(scene.objects.len(), 3);
        assert!(scene.objects[0].is_ground());
        assert_eq!(scene.lights.len(), 1);
    }

    #[test]
    fn test_compile_failure_lists_labels() {
        let err = SceneError::CompileFailed(vec!["sphere".into(), "box".into()]);
        assert_eq!(err.to_string(), "Modules failed to compile: sphere, box");
    }
}
