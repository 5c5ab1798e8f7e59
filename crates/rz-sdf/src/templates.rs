//! WGSL skeletons the stream fills in
//!
//! Component bodies run inside these skeletons and talk to them through a
//! fixed set of variable names:
//!
//! | role | reads | writes |
//! |---|---|---|
//! | 3D shape | `position: vec3` | `out_distance` |
//! | 2D shape | `position: vec2` | `out_distance` |
//! | domain | `position` | `out_position` |
//! | modifier | `position`, `shape_distance`, `offset_from_center` | `out_distance` |
//! | combinator | `shape_a`, `shape_b` | `out_shape` |
//! | material | `uv`, `local_position`, `hit_position`, `hit_normal`, `incoming_direction`, `direction_to_light`, `light_type`, `light_color`, `shadow`, `occlusion` | `out_color`, `out_mask`, `out_reflection_dir`, `out_reflection_dist`, `out_reflection_blur` |
//! | uv map | `position`, `normal` | `out_uv` |
//! | camera | `uv`, `size` | `out_position`, `out_direction` |
//! | background | `uv`, `size`, `position`, `ray_direction` | `out_color` |
//! | ground | `ray_origin`, `ray_direction`, `max_distance`, `ground_id`, `ground_material` | `out_shape`, `out_normal` |
//! | ray march | `ray_origin`, `ray_direction`, `min_distance`, `max_distance` | `out_shape` |
//! | normal | `position` | `out_normal` |
//! | ambient occlusion | `position`, `normal` | `out_ao` |
//! | soft shadows | `position`, `direction` | `out_shadow` |
//! | light | `light_position`, `position` | `out_color` |
//! | fog | `position` | `out_density` |
//! | terrain noise | `position` (`vec2` or `vec3`) | `out_height` |
//! | terrain image | `position: vec2` | `out_color` |
//!
//! Every body can use `time`, `seed`, `data` and the `fd` pointer.

use crate::instance::KernelEntry;

/// Declarations shared by every module
pub const HEADER: &str = include_str!("shaders/header.wgsl");

pub const TEXTURE_HEADER_TOKEN: &str = "TEXTURE_HEADER_CODE";
pub const AFTER_TEXTURE_OFFSET_TOKEN: &str = "AFTER_TEXTURE_OFFSET";
pub const TEXTURE_DEFINITIONS_TOKEN: &str = "CREATE_TEXTURE_DEFINITIONS";
pub const BOUNDING_BOX_TOKEN: &str = "BOUNDING_BOX_CODE";
pub const DENSITY_TOKEN: &str = "DENSITY_CODE";
/// Shape id of the analytic ground or terrain surface
pub const GROUND_ID_TOKEN: &str = "GROUND_ID";

/// Token of the bump splice for a material id
pub fn bump_token(material: u32) -> String {
    format!("BUMP_CODE_{material}")
}

/// Built-in render-stage bodies used when the scene has no component
pub mod defaults {
    pub const RAY_MARCH: &str = r#"
        var t = min_distance;
        for (var i = 0; i < 70 && t < max_distance; i += 1) {
            let hit = scene_map(ray_origin + ray_direction * t, fd);
            if (hit.x < 0.001 * t) {
                out_shape = hit;
                out_shape.y = t;
                break;
            }
            t += hit.x;
        }
"#;

    pub const NORMAL: &str = r#"
        let e = vec2<f32>(1.0, -1.0) * 0.5773 * 0.0005;
        out_normal = e.xyy * scene_map(position + e.xyy, fd).x;
        out_normal += e.yyx * scene_map(position + e.yyx, fd).x;
        out_normal += e.yxy * scene_map(position + e.yxy, fd).x;
        out_normal += e.xxx * scene_map(position + e.xxx, fd).x;
        out_normal = normalize(out_normal);
"#;

    pub const AO: &str = r#"
        var occ = 0.0;
        var sca = 1.0;
        for (var i = 0; i < 5; i += 1) {
            let h = 0.01 + 0.12 * f32(i) / 4.0;
            let d = scene_map(position + h * normal, fd).x;
            occ += (h - d) * sca;
            sca *= 0.95;
        }
        out_ao = clamp(1.0 - 3.0 * occ, 0.0, 1.0);
"#;

    pub const SHADOWS: &str = r#"
        var res = 1.0;
        var t = 0.02;
        for (var i = 0; i < 32; i += 1) {
            let h = scene_map(position + direction * t, fd).x;
            res = min(res, 8.0 * h / t);
            t += clamp(h, 0.02, 0.1);
            if (res < 0.005 || t > 5.0) {
                break;
            }
        }
        out_shadow = clamp(res, 0.0, 1.0);
"#;

    pub const UV_MAP: &str = r#"
        let n = abs(normal);
        if (n.x > n.y && n.x > n.z) {
            out_uv = position.zy;
        } else if (n.y > n.z) {
            out_uv = position.xz;
        } else {
            out_uv = position.xy;
        }
"#;

    pub const BACKGROUND: &str = r#"
        let sky = clamp(ray_direction.y, 0.0, 1.0);
        out_color = vec4<f32>(mix(vec3<f32>(0.75, 0.8, 0.9), vec3<f32>(0.3, 0.5, 0.85), sky), 1.0);
"#;
}

/// Per-kernel `FuncData` initialization, substituted at close
pub fn funcdata_code(entry: KernelEntry) -> String {
    format!(
        r#"    var func_data: FuncData;
    let fd = &func_data;
    (*fd).time = data[0].x;
    (*fd).seed = data[0].z;
    (*fd).hash = 0.0;
    (*fd).distance_2d = 0.0;
    (*fd).in_shape = vec4<f32>(1000.0, 1000.0, -1.0, -1.0);
    (*fd).in_hit_point = vec3<f32>(100000.0);
    (*fd).rng = vec2<f32>(f32(gid.x), f32(gid.y)) / frame.size + vec2<f32>((*fd).seed + {salt}.0, f32(frame.sample_index) * 0.618 + f32(frame.reflection));
    let time = (*fd).time;
    let seed = (*fd).seed;
"#,
        salt = entry as u32
    )
}

fn kernel_open(entry: KernelEntry, passthrough: &str) -> String {
    format!(
        r#"
@compute @workgroup_size(8, 8, 1)
fn {name}(@builtin(global_invocation_id) gid: vec3<u32>) {{
    if (!in_image(gid)) {{
        return;
    }}
    let index = pixel_index(gid);
{passthrough}    if (!in_chunk(gid)) {{
        return;
    }}
    let size = frame.size;
    let uv = vec2<f32>(f32(gid.x), f32(gid.y));
"#,
        name = entry.name()
    )
}

const RAY_LOAD: &str = r#"    let ray_origin = ray_origin_buf[index].xyz;
    let ray_direction = ray_direction_buf[index].xyz;
    if (ray_direction.x >= DEAD_RAY) {
        return;
    }
"#;

/// Opening of a distance map function
pub fn map_prologue(name: &str) -> String {
    format!(
        r#"
fn {name}(in_origin: vec3<f32>, fd: ptr<function, FuncData>) -> vec4<f32> {{
    let time = (*fd).time;
    let seed = (*fd).seed;
__CREATE_TEXTURE_DEFINITIONS__
    var origin = in_origin;
    let origin_backup = in_origin;
    var object_position = vec3<f32>(0.0);
    var out_distance = 10.0;
    var bump = 0.0;
    var scale = 1.0;
    var out_shape = (*fd).in_shape;
    out_shape.x = length(origin - (*fd).in_hit_point) + 0.5;
"#
    )
}

pub const MAP_EPILOGUE: &str = "    return out_shape;\n}\n";

/// The `background` function every module carries
pub fn background_function(body: &str) -> String {
    format!(
        r#"
fn background(uv: vec2<f32>, size: vec2<f32>, position: vec3<f32>, ray_direction: vec3<f32>, fd: ptr<function, FuncData>) -> vec4<f32> {{
    let time = (*fd).time;
    let seed = (*fd).seed;
__CREATE_TEXTURE_DEFINITIONS__
    var out_color = vec4<f32>(0.0, 0.0, 0.0, 1.0);
    {{
{body}
    }}
    return out_color;
}}
"#
    )
}

/// Opening of the hit-and-normals kernel, up to the ground/ray-march code
pub fn hit_and_normals_prologue() -> String {
    let mut code = kernel_open(
        KernelEntry::HitAndNormals,
        "    shape_out[index] = shape_in[index];\n    meta_out[index] = meta_in[index];\n",
    );
    code.push_str(RAY_LOAD);
    code.push_str(&format!("__{}_FUNCDATA__\n", KernelEntry::HitAndNormals.token()));
    code.push_str(
        r#"    var out_shape = shape_in[index];
    let in_shape = out_shape;
    var out_meta = meta_in[index];
    var out_normal = normal_buf[index].xyz;
    var min_distance = 0.001;
    var max_distance = out_shape.y;
    (*fd).hash = out_meta.z;
    (*fd).in_shape = out_shape;
    (*fd).in_hit_point = ray_origin + ray_direction * out_shape.y;
"#,
    );
    code
}

/// Ray march wrapped in the bounding box block
pub fn hit_and_normals_march(ray_march: &str) -> String {
    format!(
        r#"
__BOUNDING_BOX_CODE__
{ray_march}
    }}
"#
    )
}

/// Opening of the normal update run when the object was hit
pub fn hit_and_normals_normal(normal: &str) -> String {
    format!(
        r#"    if (out_shape.w != in_shape.w) {{
        out_meta.z = (*fd).hash;
        out_meta.w = (*fd).distance_2d;
        let position = ray_origin + out_shape.y * ray_direction;
        {{
{normal}
        }}
"#
    )
}

/// Closing of the hit-and-normals kernel; `normal_open` tells whether the
/// block of [`hit_and_normals_normal`] is still open
pub fn hit_and_normals_epilogue(normal_open: bool) -> String {
    let mut code = String::new();
    if normal_open {
        code.push_str("    }\n");
    }
    code.push_str(
        r#"    normal_buf[index] = vec4<f32>(out_normal, 0.0);
    meta_out[index] = out_meta;
    shape_out[index] = out_shape;
}
"#,
    );
    code
}

/// Block evaluating the root bounding box before the ray march
pub fn bounding_box_code(position: [usize; 3], extent: [usize; 3]) -> String {
    format!(
        r#"    let bb_center = vec3<f32>(data[{}].x, data[{}].x, data[{}].x);
    let bb_extent = vec3<f32>(data[{}].x, data[{}].x, data[{}].x) / 2.0;
    let bb = hit_bbox(ray_origin, ray_direction, bb_center - bb_extent, bb_center + bb_extent);
    if (bb.y >= 0.0) {{
        min_distance = max(min_distance, bb.x);
        max_distance = min(max_distance, bb.y);
"#,
        position[0], position[1], position[2], extent[0], extent[1], extent[2]
    )
}

pub const NO_BOUNDING_BOX: &str = "    if (true) {\n";

/// Keep the transform state of the enclosing item before a nested transform
pub fn save_transform(index: u32) -> String {
    format!(
        "    let saved_position_{index} = object_position;\n    let saved_scale_{index} = scale;\n    let saved_origin_{index} = origin;\n"
    )
}

pub fn restore_transform(index: u32) -> String {
    format!(
        "    object_position = saved_position_{index};\n    scale = saved_scale_{index};\n    origin = saved_origin_{index};\n"
    )
}

/// The ambient occlusion kernel
pub fn ao_kernel(ao: &str) -> String {
    let mut code = kernel_open(KernelEntry::Ao, "    meta_out[index] = meta_in[index];\n");
    code.push_str(RAY_LOAD);
    code.push_str(&format!("__{}_FUNCDATA__\n", KernelEntry::Ao.token()));
    code.push_str(&format!(
        r#"    let out_shape = shape_in[index];
    var out_meta = meta_in[index];
    (*fd).hash = out_meta.z;
    (*fd).in_shape = out_shape;
    (*fd).in_hit_point = ray_origin + ray_direction * out_shape.y;
    {{
        let position = ray_origin + out_shape.y * ray_direction;
        let normal = normal_buf[index].xyz;
        var out_ao = 1.0;
{ao}
        out_meta.x = min(out_meta.x, out_ao);
    }}
    meta_out[index] = out_meta;
}}
"#
    ));
    code
}

/// Soft shadow and participating media helpers
pub fn shadow_helpers(shadows: &str) -> String {
    format!(
        r#"
fn soft_shadow(position: vec3<f32>, direction: vec3<f32>, fd: ptr<function, FuncData>) -> f32 {{
    let time = (*fd).time;
    let seed = (*fd).seed;
    var out_shadow = 1.0;
{shadows}
    return out_shadow;
}}

fn participating_media(position: vec3<f32>, const_fog_density: f32, fd: ptr<function, FuncData>) -> vec2<f32> {{
    let time = (*fd).time;
    let seed = (*fd).seed;
__CREATE_TEXTURE_DEFINITIONS__
    var density = 0.0;
    var out_density = 0.0;
__DENSITY_CODE__
    let sigma_s = const_fog_density + density;
    return vec2<f32>(sigma_s, max(0.000000001, sigma_s));
}}

fn phase_function() -> f32 {{
    return 1.0 / (4.0 * 3.14159265);
}}

fn volumetric_shadow(from_position: vec3<f32>, direction: vec3<f32>, length_to_light: f32, const_fog_density: f32, fd: ptr<function, FuncData>) -> f32 {{
    let steps = 16.0;
    let dd = length_to_light / steps;
    var shadow = 1.0;
    for (var s = 0.5; s < steps - 0.1; s += 1.0) {{
        let pos = from_position + direction * (s / steps);
        let sigma = participating_media(pos, const_fog_density, fd);
        shadow *= exp(-sigma.y * dd);
    }}
    return shadow;
}}
"#
    )
}

/// Opening of the shadow kernel, up to the point light dispatch
pub fn shadow_prologue(shadows: &str) -> String {
    let mut code = kernel_open(KernelEntry::Shadow, "    meta_out[index] = meta_in[index];\n");
    code.push_str(RAY_LOAD);
    code.push_str(&format!("__{}_FUNCDATA__\n", KernelEntry::Shadow.token()));
    code.push_str(&format!(
        r#"    let out_shape = shape_in[index];
    var out_meta = meta_in[index];
    var max_distance = out_shape.y;
    (*fd).hash = out_meta.z;
    let light_type = light_data.kind;
    var light_color = light_data.color.xyz;
    {{
        let position = ray_origin + (out_shape.y - 0.025) * ray_direction;
        var direction = normalize(light_data.position.xyz);
        if (light_type.y != 0.0) {{
            direction = normalize(light_data.position.xyz - position);
        }}
        var out_shadow = 1.0;
{shadows}
        out_meta.y = min(out_meta.y, out_shadow);
    }}
"#
    ));
    code
}

/// In-scattering integration of the shadow kernel
///
/// `light_dispatch` updates `light_color` for point lights with a body.
pub fn shadow_fog(has_fog: bool, max_fog_slot: usize, light_dispatch: &str) -> String {
    format!(
        r#"    let const_fog_density = light_data.position.w;
    if (const_fog_density > 0.0 || {has_fog}) {{
        let density_in = density_buf[index];
        var transmittance = 1.0;
        var scattered_light = vec3<f32>(0.0);
        max_distance = min(max_distance, data[{max_fog_slot}].x);
        var t = random(fd) * max_distance;
        var tt = 0.0;
        for (var i = 0; i < 5 && t < max_distance; i += 1) {{
            let pos = ray_origin + ray_direction * t;
            let sigma = participating_media(pos, const_fog_density, fd);
            var light_direction = normalize(light_data.position.xyz);
            var length_to_light = 0.5;
            if (light_type.y != 0.0) {{
                let to_light = light_data.position.xyz - pos;
                light_direction = normalize(to_light);
                length_to_light = length(to_light);
                let light_index = i32(light_type.z) - 1;
                let position = pos;
{light_dispatch}
            }}
            let s = light_color * sigma.x * phase_function() * volumetric_shadow(pos, light_direction, length_to_light, const_fog_density, fd) * soft_shadow(pos, light_direction, fd);
            let s_int = (s - s * exp(-sigma.y * tt)) / sigma.y;
            scattered_light += transmittance * s_int;
            transmittance *= exp(-sigma.y * tt);
            tt += random(fd);
            t += tt;
        }}
        density_buf[index] = vec4<f32>(scattered_light + density_in.xyz, transmittance * density_in.w);
    }}
    meta_out[index] = out_meta;
}}
"#
    )
}

/// Opening of the material kernel, ending with the background branch
pub fn material_prologue(light_dispatch: &str) -> String {
    let mut code = kernel_open(KernelEntry::Material, "    refl_dir_out[index] = refl_dir_in[index];\n");
    code.push_str(RAY_LOAD);
    code.push_str(&format!("__{}_FUNCDATA__\n", KernelEntry::Material.token()));
    code.push_str(&format!(
        r#"    let shape = shape_in[index];
    let hit_meta = meta_in[index];
    var mask = mask_buf[index].xyz;
    var color = color_buf[index];
    let incoming_direction = ray_direction;
    let hit_position = ray_origin + shape.y * ray_direction;
    let hit_normal = normal_buf[index].xyz;
    let occlusion = hit_meta.x;
    let shadow = hit_meta.y;
    var material_out: MaterialOut;
    material_out.color = vec4<f32>(0.0, 0.0, 0.0, 1.0);
    material_out.mask = vec3<f32>(0.0);
    material_out.reflection_dir = vec3<f32>(DEAD_RAY);
    material_out.reflection_dist = 0.0;
    (*fd).hash = hit_meta.z;
    (*fd).distance_2d = abs(hit_meta.w);
    (*fd).in_shape = shape;
    (*fd).in_hit_point = hit_position;
    let light_type = light_data.kind;
    var light_color = light_data.color;
    var direction_to_light = normalize(light_data.position.xyz);
    if (light_type.y != 0.0) {{
        direction_to_light = normalize(light_data.position.xyz - hit_position);
        let light_index = i32(light_type.z) - 1;
        let position = hit_position;
{light_dispatch}
    }}
    let last_light = light_type.z == light_type.w;
    if (shape.w < 0.0) {{
        var bg_uv = uv / size;
        bg_uv.y = 1.0 - bg_uv.y;
        let back = background(bg_uv, size, hit_position, ray_direction, fd);
        color = vec4<f32>(color.xyz + back.xyz * mask, color.w);
        mask = vec3<f32>(0.0);
        if (last_light) {{
            refl_dir_out[index] = vec4<f32>(DEAD_RAY);
        }}
    }}"#
    ));
    code
}

/// One branch of the material dispatch chain
pub fn material_dispatch(id: u32) -> String {
    format!(
        r#"
    else if (shape.z > {id}.0 - 0.5 && shape.z < {id}.0 + 0.5) {{
        material{id}(incoming_direction, hit_position, hit_normal, direction_to_light, light_type, light_color, shadow, occlusion, &material_out, fd);
        color = vec4<f32>(color.xyz + material_out.color.xyz * mask, color.w);
        color = clamp(color, vec4<f32>(0.0), vec4<f32>(1.0));
        if (last_light) {{
            refl_dir_out[index] = vec4<f32>(material_out.reflection_dir, material_out.reflection_dist);
            mask *= material_out.mask;
        }}
    }}"#
    )
}

pub const MATERIAL_EPILOGUE: &str = r#"
    color_buf[index] = color;
    mask_buf[index] = vec4<f32>(mask, 0.0);
}
"#;

/// Opening of a `material{id}` function up to the material body
pub fn material_function_prologue(id: u32) -> String {
    format!(
        r#"
fn material{id}(incoming_direction: vec3<f32>, hit_position: vec3<f32>, hit_normal: vec3<f32>, direction_to_light: vec3<f32>, light_type: vec4<f32>, light_color: vec4<f32>, shadow: f32, occlusion: f32, material_out: ptr<function, MaterialOut>, fd: ptr<function, FuncData>) {{
    let time = (*fd).time;
    let seed = (*fd).seed;
__CREATE_TEXTURE_DEFINITIONS__
    var local_position = hit_position;
    var uv = vec2<f32>(0.0);
    var out_color = vec4<f32>(0.0, 0.0, 0.0, 1.0);
    var out_mask = vec3<f32>(0.0);
    var out_reflection_dir = reflect(incoming_direction, hit_normal);
    var out_reflection_dist = 0.0;
    var out_reflection_blur = 0.0;
"#
    )
}

/// UV mapping block inside a material function
pub fn material_uv_block(body: &str) -> String {
    format!(
        r#"    {{
        let position = local_position;
        let normal = hit_normal;
        var out_uv = vec2<f32>(0.0);
{body}
        uv = out_uv;
    }}
"#
    )
}

/// Material body and the write-back into `MaterialOut`
pub fn material_function_body(body: &str) -> String {
    format!(
        r#"    {{
{body}
    }}
    (*material_out).color = out_color;
    (*material_out).mask = out_mask;
    (*material_out).reflection_dir = out_reflection_dir;
    (*material_out).reflection_dist = out_reflection_dist;
    (*material_out).reflection_blur = out_reflection_blur;
}}
"#
    )
}

/// A `light{index}` helper built from a light body
pub fn light_function(index: usize, body: &str) -> String {
    format!(
        r#"
fn light{index}(light_position: vec3<f32>, position: vec3<f32>, fd: ptr<function, FuncData>) -> vec4<f32> {{
    let time = (*fd).time;
    let seed = (*fd).seed;
__CREATE_TEXTURE_DEFINITIONS__
    var out_color = vec4<f32>(1.0);
    {{
{body}
    }}
    return out_color;
}}
"#
    )
}

/// Dispatch to the `light{index}` helpers, writing `light_color`
///
/// `rgb_only` selects the `vec3` flavor used by the shadow kernel.
pub fn light_dispatch(indices: &[usize], rgb_only: bool) -> String {
    let suffix = if rgb_only { ".xyz" } else { "" };
    let mut code = String::new();
    for index in indices {
        code.push_str(&format!(
            "        if (light_index == {index}) {{\n            light_color = light{index}(light_data.position.xyz, position, fd){suffix} * light_data.color{suffix};\n        }}\n"
        ));
    }
    code
}

/// The camera kernel writing primary rays
pub fn camera_kernel(camera: &str) -> String {
    let mut code = format!(
        r#"
@compute @workgroup_size(8, 8, 1)
fn {name}(@builtin(global_invocation_id) gid: vec3<u32>) {{
    if (!in_image(gid)) {{
        return;
    }}
    let index = pixel_index(gid);
    let size = frame.size;
"#,
        name = KernelEntry::Camera.name()
    );
    code.push_str(&format!("__{}_FUNCDATA__\n", KernelEntry::Camera.token()));
    code.push_str(&format!(
        r#"    var uv = vec2<f32>(f32(gid.x), f32(gid.y));
    if (frame.jitter != 0u) {{
        uv += vec2<f32>(random(fd), random(fd)) - 0.5;
    }}
    var out_position = vec3<f32>(0.0);
    var out_direction = vec3<f32>(0.0, 0.0, -1.0);
    {{
{camera}
    }}
    ray_origin_buf[index] = vec4<f32>(out_position, 0.0);
    ray_direction_buf[index] = vec4<f32>(normalize(out_direction), 0.0);
}}
"#
    ));
    code
}

/// The background kernel filling the back buffer
pub fn background_kernel() -> String {
    let mut code = format!(
        r#"
@compute @workgroup_size(8, 8, 1)
fn {name}(@builtin(global_invocation_id) gid: vec3<u32>) {{
    if (!in_image(gid)) {{
        return;
    }}
    let index = pixel_index(gid);
    let size = frame.size;
    let uv = vec2<f32>(f32(gid.x), f32(gid.y));
"#,
        name = KernelEntry::Background.name()
    );
    code.push_str(&format!("__{}_FUNCDATA__\n", KernelEntry::Background.token()));
    code.push_str(
        r#"    var bg_uv = uv / size;
    bg_uv.y = 1.0 - bg_uv.y;
    let ray_direction = ray_direction_buf[index].xyz;
    back_buf[index] = background(bg_uv, size, vec3<f32>(0.0), ray_direction, fd);
}
"#,
    );
    code
}

/// Opening of the 2D hit kernel, ending with the camera block
pub fn hit_2d_prologue(camera: &str) -> String {
    let mut code = format!(
        r#"
@compute @workgroup_size(8, 8, 1)
fn {name}(@builtin(global_invocation_id) gid: vec3<u32>) {{
    if (!in_image(gid)) {{
        return;
    }}
    let index = pixel_index(gid);
    let size = frame.size;
    let uv = vec2<f32>(f32(gid.x), f32(gid.y));
"#,
        name = KernelEntry::HitAndNormals.name()
    );
    code.push_str(&format!("__{}_FUNCDATA__\n", KernelEntry::HitAndNormals.token()));
    code.push_str(&format!(
        r#"    var origin = uv - size / 2.0;
    var out_distance = 10.0;
    var out_shape = vec4<f32>(100000.0, 0.0, -1.0, -1.0);
    var bump = 0.0;
    var scale = 1.0;
    {{
        let position = origin;
        var out_position = origin;
{camera}
        origin = out_position;
    }}
"#
    ));
    code
}

pub const HIT_2D_EPILOGUE: &str = r#"    shape_out[index] = out_shape;
}
"#;
