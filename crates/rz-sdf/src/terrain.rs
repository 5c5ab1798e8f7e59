//! Terrain height-field generation
//!
//! The ground item of a scene with a [`Terrain`] compiles into a
//! `terrain_map` function instead of shape blocks. Layers are folded in
//! reverse declaration order: `Add` and `Subtract` always apply, `Max` raises
//! the height to `height + delta - 0.5` only where that exceeds it, and the
//! last processed winning `Max` layer keeps its material.

use rz_core::stage::{MaterialSlot, StageItem};
use rz_core::terrain::{LayerBlend, LayerNoise, ScatteredObject, ShapesBlend, Terrain, TerrainLayer};
use tracing::debug;

use crate::sections::Section;
use crate::stream::SdfStream;
use crate::templates;

impl<'a> SdfStream<'a> {
    /// Emit materials, scattered objects and the `terrain_map` function
    pub(crate) fn emit_terrain(&mut self, terrain: &'a Terrain, ground: &'a StageItem) {
        let fallback_material = self.materials.current();

        let mut default_material = None;
        for (index, material) in terrain.materials.iter().enumerate() {
            let id = self.materials.claim(Some(ground.id));
            self.emit_terrain_material(id, &material.slot, index == 0);
            if index == 0 {
                default_material = Some(id);
            }
        }

        let mut layer_materials = Vec::with_capacity(terrain.layers.len());
        for layer in terrain.layers.iter().rev() {
            match &layer.material {
                Some(slot) => {
                    let id = self.materials.claim(Some(ground.id));
                    self.emit_terrain_material(id, slot, true);
                    layer_materials.push(Some(id));
                }
                None => {
                    self.materials.claim(None);
                    layer_materials.push(None);
                }
            }
        }

        let size = self.properties.collect_global("terrain_size", terrain.size);
        let scale = self.properties.collect_global("terrain_scale", terrain.scale);
        let height_scale = self
            .properties
            .collect_global("terrain_height_scale", terrain.height_scale);

        let mut code = format!(
            r#"
fn terrain_map(in_position: vec3<f32>, fd: ptr<function, FuncData>) -> vec4<f32> {{
    let time = (*fd).time;
    let seed = (*fd).seed;
__CREATE_TEXTURE_DEFINITIONS__
    let terrain_position = in_position;
    var material_id = {default_id}.0;
    var out_distance = 1000000.0;
    var local_height = 0.0;
    var local_distance = 0.0;
    var layer_material = false;
    var inst_object = vec4<f32>(1000.0, 1000.0, -1.0, -1.0);
    let terrain_size = data[{size}].x;
    let terrain_scale = data[{scale}].x;
    var height = terrain_height_at((terrain_position.xz + terrain_size / terrain_scale / 2.0) / terrain_size * terrain_scale) * data[{height_scale}].x;
"#,
            default_id = default_material.unwrap_or(fallback_material)
        );

        for (index, (layer, material)) in terrain
            .layers
            .iter()
            .rev()
            .zip(layer_materials.iter().copied())
            .enumerate()
        {
            let layer_code = self.layer_code(index, layer, material);
            code.push_str(&layer_code);
        }

        if let Some(id) = default_material {
            code.push_str(&format!(
                "    if (!layer_material) {{\n        local_height = 0.0;\n__{}__\n        height += local_height;\n    }}\n",
                templates::bump_token(id)
            ));
        }
        code.push_str(&format!(
            r#"    var rc = vec4<f32>(terrain_position.y - height, 0.0, material_id, __GROUND_ID__.0);
    if (inst_object.x < rc.x) {{
        rc = inst_object;
    }}
    return rc;
}}
"#
        ));
        self.sections.push(Section::TerrainMap, &code);
        debug!(
            layers = terrain.layers.len(),
            materials = terrain.materials.len(),
            scattered = self.scatter_count,
            "Emitted terrain map"
        );
    }

    fn layer_code(&mut self, index: usize, layer: &'a TerrainLayer, material: Option<u32>) -> String {
        let mut code = format!("    // layer {index}\n    local_height = 0.0;\n");
        let noise = self.noise_call(index, &layer.noise);
        let mut offset = ("0.0".to_string(), "0.0".to_string());

        if layer.shapes.is_empty() {
            if let Some(object) = &layer.object {
                let scatter = self.scatter_code(object, &offset);
                code.push_str(&scatter);
            }
            code.push_str(&noise);
            code.push_str(&blend_code(layer.blend, material));
            return code;
        }

        code.push_str("    {\n        var layer_distance = 1000000.0;\n");
        for shape in &layer.shapes {
            let px = self.properties.collect_transform(shape, "_posX");
            let py = self.properties.collect_transform(shape, "_posY");
            let rotate = self.properties.collect_transform(shape, "_rotate");
            let body = self.resolve(shape).unwrap_or_default();
            code.push_str(&format!(
                r#"        {{
            var position = rotate2(translate2(terrain_position.xz, vec2<f32>(data[{px}].x, -data[{py}].x)), radians(360.0 - data[{rotate}].x));
{body}
        }}
        layer_distance = min(layer_distance, out_distance);
"#
            ));
            offset = (format!("data[{px}].x"), format!("data[{py}].x"));
        }
        code.push_str("        out_distance = layer_distance;\n        local_distance = layer_distance;\n    }\n");

        code.push_str("    if (local_distance <= 0.0) {\n");
        code.push_str(&format!(
            "        local_height += {};\n",
            contribution(layer.shapes_blend, layer.shape_factor)
        ));
        if let (Some(id), false) = (material, layer.blend == LayerBlend::Max) {
            code.push_str(&format!(
                "        material_id = {id}.0;\n        layer_material = true;\n__{}__\n",
                templates::bump_token(id)
            ));
        }
        if let Some(object) = &layer.object {
            let scatter = self.scatter_code(object, &offset);
            code.push_str(&scatter);
        }
        code.push_str(&noise);
        code.push_str("        local_height *= 1.0 - smoothstep(-0.2, 0.0, local_distance);\n");
        code.push_str(&blend_code(layer.blend, material));
        code.push_str("    }\n");
        code
    }

    /// Emit the noise helper of a layer and return the call adding it
    fn noise_call(&mut self, index: usize, noise: &'a LayerNoise) -> String {
        let (component, signature, output, argument) = match noise {
            LayerNoise::None => return String::new(),
            LayerNoise::TwoD(c) => (c, "vec2<f32>", "var out_height = 0.0;", "terrain_position.xz"),
            LayerNoise::ThreeD(c) => (
                c,
                "vec3<f32>",
                "var out_height = 0.0;",
                "terrain_position + vec3<f32>(0.0, local_height, 0.0)",
            ),
            LayerNoise::Image(c) => (c, "vec2<f32>", "var out_color = vec4<f32>(0.0);", "terrain_position.xz"),
        };
        let result = if matches!(noise, LayerNoise::Image(_)) {
            "out_color.x"
        } else {
            "out_height"
        };
        let body = self.resolve(component).unwrap_or_default();
        self.sections.push(
            Section::TerrainMap,
            &format!(
                r#"
fn terrain_noise{index}(position: {signature}, fd: ptr<function, FuncData>) -> f32 {{
    let time = (*fd).time;
    let seed = (*fd).seed;
__CREATE_TEXTURE_DEFINITIONS__
    {output}
    {{
{body}
    }}
    return {result};
}}
"#
            ),
        );
        format!("        local_height += terrain_noise{index}({argument}, fd);\n")
    }

    /// Compile a scattered object into `scene_map{n}` and return the cell lookup
    fn scatter_code(&mut self, object: &'a ScatteredObject, offset: &(String, String)) -> String {
        self.scatter_count += 1;
        let n = self.scatter_count;

        let saved = self
            .sections
            .replace(Section::Map, templates::map_prologue(&format!("scene_map{n}")));
        self.stream_item(&object.item);
        let mut map = self.sections.replace(Section::Map, saved);
        map.push_str(templates::MAP_EPILOGUE);
        self.sections.push(Section::TerrainMap, &map);

        let spacing = object.spacing.max(0.001);
        format!(
            r#"        {{
            let pos = terrain_position - vec3<f32>({x}, height, -{y});
            let cell_id = floor(pos.xz / {spacing:?});
            (*fd).hash = hash12(cell_id);
            if ((*fd).hash <= {visible:?}) {{
                let jitter = {random:?} * hash12(cell_id + vec2<f32>(17.0, 31.0)) / 5.0;
                let cell = pos.xz - {spacing:?} * cell_id - {spacing:?} / 2.0 + jitter;
                let scattered = scene_map{n}(vec3<f32>(cell.x, pos.y, cell.y), fd);
                if (scattered.x < inst_object.x) {{
                    inst_object = scattered;
                }}
            }}
        }}
"#,
            x = offset.0,
            y = offset.1,
            visible = object.visible,
            random = object.random
        )
    }

    fn emit_terrain_material(&mut self, id: u32, slot: &'a MaterialSlot, bump: bool) {
        for pattern in &slot.patterns {
            self.resolve(pattern);
        }
        let mut code = templates::material_function_prologue(id);
        code.push_str("    uv = hit_position.xz;\n");
        if slot.uv_map.is_some() {
            let uv_code = self.uv_body(slot.uv_map.as_ref());
            code.push_str(&templates::material_uv_block(&uv_code));
        }
        let body = self.resolve(&slot.material).unwrap_or_default();
        code.push_str(&templates::material_function_body(&body));
        self.sections.push(Section::MaterialFunctions, &code);
        self.sections
            .push(Section::Material, &templates::material_dispatch(id));

        if bump {
            if let Some(conn) = slot.material.bump_connection() {
                self.substitutions.insert(
                    &templates::bump_token(id),
                    format!(
                        "        {{\n            let normal = vec3<f32>(0.0);\n            let out_uv = terrain_position.xz;\n            var pattern: PatternOut;\n            {}(out_uv, terrain_position, normal, vec3<f32>(0.0), &pattern, fd);\n            local_height += pattern.{} * 0.02;\n        }}",
                        conn.function, conn.terminal
                    ),
                );
            }
        }
    }
}

/// Height added inside the layer shapes, clamped to the factor
fn contribution(blend: ShapesBlend, factor: f32) -> String {
    match blend {
        ShapesBlend::Factor => format!("{factor:?}"),
        ShapesBlend::FactorTimesShape if factor < 0.0 => {
            format!("max(abs(local_distance) * {factor:?}, {factor:?})")
        }
        ShapesBlend::FactorTimesShape => format!("min(abs(local_distance) * {factor:?}, {factor:?})"),
    }
}

fn blend_code(blend: LayerBlend, material: Option<u32>) -> String {
    match blend {
        LayerBlend::Add => "        height += local_height;\n".to_string(),
        LayerBlend::Subtract => "        height -= local_height;\n".to_string(),
        LayerBlend::Max => {
            let claim = material.map_or(String::new(), |id| {
                format!("            material_id = {id}.0;\n            layer_material = true;\n")
            });
            format!(
                "        if (height + local_height - 0.5 > height) {{\n            height = height + local_height - 0.5;\n{claim}        }}\n"
            )
        }
    }
}
