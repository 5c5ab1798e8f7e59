//! The scene-to-shader stream
//!
//! A stream compiles one root object. The caller opens it, walks the
//! object's hierarchy with [`SdfStream::push_stage_item`],
//! [`SdfStream::push_component`] and [`SdfStream::pull_stage_item`], then
//! closes it into a [`CompiledInstance`].
//!
//! ```ignore
//! stream.open_stream(StageType::Sdf3d, 0, &camera, None, None);
//! stream.push_stage_item(&item);
//! for shape in &item.shapes {
//!     stream.push_component(shape);
//! }
//! stream.pull_stage_item(&item);
//! let instance = stream.finish();
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use rz_core::component::{Component, ComponentId, ComponentType};
use rz_core::scene::Scene;
use rz_core::stage::{StageItem, StageItemId, StageType};
use tracing::{debug, trace};

use crate::error::ShaderError;
use crate::ids::{IdAllocator, MaterialStack};
use crate::instance::{submit, CompileSlot, CompiledInstance, KernelEntry, ShaderBackend, Submit};
use crate::properties::{PropertyTable, TextureList};
use crate::resolve::FragmentResolver;
use crate::sections::{unresolved_tokens, CodeSections, Section, Substitutions};
use crate::templates::{self, defaults};

/// One pushed stage item
#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame<'a> {
    pub(crate) item: &'a StageItem,
    /// Whether pulling this item pops the material stack
    pub(crate) pushed_material: bool,
    /// Index of the transform state saved on push, restored on pull
    pub(crate) saved_transform: Option<u32>,
}

/// Streams a stage item hierarchy into WGSL
pub struct SdfStream<'a> {
    pub(crate) resolver: &'a dyn FragmentResolver,
    pub(crate) scene: &'a Scene,
    pub(crate) stage_type: StageType,
    pub(crate) sections: CodeSections,
    pub(crate) substitutions: Substitutions,
    pub(crate) properties: PropertyTable,
    pub(crate) textures: TextureList,
    pub(crate) ids: IdAllocator,
    pub(crate) materials: MaterialStack,
    pub(crate) frames: Vec<Frame<'a>>,
    pub(crate) diagnostics: Vec<ShaderError>,
    pub(crate) ground: Option<&'a Component>,
    pub(crate) scatter_count: usize,
    transform_saves: u32,
    globals_added_for: HashSet<ComponentId>,
    texture_start: u32,
    entries: Vec<KernelEntry>,
    bounding_box: Option<String>,
    density_code: String,
    normal_open: bool,
    label: String,
    root: Option<StageItemId>,
    open: bool,
}

impl<'a> SdfStream<'a> {
    pub fn new(resolver: &'a dyn FragmentResolver, scene: &'a Scene, texture_start: u32) -> Self {
        Self {
            resolver,
            scene,
            stage_type: StageType::Sdf3d,
            sections: CodeSections::new(),
            substitutions: Substitutions::new(),
            properties: PropertyTable::new(),
            textures: TextureList::new(texture_start),
            ids: IdAllocator::new(0),
            materials: MaterialStack::new(0),
            frames: Vec::new(),
            diagnostics: Vec::new(),
            ground: None,
            scatter_count: 0,
            transform_saves: 0,
            globals_added_for: HashSet::new(),
            texture_start,
            entries: Vec::new(),
            bounding_box: None,
            density_code: String::new(),
            normal_open: false,
            label: String::new(),
            root: None,
            open: false,
        }
    }

    /// Reset every table and start the templates for a new instance
    pub fn open_stream(
        &mut self,
        stage_type: StageType,
        id_start: u32,
        camera: &'a Component,
        ground: Option<&'a Component>,
        background: Option<&'a Component>,
    ) {
        self.stage_type = stage_type;
        self.sections.clear();
        self.substitutions = Substitutions::new();
        self.properties = PropertyTable::new();
        self.textures = TextureList::new(self.texture_start);
        self.ids = IdAllocator::new(id_start);
        self.materials = MaterialStack::new(id_start);
        self.frames.clear();
        self.diagnostics.clear();
        self.globals_added_for.clear();
        self.bounding_box = None;
        self.density_code.clear();
        self.normal_open = false;
        self.label.clear();
        self.root = None;
        self.ground = ground;
        self.scatter_count = 0;
        self.transform_saves = 0;
        self.open = true;

        self.sections.push(Section::Header, templates::HEADER);

        match stage_type {
            StageType::Sdf3d => self.open_3d(id_start, ground, background),
            StageType::Sdf2d => {
                // A 3D camera writes a ray, the 2D kernel keeps the pixel origin
                let camera_code = if camera.component_type == ComponentType::Camera3d {
                    debug!(camera = %camera.name, "3D camera on a 2D target, using the identity camera");
                    String::new()
                } else {
                    self.resolve(camera).unwrap_or_default()
                };
                self.sections
                    .push(Section::HitAndNormals, &templates::hit_2d_prologue(&camera_code));
                self.entries = vec![KernelEntry::HitAndNormals];
            }
        }
        debug!(?stage_type, id_start, "Opened stream");
    }

    fn open_3d(&mut self, id_start: u32, ground: Option<&'a Component>, background: Option<&'a Component>) {
        let scene = self.scene;

        let background_code = match background {
            Some(component) => self.resolve(component).unwrap_or_default(),
            None => defaults::BACKGROUND.to_string(),
        };
        self.sections
            .push(Section::Background, &templates::background_function(&background_code));

        self.sections
            .push(Section::Map, &templates::map_prologue("scene_map"));

        let mut light_indices = Vec::new();
        for (index, light) in scene.lights.iter().enumerate() {
            if let Some(component) = &light.component {
                let code = self.resolve(component).unwrap_or_default();
                self.sections
                    .push(Section::Header, &templates::light_function(index, &code));
                light_indices.push(index);
            }
        }

        for fog in &scene.fog {
            let code = self.resolve(fog).unwrap_or_default();
            self.density_code.push_str(&format!(
                "    {{\n{code}\n        density += out_density;\n        out_density = 0.0;\n    }}\n"
            ));
        }

        let terrain = ground.and(scene.terrain.as_ref());
        let map_name = if terrain.is_some() { "terrain_map(" } else { "scene_map(" };
        let ray_march = match terrain.and_then(|t| t.ray_marcher.as_ref()) {
            Some(component) => self.resolve(component).unwrap_or_default(),
            None => self.render_body(scene.render.ray_march.as_ref(), defaults::RAY_MARCH),
        };
        let normal = self.render_body(scene.render.normal.as_ref(), defaults::NORMAL);
        let ao = self.render_body(scene.render.ao.as_ref(), defaults::AO);
        let shadows = self.render_body(scene.render.shadows.as_ref(), defaults::SHADOWS);
        let retarget = |code: &str| code.replace("scene_map(", map_name);

        let max_fog = self
            .properties
            .collect_global("max_fog_distance", scene.world.max_fog_distance);
        let shadows = retarget(&shadows);
        self.sections
            .push(Section::Shadow, &templates::shadow_helpers(&shadows));
        self.sections
            .push(Section::Shadow, &templates::shadow_prologue(&shadows));
        self.sections.push(
            Section::Shadow,
            &templates::shadow_fog(
                !scene.fog.is_empty(),
                max_fog,
                &templates::light_dispatch(&light_indices, true),
            ),
        );

        self.sections
            .push(Section::Ao, &templates::ao_kernel(&retarget(&ao)));

        self.sections
            .push(Section::HitAndNormals, &templates::hit_and_normals_prologue());
        match (ground, terrain) {
            (Some(_), Some(terrain)) => {
                self.sections.push(
                    Section::HitAndNormals,
                    &format!("    {{\n{}\n    }}\n", retarget(&ray_march)),
                );
                self.sections.push(
                    Section::HitAndNormals,
                    &templates::hit_and_normals_normal(&retarget(&normal)),
                );
                let mut slope = "        if (out_shape.w == __GROUND_ID__.0) {\n".to_string();
                for (index, material) in terrain.materials.iter().enumerate().skip(1) {
                    slope.push_str(&format!(
                        "            if (out_normal.y >= 1.0 - {max:?} && out_normal.y <= 1.0 - {min:?}) {{\n                out_shape.z = {id}.0;\n            }}\n",
                        max = material.max_slope,
                        min = material.min_slope,
                        id = id_start + index as u32
                    ));
                }
                slope.push_str("        }\n");
                self.sections.push(Section::HitAndNormals, &slope);
                self.normal_open = true;
            }
            (Some(ground), None) => {
                let code = self.resolve(ground).unwrap_or_default();
                self.sections.push(
                    Section::HitAndNormals,
                    &format!(
                        "    {{\n        let ground_id = __GROUND_ID__.0;\n        let ground_material = {id_start}.0;\n{code}\n    }}\n"
                    ),
                );
                self.normal_open = false;
            }
            (None, _) => {
                self.sections.push(
                    Section::HitAndNormals,
                    &templates::hit_and_normals_march(&ray_march),
                );
                self.sections.push(
                    Section::HitAndNormals,
                    &templates::hit_and_normals_normal(&normal),
                );
                self.normal_open = true;
            }
        }

        self.sections.push(
            Section::Material,
            &templates::material_prologue(&templates::light_dispatch(&light_indices, false)),
        );

        self.entries = vec![
            KernelEntry::HitAndNormals,
            KernelEntry::Ao,
            KernelEntry::Shadow,
            KernelEntry::Material,
        ];
    }

    /// Body of a scene-wide render component, or the built-in default
    fn render_body(&mut self, component: Option<&Component>, default: &str) -> String {
        match component {
            Some(component) => self.resolve(component).unwrap_or_default(),
            None => default.to_string(),
        }
    }

    /// Resolve a component, emitting its globals once per instance
    pub(crate) fn resolve(&mut self, component: &Component) -> Option<String> {
        match self
            .resolver
            .resolve(component, &mut self.properties, &mut self.textures)
        {
            Ok(fragment) => {
                if self.globals_added_for.insert(component.id) && !fragment.globals.is_empty() {
                    self.sections.push(Section::Header, &fragment.globals);
                    self.sections.push(Section::Header, "\n");
                }
                Some(fragment.code)
            }
            Err(e) => {
                self.diagnostics.push(e);
                None
            }
        }
    }

    /// Section the shape code of the current target goes to
    pub(crate) fn shape_section(&self) -> Section {
        match self.stage_type {
            StageType::Sdf3d => Section::Map,
            StageType::Sdf2d => Section::HitAndNormals,
        }
    }

    fn hierarchy(&self) -> Vec<StageItemId> {
        self.frames.iter().map(|frame| frame.item.id).collect()
    }

    /// Descend into a stage item
    pub fn push_stage_item(&mut self, item: &'a StageItem) {
        self.frames.push(Frame {
            item,
            pushed_material: false,
            saved_transform: None,
        });
        if self.frames.len() == 1 {
            self.root = Some(item.id);
            if self.label.is_empty() {
                self.label.clone_from(&item.name);
            }
        }

        let terrain = self.ground.and(self.scene.terrain.as_ref());
        if let (Some(terrain), 1) = (terrain, self.frames.len()) {
            if self.stage_type == StageType::Sdf3d {
                self.emit_terrain(terrain, item);
                return;
            }
        }

        if let Some(slot) = &item.material {
            let id = self.materials.push(item.id);
            if let Some(frame) = self.frames.last_mut() {
                frame.pushed_material = true;
            }
            if self.stage_type == StageType::Sdf3d {
                self.emit_material(id, item, slot);
            }
        }

        if let Some(transform) = &item.transform {
            if self.stage_type == StageType::Sdf3d {
                let index = self.transform_saves;
                self.transform_saves += 1;
                self.sections.push(Section::Map, &templates::save_transform(index));
                if let Some(frame) = self.frames.last_mut() {
                    frame.saved_transform = Some(index);
                }
            }
            self.emit_transform(transform);
        }
    }

    fn emit_transform(&mut self, transform: &Component) {
        let px = self.properties.collect_transform(transform, "_posX");
        let py = self.properties.collect_transform(transform, "_posY");
        let pz = self.properties.collect_transform(transform, "_posZ");
        let scale = self.properties.collect_transform(transform, "_scale");
        let code = if self.frames.len() == 1 {
            let modifier = instantiation_modifier(transform, "_scaleRandom");
            format!(
                "    object_position = vec3<f32>(data[{px}].x, data[{py}].x, data[{pz}].x) / scale;\n    scale = data[{scale}].x{modifier};\n    origin = origin_backup / scale;\n"
            )
        } else {
            format!(
                "    object_position += vec3<f32>(data[{px}].x, data[{py}].x, data[{pz}].x) / scale;\n    scale *= data[{scale}].x;\n    origin = origin_backup / scale;\n"
            )
        };
        if self.stage_type == StageType::Sdf3d {
            self.sections.push(Section::Map, &code);
        }

        if self.frames.len() == 1 {
            let extent = [
                self.properties.collect_transform(transform, "_bb_x"),
                self.properties.collect_transform(transform, "_bb_y"),
                self.properties.collect_transform(transform, "_bb_z"),
            ];
            self.bounding_box = Some(templates::bounding_box_code([px, py, pz], extent));
        }
    }

    fn emit_material(&mut self, id: u32, item: &StageItem, slot: &rz_core::stage::MaterialSlot) {
        for pattern in &slot.patterns {
            self.resolve(pattern);
        }

        let mut code = templates::material_function_prologue(id);
        if let Some(transform) = &item.transform {
            let px = self.properties.collect_transform(transform, "_posX");
            let py = self.properties.collect_transform(transform, "_posY");
            let pz = self.properties.collect_transform(transform, "_posZ");
            code.push_str(&format!(
                "    local_position = translate3(hit_position, vec3<f32>(data[{px}].x, data[{py}].x, data[{pz}].x));\n"
            ));
            for (axis, helper) in [("X", "rotate_yz"), ("Y", "rotate_xz"), ("Z", "rotate_xy")] {
                let rotate = self
                    .properties
                    .collect_transform(transform, &format!("_rotate{axis}"));
                let modifier = instantiation_modifier(transform, &format!("_rotateRandom{axis}"));
                code.push_str(&format!(
                    "    local_position = {helper}(local_position, radians(data[{rotate}].x{modifier}), vec3<f32>(0.0));\n"
                ));
            }
        }

        let uv_code = self.uv_body(slot.uv_map.as_ref());
        code.push_str(&templates::material_uv_block(&uv_code));
        let body = self.resolve(&slot.material).unwrap_or_default();
        code.push_str(&templates::material_function_body(&body));
        self.sections.push(Section::MaterialFunctions, &code);
        self.sections
            .push(Section::Material, &templates::material_dispatch(id));

        let bump = match slot.material.bump_connection() {
            Some(conn) => format!(
                "    {{\n        let position = origin;\n        let normal = vec3<f32>(0.0);\n        var out_uv = vec2<f32>(0.0);\n{uv_code}\n        var pattern: PatternOut;\n        {function}(out_uv, position, normal, vec3<f32>(0.0), &pattern, fd);\n        bump = pattern.{terminal} * 0.02;\n    }}\n",
                function = conn.function,
                terminal = conn.terminal
            ),
            None => "    bump = 0.0;\n".to_string(),
        };
        self.sections.push(Section::Map, &bump);
    }

    /// UV mapping body of a material slot
    pub(crate) fn uv_body(&mut self, uv_map: Option<&Component>) -> String {
        let scene = self.scene;
        match uv_map.or(scene.render.uv_map.as_ref()) {
            Some(component) => self.resolve(component).unwrap_or_default(),
            None => defaults::UV_MAP.to_string(),
        }
    }

    /// Emit one shape, consuming exactly one shape id
    pub fn push_component(&mut self, component: &Component) {
        let hierarchy = self.hierarchy();
        let id = self.ids.allocate(&hierarchy, component.id);
        let material = self.materials.current();
        trace!(id, material, name = %component.name, "Pushing component");

        let Some(body) = self.resolve(component) else {
            return;
        };
        let code = match self.stage_type {
            StageType::Sdf2d => self.shape_block_2d(component, &body),
            StageType::Sdf3d => self.shape_block_3d(component, &body),
        };
        let combine = self.combinator(component, material, id);
        let section = self.shape_section();
        self.sections.push(section, &code);
        self.sections.push(section, &combine);
    }

    fn shape_block_2d(&mut self, component: &Component, body: &str) -> String {
        let px = self.properties.collect_transform(component, "_posX");
        let py = self.properties.collect_transform(component, "_posY");
        let rotate = self.properties.collect_transform(component, "_rotate");
        format!(
            r#"    {{
        var position = translate2(origin / 80.0, vec2<f32>(data[{px}].x / 80.0, -data[{py}].x / 80.0));
        position = rotate2(position, radians(360.0 - data[{rotate}].x));
{body}
        out_distance *= 80.0;
"#
        )
    }

    fn shape_block_3d(&mut self, component: &Component, body: &str) -> String {
        let px = self.properties.collect_transform(component, "_posX");
        let py = self.properties.collect_transform(component, "_posY");
        let pz = self.properties.collect_transform(component, "_posZ");
        let mut rotates = Vec::new();
        let mut code = format!(
            r#"    {{
        let original_position = vec3<f32>(data[{px}].x, data[{py}].x, data[{pz}].x);
        var position = translate3(origin, original_position);
        let pivot = object_position - original_position;
"#
        );
        for (axis, helper) in [("X", "rotate_yz"), ("Y", "rotate_xz"), ("Z", "rotate_xy")] {
            let slot = self
                .properties
                .collect_transform(component, &format!("_rotate{axis}"));
            rotates.push((slot, helper));
            let modifier = instantiation_modifier(component, &format!("_rotateRandom{axis}"));
            code.push_str(&format!(
                "        position = {helper}(position, radians(data[{slot}].x{modifier}), pivot);\n"
            ));
        }

        let item = self.frames.last().map(|frame| frame.item);
        if let Some(item) = item {
            for domain in &item.domains {
                let domain_code = self.resolve(domain).unwrap_or_default();
                code.push_str(&format!(
                    "        {{\n            var out_position = position;\n{domain_code}\n            position = out_position;\n        }}\n"
                ));
            }
        }

        if component.component_type == ComponentType::Sdf2d {
            let extrusion = self.properties.collect_transform(component, "_extrusion");
            let revolution = self.properties.collect_transform(component, "_revolution");
            let rounding = self.properties.collect_transform(component, "_rounding");
            code.push_str(&format!(
                r#"        {{
            let original_pos = position;
            var position = original_pos.xy;
            if (data[{revolution}].x > 0.0) {{
                position = vec2<f32>(length(original_pos.xz) - data[{revolution}].x, original_pos.y);
            }}
{body}
            (*fd).distance_2d = out_distance;
            if (data[{revolution}].x == 0.0) {{
                let w = vec2<f32>(out_distance, abs(original_pos.z) - data[{extrusion}].x);
                out_distance = min(max(w.x, w.y), 0.0) + length(max(w, vec2<f32>(0.0))) - data[{rounding}].x;
            }}
        }}
"#
            ));
        } else {
            code.push_str(body);
            code.push('\n');
        }

        if let Some(item) = item {
            if !item.modifiers.is_empty() {
                code.push_str(
                    "        {\n            var offset_from_center = origin - original_position;\n",
                );
                for (slot, helper) in &rotates {
                    code.push_str(&format!(
                        "            offset_from_center = {helper}(offset_from_center, radians(data[{slot}].x), vec3<f32>(0.0));\n"
                    ));
                }
                code.push_str("            var shape_distance = out_distance;\n");
                for modifier in &item.modifiers {
                    let modifier_code = self.resolve(modifier).unwrap_or_default();
                    code.push_str(&modifier_code);
                    code.push_str("\n            shape_distance = out_distance;\n");
                }
                code.push_str("        }\n");
            }
        }
        code
    }

    /// Merge the shape into the running result and close its block
    fn combinator(&mut self, component: &Component, material: u32, id: u32) -> String {
        let mut code = format!(
            "        let shape_a = out_shape;\n        let shape_b = vec4<f32>((out_distance - bump) * scale, -1.0, {material}.0, {id}.0);\n"
        );
        let custom = component
            .sub_component
            .as_deref()
            .and_then(|combinator| self.resolve(combinator));
        match custom {
            Some(body) => code.push_str(&body),
            None => code.push_str("        if (shape_b.x < shape_a.x) {\n            out_shape = shape_b;\n        }\n"),
        }
        code.push_str("\n    }\n");
        code
    }

    /// Leave the top stage item
    ///
    /// # Panics
    ///
    /// Panics when `item` is not the top of the hierarchy, or when its
    /// material has already been popped.
    pub fn pull_stage_item(&mut self, item: &StageItem) {
        let frame = self.frames.pop();
        assert!(
            frame.is_some_and(|frame| frame.item.id == item.id),
            "pull of '{}' does not match the hierarchy top",
            item.name
        );
        if frame.is_some_and(|frame| frame.pushed_material) {
            self.materials.pop();
        }
        // Siblings see the transform state of the parent again
        if let Some(index) = frame.and_then(|frame| frame.saved_transform) {
            self.sections.push(Section::Map, &templates::restore_transform(index));
        }
    }

    /// Push an item, its shapes and its children, then pull it
    pub fn stream_item(&mut self, item: &'a StageItem) {
        self.push_stage_item(item);
        for shape in &item.shapes {
            self.push_component(shape);
        }
        for child in &item.children {
            self.stream_item(child);
        }
        self.pull_stage_item(item);
    }

    /// Material id active for the next component
    pub fn current_material(&self) -> u32 {
        self.materials.current()
    }

    /// Number of stage items currently pushed
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Concatenate the sections and apply every substitution
    pub fn finish(&mut self) -> CompiledInstance {
        match self.stage_type {
            StageType::Sdf3d => {
                self.sections.push(Section::Map, templates::MAP_EPILOGUE);
                self.sections.push(
                    Section::HitAndNormals,
                    &templates::hit_and_normals_epilogue(self.normal_open),
                );
                self.sections
                    .push(Section::Material, templates::MATERIAL_EPILOGUE);
            }
            StageType::Sdf2d => {
                self.sections
                    .push(Section::HitAndNormals, templates::HIT_2D_EPILOGUE);
            }
        }

        let mut subs = std::mem::take(&mut self.substitutions);
        // The ground takes the id after every pushed component
        if let (Some(ground), StageType::Sdf3d) = (self.ground, self.stage_type) {
            let hierarchy: Vec<_> = self.root.into_iter().collect();
            let ground_id = self.ids.allocate(&hierarchy, ground.id);
            subs.insert(templates::GROUND_ID_TOKEN, ground_id.to_string());
        }
        subs.insert(templates::TEXTURE_HEADER_TOKEN, self.textures.header_code());
        subs.insert(
            templates::AFTER_TEXTURE_OFFSET_TOKEN,
            self.textures.after_offset().to_string(),
        );
        subs.insert(
            templates::TEXTURE_DEFINITIONS_TOKEN,
            self.textures.definitions_code(),
        );
        subs.insert(
            templates::BOUNDING_BOX_TOKEN,
            self.bounding_box
                .take()
                .unwrap_or_else(|| templates::NO_BOUNDING_BOX.to_string()),
        );
        subs.insert(templates::DENSITY_TOKEN, std::mem::take(&mut self.density_code));
        for entry in &self.entries {
            subs.insert(&format!("{}_FUNCDATA", entry.token()), templates::funcdata_code(*entry));
        }

        let mut source = subs.apply(&self.sections.assemble());
        let mut leftover = Substitutions::new();
        for token in unresolved_tokens(&source) {
            let name = token.trim_matches('_');
            if name.starts_with("BUMP_CODE_") {
                leftover.insert(name, "");
            }
        }
        source = leftover.apply(&source);

        let remaining = unresolved_tokens(&source);
        if !remaining.is_empty() {
            self.diagnostics.push(ShaderError::UnresolvedTokens {
                label: self.label.clone(),
                tokens: remaining,
            });
        }
        if !self.frames.is_empty() {
            self.diagnostics.push(ShaderError::InvalidHierarchy(format!(
                "{} stage items still pushed at close",
                self.frames.len()
            )));
        }
        self.open = false;

        let label = if self.label.is_empty() {
            "object".to_string()
        } else {
            self.label.clone()
        };
        debug!(
            label = %label,
            ids = self.ids.entries().len(),
            slots = self.properties.len(),
            textures = self.textures.len(),
            "Closed stream"
        );

        CompiledInstance {
            label,
            stage_type: self.stage_type,
            source,
            entries: self.entries.clone(),
            properties: std::mem::take(&mut self.properties),
            textures: std::mem::take(&mut self.textures),
            ids: self.ids.entries().clone(),
            materials: self.materials.owners().clone(),
            id_start: self.ids.start(),
            id_end: self.ids.next_id().max(self.materials.next_id()),
            root: self.root,
            diagnostics: std::mem::take(&mut self.diagnostics),
            pipeline: None,
        }
    }

    /// Finish the instance and hand it to the backend
    pub fn close_stream(&mut self, backend: &Arc<dyn ShaderBackend>, mode: Submit) -> CompileSlot {
        submit(self.finish(), backend, mode)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// ` + v * (hash - 0.5)` for a non-zero random modifier value
pub(crate) fn instantiation_modifier(component: &Component, name: &str) -> String {
    match component.value(name) {
        Some(value) if value != 0.0 => format!(" + {value:?} * ((*fd).hash - 0.5)"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::PlaceholderResolver;
    use rz_core::camera::Camera;
    use rz_core::stage::MaterialSlot;

    fn sphere(radius: f32) -> Component {
        Component::new("sphere", ComponentType::Sdf3d)
            .with_value("radius", radius)
            .with_code("        out_distance = length(position) - ${radius}.x;")
    }

    fn material(name: &str) -> MaterialSlot {
        MaterialSlot::new(
            Component::new(name, ComponentType::Material3d)
                .with_value("color", [1.0, 0.0, 0.0])
                .with_code("        out_color = ${color};"),
        )
    }

    fn scene() -> Scene {
        Scene::new(Camera::default().to_component())
    }

    #[test]
    fn test_ids_follow_push_order() {
        let scene = scene();
        let item = StageItem::new("root")
            .with_shape(sphere(1.0))
            .with_shape(sphere(2.0))
            .with_shape(sphere(3.0));
        let mut stream = SdfStream::new(&PlaceholderResolver, &scene, 0);
        stream.open_stream(StageType::Sdf3d, 0, &scene.camera, None, None);
        stream.push_stage_item(&item);
        for shape in &item.shapes {
            stream.push_component(shape);
        }
        stream.pull_stage_item(&item);
        let instance = stream.finish();

        assert_eq!(instance.ids.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        for (id, shape) in instance.ids.values().zip(&item.shapes) {
            assert_eq!(id.hierarchy, vec![item.id]);
            assert_eq!(id.component, shape.id);
        }
        assert!(instance.diagnostics.is_empty(), "{:?}", instance.diagnostics);
        assert!(unresolved_tokens(&instance.source).is_empty());
    }

    #[test]
    fn test_material_restored_after_pull() {
        let scene = scene();
        let child = StageItem::new("child")
            .with_material(material("blue"))
            .with_shape(sphere(0.5));
        let root = StageItem::new("root")
            .with_material(material("red"))
            .with_child(child);
        let mut stream = SdfStream::new(&PlaceholderResolver, &scene, 0);
        stream.open_stream(StageType::Sdf3d, 4, &scene.camera, None, None);
        assert_eq!(stream.current_material(), 4);
        stream.push_stage_item(&root);
        let outer = stream.current_material();
        stream.push_stage_item(&root.children[0]);
        assert_eq!(stream.current_material(), 5);
        stream.push_component(&root.children[0].shapes[0]);
        stream.pull_stage_item(&root.children[0]);
        assert_eq!(stream.current_material(), outer);
        stream.pull_stage_item(&root);
        assert_eq!(stream.current_material(), 4);

        let instance = stream.finish();
        assert!(instance.source.contains("fn material4("));
        assert!(instance.source.contains("fn material5("));
        assert!(instance.source.contains("shape.z > 5.0 - 0.5"));
        assert!(instance.source.contains("-1.0, 5.0, 4.0)"));
    }

    #[test]
    #[should_panic(expected = "does not match the hierarchy top")]
    fn test_pull_of_wrong_item_panics() {
        let scene = scene();
        let a = StageItem::new("a");
        let b = StageItem::new("b");
        let mut stream = SdfStream::new(&PlaceholderResolver, &scene, 0);
        stream.open_stream(StageType::Sdf3d, 0, &scene.camera, None, None);
        stream.push_stage_item(&a);
        stream.pull_stage_item(&b);
    }

    #[test]
    fn test_globals_emitted_once() {
        let scene = scene();
        let shape = sphere(1.0).with_globals("fn helper_once() -> f32 { return 1.0; }");
        let item = StageItem::new("root").with_shape(shape.clone());
        let mut stream = SdfStream::new(&PlaceholderResolver, &scene, 0);
        stream.open_stream(StageType::Sdf3d, 0, &scene.camera, None, None);
        stream.push_stage_item(&item);
        stream.push_component(&shape);
        stream.push_component(&shape);
        stream.pull_stage_item(&item);
        let instance = stream.finish();
        assert_eq!(instance.source.matches("fn helper_once").count(), 1);
        assert_eq!(instance.id_end, 2);
    }

    #[test]
    fn test_domains_and_modifiers_apply_per_item() {
        let scene = scene();
        let twist = Component::new("twist", ComponentType::Domain3d)
            .with_code("            out_position = position * 2.0;");
        let onion = Component::new("onion", ComponentType::Modifier3d)
            .with_code("            out_distance = abs(shape_distance) - 0.1;");
        let item = StageItem::new("root")
            .with_domain(twist)
            .with_modifier(onion)
            .with_shape(sphere(1.0))
            .with_shape(sphere(2.0));
        let mut stream = SdfStream::new(&PlaceholderResolver, &scene, 0);
        stream.open_stream(StageType::Sdf3d, 0, &scene.camera, None, None);
        stream.push_stage_item(&item);
        for shape in &item.shapes {
            stream.push_component(shape);
        }
        stream.pull_stage_item(&item);
        let instance = stream.finish();
        assert_eq!(instance.source.matches("out_position = position * 2.0").count(), 2);
        assert_eq!(instance.source.matches("abs(shape_distance) - 0.1").count(), 2);
    }

    #[test]
    fn test_root_transform_emits_bounding_box() {
        let scene = scene();
        let item = StageItem::new("root")
            .with_transform(
                Component::new("transform", ComponentType::Transform3d)
                    .with_value("_scale", 2.0)
                    .with_value("_scaleRandom", 0.5),
            )
            .with_shape(sphere(1.0));
        let mut stream = SdfStream::new(&PlaceholderResolver, &scene, 0);
        stream.open_stream(StageType::Sdf3d, 0, &scene.camera, None, None);
        stream.push_stage_item(&item);
        stream.push_component(&item.shapes[0]);
        stream.pull_stage_item(&item);
        let instance = stream.finish();
        assert!(instance.source.contains("hit_bbox(ray_origin"));
        assert!(instance.source.contains(" + 0.5 * ((*fd).hash - 0.5)"));
        assert!(instance.source.contains("origin = origin_backup / scale;"));
    }

    #[test]
    fn test_nested_transform_does_not_reach_siblings() {
        let scene = scene();
        let scaled = StageItem::new("a")
            .with_transform(Component::new("transform", ComponentType::Transform3d).with_value("_scale", 2.0))
            .with_shape(Component::new("inner", ComponentType::Sdf3d).with_code("        out_distance = 0.25;"));
        let plain = StageItem::new("b")
            .with_shape(Component::new("outer", ComponentType::Sdf3d).with_code("        out_distance = 0.75;"));
        let root = StageItem::new("root").with_child(scaled).with_child(plain);
        let mut stream = SdfStream::new(&PlaceholderResolver, &scene, 0);
        stream.open_stream(StageType::Sdf3d, 0, &scene.camera, None, None);
        stream.stream_item(&root);
        let instance = stream.finish();

        let source = &instance.source;
        let save = source.find("let saved_scale_0 = scale;").unwrap();
        let scale = source.find("scale *= data[").unwrap();
        let inner = source.find("out_distance = 0.25;").unwrap();
        let restore = source.find("scale = saved_scale_0;").unwrap();
        let outer = source.find("out_distance = 0.75;").unwrap();
        assert!(save < scale && scale < inner && inner < restore && restore < outer);
        assert!(source.contains("object_position = saved_position_0;"));
        assert!(source.contains("origin = saved_origin_0;"));
        // Only the transformed item saves state
        assert_eq!(source.matches("let saved_scale_").count(), 1);
        assert!(instance.diagnostics.is_empty(), "{:?}", instance.diagnostics);
    }

    #[test]
    fn test_no_transform_keeps_open_box() {
        let scene = scene();
        let item = StageItem::new("root").with_shape(sphere(1.0));
        let mut stream = SdfStream::new(&PlaceholderResolver, &scene, 0);
        stream.open_stream(StageType::Sdf3d, 0, &scene.camera, None, None);
        stream.push_stage_item(&item);
        stream.push_component(&item.shapes[0]);
        stream.pull_stage_item(&item);
        let instance = stream.finish();
        assert!(instance.source.contains("    if (true) {\n"));
    }

    #[test]
    fn test_bad_component_is_a_diagnostic() {
        let scene = scene();
        let broken = Component::new("broken", ComponentType::Sdf3d).with_code("${missing}");
        let item = StageItem::new("root").with_shape(broken);
        let mut stream = SdfStream::new(&PlaceholderResolver, &scene, 0);
        stream.open_stream(StageType::Sdf3d, 0, &scene.camera, None, None);
        stream.push_stage_item(&item);
        stream.push_component(&item.shapes[0]);
        stream.pull_stage_item(&item);
        let instance = stream.finish();
        assert_eq!(instance.diagnostics.len(), 1);
        assert_eq!(instance.ids.len(), 1);
    }

    #[test]
    fn test_2d_stream_scales_distance() {
        let scene = scene();
        let circle = Component::new("circle", ComponentType::Sdf2d)
            .with_value("radius", 20.0)
            .with_code("        out_distance = length(position) - ${radius}.x / 80.0;");
        let item = StageItem::new("root").with_shape(circle);
        let mut stream = SdfStream::new(&PlaceholderResolver, &scene, 0);
        stream.open_stream(StageType::Sdf2d, 0, &scene.camera, None, None);
        stream.push_stage_item(&item);
        stream.push_component(&item.shapes[0]);
        stream.pull_stage_item(&item);
        let instance = stream.finish();
        assert_eq!(instance.entries, vec![KernelEntry::HitAndNormals]);
        assert!(instance.source.contains("out_distance *= 80.0;"));
        assert!(!instance.source.contains("fn scene_map"));
        assert!(instance.diagnostics.is_empty(), "{:?}", instance.diagnostics);
    }

    #[test]
    fn test_2d_target_ignores_3d_camera() {
        let scene = scene();
        let item = StageItem::new("root").with_shape(
            Component::new("circle", ComponentType::Sdf2d).with_code("        out_distance = length(position) - 0.5;"),
        );
        let mut stream = SdfStream::new(&PlaceholderResolver, &scene, 0);
        stream.open_stream(StageType::Sdf2d, 0, &scene.camera, None, None);
        stream.stream_item(&item);
        let instance = stream.finish();
        assert!(!instance.source.contains("out_direction"));
        assert!(instance.source.contains("var out_position = origin;\n\n        origin = out_position;"));
        assert!(instance.diagnostics.is_empty(), "{:?}", instance.diagnostics);
    }

    #[test]
    fn test_2d_target_resolves_2d_camera() {
        let scene = scene();
        let camera = Component::new("pan", ComponentType::Transform2d)
            .with_value("offset", [4.0, 2.0, 0.0])
            .with_code("        out_position = position + ${offset}.xy;");
        let item = StageItem::new("root");
        let mut stream = SdfStream::new(&PlaceholderResolver, &scene, 0);
        stream.open_stream(StageType::Sdf2d, 0, &camera, None, None);
        stream.stream_item(&item);
        let instance = stream.finish();
        assert!(instance.source.contains("out_position = position + data[0].xy;"));
    }
}
