//! Stage machine behavior, driven through the recording backend

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use rz_core::prelude::*;
use rz_render::{
    BackendError, BufferId, OutputType, Pipeline3D, RecordedOp, RecordingBackend,
    RecordingCompiler, RenderSettings, RenderStatus, Stage, Step, UtilityOp,
};
use rz_sdf::{
    CodeBuilder, CompileContext, CompiledInstance, KernelEntry, KernelHandle, PlaceholderResolver,
    ShaderBackend, ShaderError, Submit,
};

struct SlowCompiler;

impl ShaderBackend for SlowCompiler {
    fn compile(&self, _instance: &CompiledInstance) -> std::result::Result<KernelHandle, ShaderError> {
        std::thread::sleep(Duration::from_millis(20));
        Ok(KernelHandle(7))
    }
}

fn ball(name: &str) -> StageItem {
    StageItem::new(name).with_shape(
        Component::new("sphere", ComponentType::Sdf3d)
            .with_value("radius", 0.5)
            .with_code("        out_distance = length(position) - ${radius}.x;"),
    )
}

fn scene() -> Scene {
    Scene::new(Camera::default().to_component()).with_object(ball("ball"))
}

fn built(scene: &Scene, compiler: Arc<dyn ShaderBackend>) -> Pipeline3D {
    let mut builder = CodeBuilder::new(CompileContext::new(Arc::new(PlaceholderResolver), compiler));
    let mut pipeline = Pipeline3D::new();
    pipeline.build(&mut builder, scene).unwrap();
    pipeline
}

/// Step until the render is done
fn drive(pipeline: &mut Pipeline3D, backend: &mut RecordingBackend, generation: u64) -> Step {
    for _ in 0..10_000 {
        let step = pipeline.step(backend, generation);
        if step.is_done() {
            return step;
        }
        if step == Step::Waiting {
            std::thread::sleep(Duration::from_millis(2));
        }
    }
    panic!("render did not finish");
}

fn counter() -> (Arc<AtomicU32>, impl FnOnce(image::Rgba32FImage) + Send + 'static) {
    let calls = Arc::new(AtomicU32::new(0));
    let inner = Arc::clone(&calls);
    (calls, move |_| {
        inner.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn two_bounces_run_hit_and_normals_twice() {
    let mut pipeline = built(&scene(), Arc::new(RecordingCompiler::new()));
    let mut backend = RecordingBackend::new();
    let (calls, on_finished) = counter();
    let settings = RenderSettings::new()
        .with_reflections(2)
        .with_samples(1)
        .on_finished(on_finished);

    let status = pipeline.render(16, 16, settings).unwrap();
    let generation = status.generation().unwrap();
    assert_eq!(drive(&mut pipeline, &mut backend, generation), Step::Finished);

    assert_eq!(
        backend.entries(),
        vec![
            KernelEntry::Camera,
            KernelEntry::Background,
            KernelEntry::HitAndNormals,
            KernelEntry::Ao,
            KernelEntry::Shadow,
            KernelEntry::Material,
            KernelEntry::HitAndNormals,
            KernelEntry::Ao,
            KernelEntry::Shadow,
            KernelEntry::Material,
        ]
    );
    let bounces: Vec<_> = backend
        .ops()
        .iter()
        .filter_map(|op| match op {
            RecordedOp::Dispatch {
                entry: KernelEntry::HitAndNormals,
                reflection,
                ..
            } => Some(*reflection),
            _ => None,
        })
        .collect();
    assert_eq!(bounces, vec![0, 1]);
    assert_eq!(backend.utilities(UtilityOp::Reflect), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.stage(), Stage::Finished);
}

#[test]
fn chunks_and_samples_report_progress() {
    let mut pipeline = built(&scene(), Arc::new(RecordingCompiler::new())).with_chunk_rows(50);
    let mut backend = RecordingBackend::new();
    let progress = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&progress);
    let settings = RenderSettings::new()
        .with_reflections(1)
        .with_samples(2)
        .on_progress(move |done, total| log.lock().push((done, total)));

    let generation = pipeline.render(8, 120, settings).unwrap().generation().unwrap();
    assert_eq!(drive(&mut pipeline, &mut backend, generation), Step::Finished);

    assert_eq!(
        *progress.lock(),
        vec![(1, 6), (2, 6), (3, 6), (4, 6), (5, 6), (6, 6)]
    );
    assert_eq!(backend.dispatches(KernelEntry::Camera), 2);
    assert_eq!(backend.dispatches(KernelEntry::HitAndNormals), 6);
    assert_eq!(backend.utilities(UtilityOp::Accumulate), 2);
    assert_eq!(backend.utilities(UtilityOp::CopyGamma), 1);

    let chunk_starts: Vec<_> = backend
        .ops()
        .iter()
        .filter_map(|op| match op {
            RecordedOp::Dispatch {
                entry: KernelEntry::HitAndNormals,
                line_start,
                sample,
                ..
            } => Some((*line_start, *sample)),
            _ => None,
        })
        .collect();
    assert_eq!(
        chunk_starts,
        vec![(0, 1), (50, 1), (100, 1), (0, 2), (50, 2), (100, 2)]
    );
}

#[test]
fn finished_image_is_delivered_once() {
    let mut pipeline = built(&scene(), Arc::new(RecordingCompiler::new()));
    let mut backend = RecordingBackend::new().with_fill([0.25, 0.5, 0.75, 1.0]);
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    let settings = RenderSettings::new().on_finished(move |image| sink.lock().push(image));

    let generation = pipeline.render(4, 3, settings).unwrap().generation().unwrap();
    assert_eq!(drive(&mut pipeline, &mut backend, generation), Step::Finished);
    assert_eq!(pipeline.step(&mut backend, generation), Step::Idle);

    let delivered = delivered.lock();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].dimensions(), (4, 3));
    assert_eq!(delivered[0].get_pixel(3, 2).0, [0.25, 0.5, 0.75, 1.0]);
}

#[test]
fn cancel_suppresses_the_callback() {
    let mut pipeline = built(&scene(), Arc::new(RecordingCompiler::new()));
    let mut backend = RecordingBackend::new();
    let (calls, on_finished) = counter();

    let generation = pipeline
        .render(8, 8, RenderSettings::new().on_finished(on_finished))
        .unwrap()
        .generation()
        .unwrap();
    assert_eq!(pipeline.step(&mut backend, generation), Step::Continue);

    pipeline.cancel_handle().cancel();
    assert_eq!(pipeline.step(&mut backend, generation), Step::Abandoned);
    assert_eq!(pipeline.step(&mut backend, generation), Step::Abandoned);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.stage(), Stage::Compiled);
}

#[test]
fn newer_render_supersedes_older() {
    let mut pipeline = built(&scene(), Arc::new(RecordingCompiler::new()));
    let mut backend = RecordingBackend::new();
    let (old_calls, old_finished) = counter();
    let (new_calls, new_finished) = counter();

    let old = pipeline
        .render(8, 8, RenderSettings::new().on_finished(old_finished))
        .unwrap()
        .generation()
        .unwrap();
    pipeline.step(&mut backend, old);
    let new = pipeline
        .render(8, 8, RenderSettings::new().on_finished(new_finished))
        .unwrap()
        .generation()
        .unwrap();
    assert!(new > old);

    assert_eq!(pipeline.step(&mut backend, old), Step::Abandoned);
    assert_eq!(drive(&mut pipeline, &mut backend, new), Step::Finished);
    assert_eq!(old_calls.load(Ordering::SeqCst), 0);
    assert_eq!(new_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn compile_failure_delivers_a_diagnostic_frame() {
    let compiler = RecordingCompiler::new().failing_on("ball");
    let mut pipeline = built(&scene(), Arc::new(compiler));
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);

    let status = pipeline
        .render(2, 2, RenderSettings::new().on_finished(move |image| sink.lock().push(image)))
        .unwrap();
    assert_eq!(status, RenderStatus::Failed(vec!["ball".to_string()]));
    assert_eq!(pipeline.stage(), Stage::Finished);

    let delivered = delivered.lock();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].get_pixel(1, 1).0, [1.0, 0.0, 0.0, 1.0]);
}

#[test]
fn still_compiling_waits_instead_of_failing() {
    let scene = scene();
    let context = CompileContext::new(Arc::new(PlaceholderResolver), Arc::new(SlowCompiler))
        .with_submit(Submit::Async);
    let mut builder = CodeBuilder::new(context);
    let mut pipeline = Pipeline3D::new();
    pipeline.build(&mut builder, &scene).unwrap();
    let mut backend = RecordingBackend::new();
    let (calls, on_finished) = counter();

    let status = pipeline
        .render(4, 4, RenderSettings::new().on_finished(on_finished))
        .unwrap();
    let RenderStatus::Compiling(generation) = status else {
        panic!("expected a pending render, got {status:?}");
    };
    assert_eq!(pipeline.step(&mut backend, generation), Step::Waiting);
    assert!(backend.ops().is_empty());

    assert_eq!(drive(&mut pipeline, &mut backend, generation), Step::Finished);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn minimal_preview_skips_shading() {
    let mut pipeline = built(&scene(), Arc::new(RecordingCompiler::new()));
    pipeline.set_minimal_preview(true);
    let mut backend = RecordingBackend::new();
    let settings = RenderSettings::new().with_reflections(3).with_samples(4);

    let generation = pipeline.render(8, 8, settings).unwrap().generation().unwrap();
    assert_eq!(drive(&mut pipeline, &mut backend, generation), Step::Finished);

    assert_eq!(
        backend.entries(),
        vec![KernelEntry::Camera, KernelEntry::Background, KernelEntry::HitAndNormals]
    );
    assert_eq!(backend.utilities(UtilityOp::Preview), 1);
    assert_eq!(backend.utilities(UtilityOp::CopyGamma), 1);
    assert_eq!(backend.utilities(UtilityOp::Accumulate), 0);
}

#[test]
fn auxiliary_outputs_stop_after_their_stage() {
    let cases = [
        (OutputType::DepthMap, UtilityOp::DepthView, KernelEntry::HitAndNormals),
        (OutputType::Ao, UtilityOp::AoView, KernelEntry::Ao),
        (OutputType::Shadows, UtilityOp::ShadowView, KernelEntry::Shadow),
        (OutputType::FogDensity, UtilityOp::DensityView, KernelEntry::Shadow),
    ];
    for (output, view, last_entry) in cases {
        let mut pipeline = built(&scene(), Arc::new(RecordingCompiler::new()));
        let mut backend = RecordingBackend::new();
        let settings = RenderSettings::new()
            .with_output(output)
            .with_reflections(3)
            .with_samples(2);
        let generation = pipeline.render(8, 8, settings).unwrap().generation().unwrap();
        assert_eq!(drive(&mut pipeline, &mut backend, generation), Step::Finished);

        assert_eq!(backend.entries().last(), Some(&last_entry), "{output:?}");
        assert_eq!(backend.dispatches(KernelEntry::HitAndNormals), 1, "{output:?}");
        assert_eq!(backend.dispatches(KernelEntry::Material), 0, "{output:?}");
        assert_eq!(backend.utilities(view), 1, "{output:?}");
        assert_eq!(backend.utilities(UtilityOp::Reflect), 0, "{output:?}");
        assert_eq!(backend.utilities(UtilityOp::Copy), 1, "{output:?}");
    }
}

#[test]
fn disabled_objects_are_skipped() {
    let scene = Scene::new(Camera::default().to_component())
        .with_object(ball("visible"))
        .with_object(ball("hidden").disabled(true));
    let mut pipeline = built(&scene, Arc::new(RecordingCompiler::new()));
    let mut backend = RecordingBackend::new();

    let generation = pipeline
        .render(4, 4, RenderSettings::new().with_reflections(1))
        .unwrap()
        .generation()
        .unwrap();
    assert_eq!(drive(&mut pipeline, &mut backend, generation), Step::Finished);

    let labels: Vec<_> = backend
        .ops()
        .iter()
        .filter_map(|op| match op {
            RecordedOp::Dispatch {
                entry: KernelEntry::HitAndNormals,
                label,
                ..
            } => Some(label.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(labels, vec!["visible".to_string()]);
}

#[test]
fn every_light_gets_shadow_and_material_passes() {
    let scene = scene()
        .with_light(PointLight::new(Vec3::new(0.0, 4.0, 0.0), Vec3::ONE, 1.0))
        .with_light(PointLight::new(Vec3::new(2.0, 4.0, 0.0), Vec3::ONE, 1.0));
    let mut pipeline = built(&scene, Arc::new(RecordingCompiler::new()));
    let mut backend = RecordingBackend::new();

    let generation = pipeline
        .render(4, 4, RenderSettings::new().with_reflections(1))
        .unwrap()
        .generation()
        .unwrap();
    assert_eq!(drive(&mut pipeline, &mut backend, generation), Step::Finished);
    assert_eq!(backend.utilities(UtilityOp::ClearShadow), 3);
    assert_eq!(backend.dispatches(KernelEntry::Shadow), 3);
    assert_eq!(backend.dispatches(KernelEntry::Material), 3);
}

#[test]
fn idle_halves_are_released_after_a_render() {
    let mut pipeline = built(&scene(), Arc::new(RecordingCompiler::new()));
    let mut backend = RecordingBackend::new();
    let generation = pipeline
        .render(4, 4, RenderSettings::new().with_reflections(2))
        .unwrap()
        .generation()
        .unwrap();
    assert_eq!(drive(&mut pipeline, &mut backend, generation), Step::Finished);

    for (a, b) in [
        (BufferId::ShapeA, BufferId::ShapeB),
        (BufferId::MetaA, BufferId::MetaB),
        (BufferId::ReflColorA, BufferId::ReflColorB),
        (BufferId::ReflDirA, BufferId::ReflDirB),
    ] {
        assert!(
            backend.is_resident(a) != backend.is_resident(b),
            "{a:?} and {b:?} should have exactly one resident half"
        );
    }
    assert!(backend.is_resident(BufferId::Output));
}

#[test]
fn idle_halves_are_released_after_each_phase() {
    let mut pipeline = built(&scene(), Arc::new(RecordingCompiler::new()));
    let mut backend = RecordingBackend::new();
    let generation = pipeline
        .render(4, 4, RenderSettings::new().with_reflections(2).with_samples(1))
        .unwrap()
        .generation()
        .unwrap();
    assert_eq!(drive(&mut pipeline, &mut backend, generation), Step::Finished);

    let released = |pair: [BufferId; 2]| {
        backend
            .ops()
            .iter()
            .filter(|op| matches!(op, RecordedOp::Release(buffer) if pair.contains(buffer)))
            .count()
    };
    // Once per shadow phase and once per reflection, for both bounces
    assert_eq!(released([BufferId::MetaA, BufferId::MetaB]), 2);
    assert_eq!(released([BufferId::ReflDirA, BufferId::ReflDirB]), 2);
    assert_eq!(released([BufferId::ReflColorA, BufferId::ReflColorB]), 2);

    // Each release is followed by an ensure before the next bounce reads the pair
    let ops = backend.ops();
    let first_meta_release = ops
        .iter()
        .position(|op| matches!(op, RecordedOp::Release(BufferId::MetaA | BufferId::MetaB)))
        .unwrap();
    let second_hit = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| matches!(op, RecordedOp::Dispatch { entry: KernelEntry::HitAndNormals, .. }))
        .nth(1)
        .map(|(index, _)| index)
        .unwrap();
    assert!(ops[first_meta_release..second_hit]
        .iter()
        .any(|op| matches!(op, RecordedOp::Ensure(BufferId::MetaA | BufferId::MetaB))));
}

#[test]
fn ao_view_releases_the_idle_meta_half() {
    let mut pipeline = built(&scene(), Arc::new(RecordingCompiler::new()));
    let mut backend = RecordingBackend::new();
    let settings = RenderSettings::new().with_output(OutputType::Ao);
    let generation = pipeline.render(4, 4, settings).unwrap().generation().unwrap();
    assert_eq!(drive(&mut pipeline, &mut backend, generation), Step::Finished);
    assert!(backend.is_resident(BufferId::MetaA) != backend.is_resident(BufferId::MetaB));
    assert_eq!(backend.dispatches(KernelEntry::Shadow), 0);
}

#[test]
fn render_requires_a_build_and_pixels() {
    let mut pipeline = Pipeline3D::new();
    assert_eq!(
        pipeline.render(4, 4, RenderSettings::new()),
        Err(BackendError::NotBuilt)
    );
    let mut pipeline = built(&scene(), Arc::new(RecordingCompiler::new()));
    assert_eq!(
        pipeline.render(0, 4, RenderSettings::new()),
        Err(BackendError::InvalidSize { width: 0, height: 4 })
    );
}

#[test]
fn rebuild_cancels_the_running_render() {
    let scene = scene();
    let mut builder = CodeBuilder::new(CompileContext::new(
        Arc::new(PlaceholderResolver),
        Arc::new(RecordingCompiler::new()),
    ));
    let mut pipeline = Pipeline3D::new();
    pipeline.build(&mut builder, &scene).unwrap();
    let mut backend = RecordingBackend::new();
    let (calls, on_finished) = counter();

    let generation = pipeline
        .render(4, 4, RenderSettings::new().on_finished(on_finished))
        .unwrap()
        .generation()
        .unwrap();
    pipeline.step(&mut backend, generation);
    pipeline.build(&mut builder, &scene).unwrap();

    assert_eq!(pipeline.step(&mut backend, generation), Step::Abandoned);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.stage(), Stage::Compiled);
}
