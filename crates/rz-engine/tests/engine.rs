//! Engine renders through the recording backends

use std::sync::Arc;

use approx::assert_relative_eq;
use parking_lot::Mutex;

use rz_engine::{Engine, EngineConfig, Output, demo_scene};
use rz_render::{DIAGNOSTIC_COLOR, RecordingBackend, RecordingCompiler, UtilityOp};
use rz_sdf::KernelEntry;

const FILL: [f32; 4] = [0.25, 0.5, 0.75, 1.0];

fn config() -> EngineConfig {
    EngineConfig::new()
        .with_size(8, 120)
        .with_reflections(1)
        .with_async_compile(false)
}

fn engine(config: EngineConfig, compiler: Arc<RecordingCompiler>) -> Engine {
    let mut engine = Engine::new(config, compiler);
    engine.load_scene(demo_scene()).unwrap();
    engine
}

fn backend() -> Arc<Mutex<RecordingBackend>> {
    Arc::new(Mutex::new(RecordingBackend::new().with_fill(FILL)))
}

#[tokio::test]
async fn renders_the_demo_scene() {
    let engine = engine(config(), Arc::new(RecordingCompiler::new()));
    let backend = backend();

    let image = engine.render(Arc::clone(&backend)).await.unwrap();
    assert_eq!(image.dimensions(), (8, 120));
    let pixel = image.get_pixel(3, 70).0;
    for (got, want) in pixel.iter().zip(FILL) {
        assert_relative_eq!(*got, want);
    }

    let backend = backend.lock();
    let entries = backend.entries();
    assert_eq!(entries.first(), Some(&KernelEntry::Camera));
    // Three chunks of fifty rows, one bounce, three objects
    assert_eq!(backend.dispatches(KernelEntry::HitAndNormals), 9);
    assert_eq!(backend.utilities(UtilityOp::CopyGamma), 1);
}

#[tokio::test]
async fn reports_progress_per_chunk() {
    let engine = engine(config().with_samples(2), Arc::new(RecordingCompiler::new()));
    let mut reports = Vec::new();

    engine
        .render_with_progress(backend(), |done, total| reports.push((done, total)))
        .await
        .unwrap();

    let expected: Vec<_> = (1..=6).map(|done| (done, 6)).collect();
    assert_eq!(reports, expected);
}

#[tokio::test]
async fn failed_module_renders_the_diagnostic_frame() {
    let compiler = Arc::new(RecordingCompiler::new().failing_on("sphere"));
    let engine = engine(config(), compiler);

    let image = engine.render(backend()).await.unwrap();
    assert_eq!(image.get_pixel(0, 0).0, DIAGNOSTIC_COLOR);
    assert_eq!(engine.failures(), vec!["sphere".to_string()]);
}

#[tokio::test]
async fn async_compile_is_awaited() {
    let config = config().with_async_compile(true).with_backoff(1, 4);
    let engine = engine(config, Arc::new(RecordingCompiler::new()));

    engine.wait_compiled().await.unwrap();
    assert!(!engine.is_compiling());
    assert!(engine.modules().iter().all(|module| module.is_ready()));

    let image = engine.render(backend()).await.unwrap();
    assert_eq!(image.dimensions(), (8, 120));
}

#[tokio::test]
async fn auxiliary_output_skips_materials() {
    let engine = engine(
        config().with_output(Output::Depth).with_reflections(3),
        Arc::new(RecordingCompiler::new()),
    );
    let backend = backend();

    engine.render(Arc::clone(&backend)).await.unwrap();
    let backend = backend.lock();
    assert_eq!(backend.dispatches(KernelEntry::Material), 0);
    assert_eq!(backend.utilities(UtilityOp::DepthView), 3);
}

#[tokio::test]
async fn render_requires_a_scene() {
    let engine = Engine::new(config(), Arc::new(RecordingCompiler::new()));
    let err = engine.render(backend()).await.unwrap_err();
    assert_eq!(err.to_string(), "No scene loaded");
}

#[test]
fn invalidate_recompiles_one_object() {
    let compiler = Arc::new(RecordingCompiler::new());
    let mut engine = engine(config(), Arc::clone(&compiler));
    let sphere = engine.scene().unwrap().objects[1].id;

    engine.invalidate(sphere).unwrap();

    let compiled = compiler.compiled();
    let count = |label: &str| compiled.iter().filter(|l| l.as_str() == label).count();
    assert_eq!(count("sphere"), 2);
    assert_eq!(count("box"), 1);
}

#[test]
fn id_map_lists_every_object() {
    let engine = engine(config(), Arc::new(RecordingCompiler::new()));
    let ids = engine.id_map();
    assert_eq!(ids["sphere"].len(), 1);
    assert_eq!(ids["box"].len(), 1);
    let json = serde_json::to_value(&ids).unwrap();
    assert!(json.get("sphere").is_some());
}
