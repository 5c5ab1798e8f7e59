//! rz CLI - Compile, inspect and render scenes from the command line

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use parking_lot::Mutex;
use rz_engine::{Engine, EngineConfig, Output, demo_scene, save_image};
use rz_render::{RecordingBackend, RecordingCompiler, WgpuBackend, init_headless};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "rz")]
#[command(about = "Procedural SDF scenes compiled to GPU kernels", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print or write the generated WGSL of every module
    Compile {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Directory to write one .wgsl file per module into
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Print the shape id map as JSON
    Ids {
        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// Print the pass sequence of a render without a GPU
    Trace {
        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// Render the scene to an image file (headless)
    Render {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Output image file (.png or .exr)
        #[arg(short, long, default_value = "render.png")]
        output: PathBuf,
    },

    /// Print the effective engine config as JSON
    Config {
        #[command(flatten)]
        settings: SettingsArgs,
    },
}

/// Config file plus command-line overrides
#[derive(Args, Debug, Default)]
struct SettingsArgs {
    /// JSON engine config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Image width
    #[arg(long)]
    width: Option<u32>,

    /// Image height
    #[arg(long)]
    height: Option<u32>,

    /// Samples per pixel
    #[arg(long)]
    samples: Option<u32>,

    /// Hit passes per chunk
    #[arg(long)]
    reflections: Option<u32>,

    /// Image to deliver
    #[arg(long, value_enum)]
    view: Option<ViewArg>,

    /// Flat-shaded preview instead of the full pipeline
    #[arg(long)]
    preview: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ViewArg {
    Final,
    Depth,
    Ao,
    Shadows,
    Fog,
}

impl From<ViewArg> for Output {
    fn from(view: ViewArg) -> Self {
        match view {
            ViewArg::Final => Output::Final,
            ViewArg::Depth => Output::Depth,
            ViewArg::Ao => Output::Ao,
            ViewArg::Shadows => Output::Shadows,
            ViewArg::Fog => Output::Fog,
        }
    }
}

impl SettingsArgs {
    fn resolve(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(samples) = self.samples {
            config.samples = samples;
        }
        if let Some(reflections) = self.reflections {
            config.reflections = reflections;
        }
        if let Some(view) = self.view {
            config.output = view.into();
        }
        if self.preview {
            config.minimal_preview = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout carries WGSL and JSON
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile { settings, out } => {
            run_compile(&settings, out.as_deref()).await?;
        }
        Commands::Ids { settings } => {
            run_ids(&settings).await?;
        }
        Commands::Trace { settings } => {
            run_trace(&settings).await?;
        }
        Commands::Render { settings, output } => {
            run_render(&settings, &output).await?;
        }
        Commands::Config { settings } => {
            println!("{}", settings.resolve()?.to_json()?);
        }
    }

    Ok(())
}

/// Engine with the demo scene, compiled without a GPU
async fn offline_engine(settings: &SettingsArgs) -> Result<Engine> {
    let mut engine = Engine::new(settings.resolve()?, Arc::new(RecordingCompiler::new()));
    engine.load_scene(demo_scene())?;
    engine.wait_compiled().await?;
    Ok(engine)
}

async fn run_compile(settings: &SettingsArgs, out: Option<&Path>) -> Result<()> {
    let engine = offline_engine(settings).await?;
    let modules = engine.modules();

    let Some(dir) = out else {
        for module in &modules {
            println!("// ---- {} ----", module.label);
            println!("{}", module.source);
        }
        return Ok(());
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    for module in &modules {
        let path = dir.join(format!("{}.wgsl", file_stem(&module.label)));
        std::fs::write(&path, &module.source)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

async fn run_ids(settings: &SettingsArgs) -> Result<()> {
    let engine = offline_engine(settings).await?;
    println!("{}", serde_json::to_string_pretty(&engine.id_map())?);
    Ok(())
}

async fn run_trace(settings: &SettingsArgs) -> Result<()> {
    let engine = offline_engine(settings).await?;
    let backend = Arc::new(Mutex::new(RecordingBackend::new()));
    engine.render(Arc::clone(&backend)).await?;
    print!("{}", backend.lock().describe());
    Ok(())
}

async fn run_render(settings: &SettingsArgs, output: &Path) -> Result<()> {
    let config = settings.resolve()?;
    println!(
        "Rendering to {} ({}x{})...",
        output.display(),
        config.width,
        config.height
    );

    let (device, queue) = pollster::block_on(init_headless())?;
    let backend = WgpuBackend::new(device, queue)?;
    let mut engine = Engine::new(config, backend.compiler());
    engine.load_scene(demo_scene())?;

    let backend = Arc::new(Mutex::new(backend));
    let image = engine
        .render_with_progress(backend, |done, total| {
            info!(done, total, "Render progress");
        })
        .await?;

    let failures = engine.failures();
    if !failures.is_empty() {
        eprintln!("Modules failed to compile: {}", failures.join(", "));
    }

    let written = save_image(&image, output)?;
    println!("Saved to: {}", written.display());
    Ok(())
}

/// Module label as a file name
fn file_stem(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_apply_on_defaults() {
        let cli = Cli::try_parse_from([
            "rz", "render", "--width", "320", "--samples", "4", "--view", "depth", "-o", "out.exr",
        ])
        .unwrap();
        let Commands::Render { settings, output } = cli.command else {
            panic!("expected render");
        };
        let config = settings.resolve().unwrap();
        assert_eq!(config.width, 320);
        assert_eq!(config.height, EngineConfig::default().height);
        assert_eq!(config.samples, 4);
        assert_eq!(config.output, Output::Depth);
        assert_eq!(output, PathBuf::from("out.exr"));
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("rounded box"), "rounded_box");
        assert_eq!(file_stem("sky-dome"), "sky-dome");
    }

    #[tokio::test]
    async fn test_offline_engine_compiles_the_demo() {
        let settings = SettingsArgs {
            width: Some(8),
            height: Some(8),
            ..SettingsArgs::default()
        };
        let engine = offline_engine(&settings).await.unwrap();
        assert!(engine.modules().len() >= 5);
        assert!(engine.failures().is_empty());
    }
}
