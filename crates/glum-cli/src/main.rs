use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use glum_core::pipeline::FrameOutcome;
use glum_core::{frame, Detection, RenderMode, SchemeKind, TriggerMode, WarpConfig, WarpEngine};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "glum", about = "Landmark-driven facial warp")]
struct Cli {
    /// Config file (TOML). GLUM_* environment variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Warp one image using detector landmarks and export it as PNG
    Warp {
        /// Input image (any format the image crate decodes)
        #[arg(short, long)]
        input: PathBuf,
        /// Landmark JSON: {"space", "points", "score"} or null
        #[arg(short, long)]
        landmarks: PathBuf,
        /// Output PNG
        #[arg(short, long)]
        output: PathBuf,
        /// Deformation strength, 0 to 1
        #[arg(long)]
        intensity: Option<f64>,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        #[arg(long, value_enum)]
        scheme: Option<SchemeArg>,
        /// Expression score (replaces the one in the landmark file)
        #[arg(long)]
        score: Option<f32>,
        /// Mirror image and landmarks first (selfie view)
        #[arg(long)]
        mirror: bool,
        /// Full deformation regardless of intensity and trigger settings
        #[arg(long)]
        forced: bool,
    },
    /// Print the effective configuration as TOML
    Config,
    /// List the built-in landmark schemes
    Schemes,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Mesh,
    Patches,
}

impl From<ModeArg> for RenderMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Mesh => RenderMode::Mesh,
            ModeArg::Patches => RenderMode::Patches,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemeArg {
    Mediapipe,
    Clmtrackr,
}

impl From<SchemeArg> for SchemeKind {
    fn from(s: SchemeArg) -> Self {
        match s {
            SchemeArg::Mediapipe => SchemeKind::MediaPipeFaceMesh,
            SchemeArg::Clmtrackr => SchemeKind::Clmtrackr,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Warp {
            input,
            landmarks,
            output,
            intensity,
            mode,
            scheme,
            score,
            mirror,
            forced,
        } => {
            let mut config = config;
            if let Some(intensity) = intensity {
                config.intensity = intensity;
            }
            if let Some(mode) = mode {
                config.render = mode.into();
            }
            if let Some(scheme) = scheme {
                config.scheme = scheme.into();
            }
            if forced {
                config.trigger = TriggerMode::Forced;
            }
            warp(config, &input, &landmarks, &output, score, mirror)?;
        }
        Commands::Config => {
            config.validate().context("effective configuration is invalid")?;
            print!("{}", config.to_toml_string().context("failed to serialize config")?);
        }
        Commands::Schemes => {
            for kind in [SchemeKind::MediaPipeFaceMesh, SchemeKind::Clmtrackr] {
                let scheme = kind.scheme();
                println!(
                    "{} ({}..={} points)",
                    scheme.name, scheme.point_count, scheme.max_point_count
                );
                for (role, index) in scheme.roles() {
                    println!("  {:<22} {index}", role.name());
                }
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<WarpConfig> {
    let config = match path {
        Some(path) => WarpConfig::load(path).with_context(|| format!("failed to load {}", path.display()))?,
        None => WarpConfig::default(),
    };
    Ok(config.apply_env())
}

fn warp(
    config: WarpConfig,
    input: &Path,
    landmarks: &Path,
    output: &Path,
    score: Option<f32>,
    mirror: bool,
) -> Result<()> {
    let mut engine = WarpEngine::new(config).context("invalid warp configuration")?;

    let mut image = image::open(input)
        .with_context(|| format!("failed to decode {}", input.display()))?
        .to_rgba8();
    let json = std::fs::read_to_string(landmarks)
        .with_context(|| format!("failed to read {}", landmarks.display()))?;
    let mut detection =
        Detection::from_json(&json).with_context(|| format!("invalid landmark JSON in {}", landmarks.display()))?;

    if let Detection::Face {
        landmarks: set,
        score: file_score,
    } = &mut detection
    {
        if score.is_some() {
            *file_score = score;
        }
        if mirror {
            *set = set.mirrored(image.width());
        }
    }
    if mirror {
        frame::mirror_horizontal(&mut image);
    }

    tracing::info!(
        input = %input.display(),
        width = image.width(),
        height = image.height(),
        face = matches!(detection, Detection::Face { .. }),
        "processing frame"
    );
    let (warped, outcome) = engine.process(&image, &detection);

    match &outcome {
        FrameOutcome::Warped {
            intensity,
            region,
            stats,
        } => println!(
            "warped at intensity {intensity:.2}: {} triangles ({} degenerate), {} pixels, region {}x{} at ({}, {})",
            stats.triangles, stats.degenerate, stats.pixels, region.width, region.height, region.x, region.y
        ),
        FrameOutcome::Passthrough(reason) => println!("passthrough: {reason:?}"),
    }

    warped
        .save_with_format(output, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("wrote {}", output.display());
    Ok(())
}
