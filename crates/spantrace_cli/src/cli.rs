use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use spantrace_renderer::{RenderSettings, DEFAULT_PORT};

#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "spantrace")]
#[command(about = "CSG path tracer with adaptive tile sampling and network rendering")]
pub struct Args {
    /// Render tiles for remote clients instead of writing an image
    #[arg(long, conflicts_with = "client")]
    pub server: bool,

    /// Render through these servers (host or host:port)
    #[arg(long, num_args = 1.., value_name = "ADDR")]
    pub client: Vec<String>,

    /// Port the server listens on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// JSON render settings; flags below override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    /// Camera rays averaged per traced pixel
    #[arg(short, long)]
    pub samples: Option<u32>,

    /// Maximum bounces per path
    #[arg(long)]
    pub depth: Option<u32>,

    /// Tile edge length (power of two)
    #[arg(long)]
    pub tile_size: Option<u32>,

    #[arg(long)]
    pub threads: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Trace every pixel instead of interpolating smooth regions
    #[arg(long)]
    pub brute_force: bool,

    /// Directory holding top/bottom/left/right/front/back.png sky faces
    #[arg(long)]
    pub skybox: Option<PathBuf>,

    /// Output file (.png, or .hdr for linear radiance)
    #[arg(short, long, default_value = "spantrace.png")]
    pub output: PathBuf,

    /// Overrides RUST_LOG (default filter: info)
    #[arg(long)]
    pub log_level: Option<LogLevel>,
}

impl Args {
    /// Settings from the config file (or defaults) with flag overrides.
    pub fn render_settings(&self) -> Result<RenderSettings> {
        let mut settings = match &self.config {
            Some(path) => RenderSettings::from_json_file(path).with_context(|| format!("Loading {}", path.display()))?,
            None => RenderSettings::default(),
        };

        if self.width.is_some() || self.height.is_some() {
            // Rescale the resolution-derived defaults, keep explicit file values
            let width = self.width.unwrap_or(settings.width);
            let height = self.height.unwrap_or(settings.height);
            let scaled = RenderSettings::for_resolution(width, height);
            let defaults = RenderSettings::for_resolution(settings.width, settings.height);
            settings.width = width;
            settings.height = height;
            if settings.tile_size == defaults.tile_size {
                settings.tile_size = scaled.tile_size;
            }
            if settings.max_trustable_size == defaults.max_trustable_size {
                settings.max_trustable_size = scaled.max_trustable_size;
            }
        }
        if let Some(samples) = self.samples {
            settings.samples_per_pixel = samples;
        }
        if let Some(depth) = self.depth {
            settings.ray_depth = depth;
        }
        if let Some(tile_size) = self.tile_size {
            settings.tile_size = tile_size;
        }
        if let Some(threads) = self.threads {
            settings.threads = Some(threads);
        }
        if let Some(seed) = self.seed {
            settings.seed = seed;
        }
        if self.brute_force {
            settings.adaptive = false;
        }

        settings.validate().context("Invalid render settings")?;
        Ok(settings)
    }
}
