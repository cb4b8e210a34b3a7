//! Create a virtual gamepad, pulse a button and sweep the left stick.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use stickpad::{Registry, Settings};
use tracing::info;

#[derive(Parser)]
#[command(name = "pad_demo")]
#[command(about = "Drive a virtual controller for a few seconds")]
struct Cli {
    /// Settings file (default: ~/.config/stickpad/stickpad.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Install the driver if it is missing
    #[arg(long)]
    install: bool,

    /// Button index to pulse
    #[arg(long, default_value_t = 0)]
    button: i64,

    /// Sweep steps across the stick range
    #[arg(long, default_value_t = 20)]
    steps: u32,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let path = cli.config.unwrap_or_else(Settings::default_path);
    let settings = Settings::load(&path)?;
    let registry = Registry::from_settings(&settings);
    info!(backend = ?registry.backend_kind(), device = %settings.device, "registry ready");

    if !registry.is_supported() {
        if !cli.install {
            bail!("virtual device driver not available (rerun with --install)");
        }
        if !registry.install().wait() {
            bail!("driver installation failed");
        }
    }

    let pad = registry.create()?;
    info!(id = %pad.id(), "controller created");

    pad.button_down(cli.button)?;
    std::thread::sleep(Duration::from_millis(250));
    pad.button_up(cli.button)?;

    let (min, max) = pad.layout().axis_domain();
    let steps = cli.steps.max(1);
    for i in 0..=steps {
        let value = min + (max - min) * f64::from(i) / f64::from(steps);
        pad.set_axis(0, value)?;
        std::thread::sleep(Duration::from_millis(50));
    }
    pad.set_axis(0, (min + max) / 2.0)?;

    info!(report = ?pad.report(), "final report");
    registry.shutdown();
    Ok(())
}
