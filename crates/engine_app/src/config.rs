//! Command-line configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use engine_script::ScriptSystemConfig;

use crate::tick::TickConfig;

/// Command-line arguments of the engine binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "engine_app", about = "Runs a scripted scene through the frame scheduler")]
pub struct Args {
    /// Scene file (JSON). The bundled demo scene is used when omitted
    #[arg(short, long)]
    pub scene: Option<PathBuf>,

    /// Target frames per second
    #[arg(short, long, default_value_t = 60.0, allow_negative_numbers = true, value_parser = parse_tick_rate)]
    pub tick_rate: f64,

    /// Stop after this many frames (0 runs until interrupted)
    #[arg(short, long, default_value_t = 300)]
    pub max_ticks: u64,

    /// Simulated module load latency, in milliseconds
    #[arg(short, long, default_value_t = 50)]
    pub load_latency_ms: u64,

    /// Completed loads applied per frame (0 applies all)
    #[arg(long, default_value_t = 0)]
    pub max_loads_per_frame: usize,

    /// Let panics in script hooks unwind out of the frame instead of
    /// reporting them. Debugging only: one faulty module then stops the run
    #[arg(long)]
    pub no_catch_panics: bool,
}

/// Accept only finite rates above zero; the loop divides by the rate.
fn parse_tick_rate(value: &str) -> Result<f64, String> {
    let rate: f64 = value.parse().map_err(|e| format!("{e}"))?;
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(format!("tick rate must be a positive number, got {value}"))
    }
}

impl Args {
    /// Frame loop settings taken from the arguments.
    #[must_use]
    pub fn tick_config(&self) -> TickConfig {
        TickConfig {
            tick_rate: self.tick_rate,
            max_ticks: self.max_ticks,
        }
    }

    /// Script system settings taken from the arguments.
    #[must_use]
    pub fn script_config(&self) -> ScriptSystemConfig {
        ScriptSystemConfig::new()
            .with_catch_panics(!self.no_catch_panics)
            .with_max_completions_per_flush(self.max_loads_per_frame)
    }

    /// Returns the simulated module load latency.
    #[must_use]
    pub fn load_latency(&self) -> Duration {
        Duration::from_millis(self.load_latency_ms)
    }
}
