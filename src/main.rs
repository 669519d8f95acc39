use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use std::{path::PathBuf, process::ExitCode, time::Duration};

use pin_sweep::{
    config::{FIRST_PIN, LAST_PIN},
    gpio::SYSFS_ROOT,
    CleanupPolicy, PinSweep, SweepConfig, SysfsGpio,
};

#[derive(Parser)]
#[command(name = "pin-sweep", about = "Reset or cycle a range of GPIO pins")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive every pin low and release it
    Reset {
        #[command(flatten)]
        common: Common,
        #[arg(long, help = "Do not log a JSON dump of each pin before cleanup")]
        no_snapshot: bool,
    },
    /// Drive every pin high, hold, then drive low and release
    Cycle {
        #[command(flatten)]
        common: Common,
        #[arg(long, default_value_t = 1000, help = "How long to hold the pins high")]
        hold_ms: u64,
    },
}

#[derive(Args)]
struct Common {
    #[arg(long, default_value_t = FIRST_PIN, help = "First pin of the range")]
    first: u32,
    #[arg(long, default_value_t = LAST_PIN, help = "Last pin of the range (inclusive)")]
    last: u32,
    #[arg(long, help = "best-effort or fail-fast; defaults depend on the command")]
    policy: Option<CleanupPolicy>,
    #[arg(long, help = "Switch pins to input after driving them low")]
    park_inputs: bool,
    #[arg(long, default_value = SYSFS_ROOT, help = "GPIO sysfs directory")]
    sysfs_root: PathBuf,
}

impl Common {
    fn apply(&self, config: SweepConfig) -> SweepConfig {
        let policy = self.policy.unwrap_or(config.policy);
        config
            .pins(self.first, self.last)
            .policy(policy)
            .park_inputs(self.park_inputs)
    }
}

impl Commands {
    fn config(&self) -> (SweepConfig, &Common) {
        match self {
            Commands::Reset {
                common,
                no_snapshot,
            } => (
                common.apply(SweepConfig::reset_all()).snapshot(!no_snapshot),
                common,
            ),
            Commands::Cycle { common, hold_ms } => (
                common
                    .apply(SweepConfig::drive_high())
                    .hold(Duration::from_millis(*hold_ms)),
                common,
            ),
        }
    }

    fn execute(self) -> Result<()> {
        let (config, common) = self.config();
        info!(
            "sweeping pins {}..={} ({})",
            config.first, config.last, config.policy
        );

        let gpio = SysfsGpio::with_root(&common.sysfs_root)
            .with_context(|| format!("cannot open {}", common.sysfs_root.display()))?;
        let report = PinSweep::new(gpio, config)?.run()?;

        let failed: Vec<u32> = report.failed_writes().collect();
        if !failed.is_empty() {
            info!("pins that could not be driven low: {:?}", failed);
        }

        Ok(())
    }
}

fn main() -> ExitCode {
    pin_sweep::init_logging();

    let cli = Cli::parse();
    match cli.command.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
