use bevy::prelude::*;
use biped_gait::config::{KinematicsConfig, PatternGeneratorConfig};
use biped_gait::walking_loop::{VelocityCommand, WalkingLoop, WalkingLoopPlugin};
use biped_gait::Result;
use clap::Parser;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Runs the NMPC walking core in isolation, ticking the closed loop at the
/// command rate with no velocity input besides the CLI-supplied constant.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Number of command ticks to run before exiting.
    #[arg(long, default_value_t = 500)]
    ticks: u32,

    /// Constant forward velocity reference, m/s.
    #[arg(long, default_value_t = 0.0)]
    vx: f64,

    /// Constant lateral velocity reference, m/s.
    #[arg(long, default_value_t = 0.0)]
    vy: f64,

    /// Constant yaw-rate reference, rad/s.
    #[arg(long, default_value_t = 0.0)]
    vyaw: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    miette::set_panic_hook();

    let args = Args::parse();

    let pg_config = PatternGeneratorConfig::default();

    let mut walking_loop = WalkingLoop::new(pg_config, KinematicsConfig::default());
    walking_loop.connect();
    walking_loop.begin_initializing();
    walking_loop.finish_initializing();

    let mut app = App::new();
    app.add_plugins(MinimalPlugins)
        .add_plugins(WalkingLoopPlugin)
        .insert_resource(walking_loop)
        .insert_resource(VelocityCommand(Some(biped_gait::types::VelocityReference {
            vx: args.vx,
            vy: args.vy,
            vyaw: args.vyaw,
        })));

    for _ in 0..args.ticks {
        app.update();
    }

    Ok(())
}
