//! Headless tank battle.
//!
//! ```bash
//! RUST_LOG=debug cargo run --release -- --tanks 640 --ticks 2000 --targeting tree
//! ```

use std::time::Instant;

use clap::Parser;

use tanks_rs::sim::{SimConfig, Targeting, TicRunner};
use tanks_rs::spatial::Allegiance;

/// CLI options handled via `clap` derive.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Opts {
    /// Tanks per side
    #[arg(long, default_value_t = 640)]
    tanks: usize,

    /// Stop after this many ticks even if both sides stand
    #[arg(long, default_value_t = 4000)]
    ticks: u64,

    /// Nearest-enemy lookup
    #[arg(long, value_enum, default_value_t = Targeting::Grid)]
    targeting: Targeting,

    /// Grid cell edge in map units
    #[arg(long, default_value_t = 25.0)]
    cell_size: f32,

    /// Rebuild the snapshot trees every N ticks
    #[arg(long, default_value_t = 1)]
    rebuild_interval: u64,

    /// Worker threads (0 = one per core)
    #[arg(long, default_value_t = 0)]
    workers: usize,

    #[arg(long, default_value_t = 0x7A4E)]
    seed: u64,
}

impl Opts {
    fn config(&self) -> SimConfig {
        SimConfig {
            tanks_per_side: self.tanks,
            targeting: self.targeting,
            cell_size: self.cell_size,
            rebuild_interval: self.rebuild_interval,
            workers: self.workers,
            seed: self.seed,
            ..SimConfig::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();

    let mut sim = TicRunner::new(opts.config())?;
    let started = Instant::now();
    let (mut shots, mut kills) = (0, 0);

    while sim.ticks() < opts.ticks && sim.winner().is_none() {
        let stats = sim.tick()?;
        shots += stats.shots;
        kills += stats.kills;
    }

    let elapsed = started.elapsed();
    let [blue, red] = sim.alive();
    println!(
        "{} ticks in {:.2?} ({:.2?}/tick)",
        sim.ticks(),
        elapsed,
        elapsed / sim.ticks().max(1) as u32
    );
    println!("blue {blue}  red {red}  shots {shots}  kills {kills}");
    match sim.winner() {
        Some(Allegiance::Blue) => println!("blue wins"),
        Some(Allegiance::Red) => println!("red wins"),
        None => println!("no winner"),
    }
    Ok(())
}
