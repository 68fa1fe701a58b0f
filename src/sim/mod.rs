mod config;
mod tank;
mod tic;

pub use config::{ConfigError, SimConfig, Targeting};
pub use tank::Tank;
pub use tic::{SimError, TicRunner, TickStats};
