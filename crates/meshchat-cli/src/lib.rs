//! MeshChat CLI library
//!
//! Command-line driver for MeshChat nodes running over the simulated mesh from
//! `meshchat-runtime`: scripted delivery runs, an interactive line mode and
//! configuration inspection.

pub mod cli;
pub mod commands;
pub mod simulation;

pub use cli::{Cli, Commands};
pub use commands::{CommandDispatcher, InteractiveCommand, SimulationPlan};
pub use simulation::{describe, parse_nodes, Simulation};
