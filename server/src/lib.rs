//! Autonomous entity simulation for a persistent multiplayer world.
//!
//! Keeps monsters alive, moving, fighting and dropping loot next to the
//! player sessions served by the network layer.

pub mod behavior;
pub mod combat;
pub mod config;
pub mod content;
pub mod entities;
pub mod error;
pub mod loot;
pub mod movement;
pub mod registry;
pub mod services;
pub mod task;
pub mod world;

pub use config::SimConfig;
pub use error::{Result, SimError};
pub use world::{Collaborators, Simulation};
