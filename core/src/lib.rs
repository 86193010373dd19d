//! daybank-core: authoritative day/target session core.
//!
//! One `engine::SessionEngine` per node. The authority owns the economy,
//! the round timer and the scene barrier; observers only project what the
//! authority replicates to them.

pub mod barrier;
pub mod bus;
pub mod clock;
pub mod command;
pub mod config;
pub mod delivery;
pub mod economy;
pub mod engine;
pub mod error;
pub mod event;
pub mod event_log;
pub mod growth;
pub mod net;
pub mod recovery;
pub mod replication;
pub mod rng;
pub mod round_timer;
pub mod types;
pub mod ui;
