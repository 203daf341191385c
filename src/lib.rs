//! hubvc: a Discord bot that provisions personal voice channels when a
//! member joins a designated hub channel, and manages them until they
//! empty out.
//!
//! The binary in `main.rs` wires the gateway; everything else lives here so
//! the wizard/command layer (`vc::api`) is a real library surface.

pub mod config;
pub mod context;
pub mod event;
pub mod guard;
pub mod handler;
pub mod logging;
pub mod plugin;
pub mod retry;
pub mod store;
pub mod vc;
