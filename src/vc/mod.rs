//! The hub voice channel subsystem: provisioning rules, live channel
//! records, and everything that reacts to people moving between channels.

pub mod active;
pub mod api;
pub mod lifecycle;
pub mod name;
pub mod options;
pub mod panel;
pub mod permissions;
pub mod provision;
pub mod reconcile;
pub mod system;
pub mod timers;
