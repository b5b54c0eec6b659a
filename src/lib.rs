//! telemetry state engine for a cloud-connected portable power station.
//!
//! decoder -> watchdog -> hysteresis -> store, with a ttl-bounded command slot
//! drained by the poller and an adaptive poll schedule. the chat responder and
//! the dashboard only read the store (and queue commands).

pub mod chat;
pub mod commands;
pub mod config;
pub mod dashboard;
pub mod decoder;
pub mod device;
pub mod domain;
pub mod hysteresis;
pub mod poller;
pub mod scheduler;
pub mod store;
pub mod watchdog;
