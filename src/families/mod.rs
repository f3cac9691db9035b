//! Device families
//!
//! - **local**: in-memory tags, no device behind them
//! - **logix**: controllers addressed by tag name over host/port; the wire
//!   protocol is supplied by the embedding application

pub mod local;
pub mod logix;

pub use local::{LocalAdapter, LocalTag};
pub use logix::{LogixSettings, LogixTag};
