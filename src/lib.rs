//! Master side of the WeatherBus Lite protocol, a minimal ASCII
//! query/response protocol for polling a weather sensor node over RS485.
//!
//! A query is `?` followed by a one character [`Channel`] code. The node
//! answers with `<code><anything>:<number>\n`. The [`master`] module has the
//! sans-io protocol engine, and [`master::io`] a blocking driver for any
//! [`Bus`](master::io::Bus) implementation.
#![cfg_attr(not(feature = "std"), no_std)]

mod buffer;
pub mod master;
mod nom_parser;
#[cfg(feature = "serial")]
pub mod serial;
pub mod types;

pub use buffer::PAYLOAD_CAPACITY;
pub use types::{ch, Channel, IntoChannel, Quantity};
