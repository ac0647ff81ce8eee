#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod chain;
pub mod config;
pub mod entities;
pub mod events;
pub mod framework;
pub mod order_index;
pub mod processors;
pub mod repositories;
pub mod settlement;
pub mod units;
