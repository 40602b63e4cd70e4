//! CoinDCX-shaped REST adapter implementing the `ExchangeGateway` trait (C4).

pub mod auth;
pub mod client;
mod wire;

pub use client::{ClientConfig, CoinDcxGateway};
