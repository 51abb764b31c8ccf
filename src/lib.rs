//! Firewatch library: portable fire and hazard detection for a sensor node.
//!
//! Everything here is platform independent and testable on any host with
//! `cargo test`. The ESP32 firmware binary is a thin consumer that wires real
//! peripherals (ADC, BME280, DS18B20 one-wire bus, RS-485 UART, flash) into
//! these layers.
//!
//! - `filter`: fixed-capacity moving-average smoothing per channel
//! - `hazard`: additive rule scoring and four-level classification
//! - `node`: the per-node context owning every filter, one `tick` per sample
//! - `protocol` / `comm`: status records, master commands, RS-485 driver
//! - `onewire`: one-wire bus, ROM search and DS18B20 decoding
//! - `identity`: device id persisted in byte-addressed storage
//! - `defaults` / `board`: compiled-in thresholds and pin map
//!
//! `no_std`, no allocator.

#![cfg_attr(not(test), no_std)]

pub mod board;
pub mod comm;
pub mod defaults;
pub mod filter;
pub mod hazard;
pub mod identity;
pub mod node;
pub mod onewire;
pub mod protocol;
