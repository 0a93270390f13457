//! ZigBee attribute sync library.
//!
//! Keeps ZigBee device attributes (humidity, voltage, ...) fresh as
//! home-automation channels, preferring device-side reporting and falling
//! back to polling where reporting cannot be established.

pub mod config;
pub mod error;
pub mod gateway;
pub mod sink;
pub mod sync;
pub mod zcl;
