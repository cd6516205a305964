//! Common types and utilities for Ride Dispatch
//!
//! This crate provides shared types used across all Ride Dispatch crates.
//!
//! # Modules
//!
//! - [`error`] - Common error types
//! - [`types`] - Identifiers and driver/ride enumerations
//! - [`geo`] - Coordinates, validation and great-circle distance

pub mod error;
pub mod geo;
pub mod types;

pub use error::{Error, Result};
pub use geo::{haversine_km, haversine_meters, GeoPoint, Location};
pub use types::*;
