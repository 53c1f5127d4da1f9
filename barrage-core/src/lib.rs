//! Barrage Core
//!
//! Core types and abstractions for the Barrage load-test orchestrator.
//!
//! This crate contains:
//! - Domain types: runs, log entries, result records and time-series samples
//! - DTOs: request/response shapes exchanged with the HTTP layer
//! - The time-series extractor that turns runner progress output into samples

pub mod domain;
pub mod dto;
pub mod timeseries;
