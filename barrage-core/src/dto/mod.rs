//! Data Transfer Objects
//!
//! Request and response shapes used by the orchestrator's HTTP layer.
//! DTOs are lightweight projections of domain entities.

pub mod run;
