//! Core types for tickerd
//!
//! This crate contains:
//! - Shared domain types (task status lifecycle, result maps)
//! - DTOs for the HTTP API surface
//!
//! Note: Orchestration logic lives in the server crate; this crate only
//! defines the shapes that cross process boundaries (the state store and
//! the HTTP wire).

pub mod dto;
pub mod task;

pub use task::{ResultMap, TaskStatus};
