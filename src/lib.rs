//! Slotguard - Token Bucket Admission Control
//!
//! This crate implements per-client token bucket rate limiting for a meeting
//! scheduler. The same in-process engine guards inbound API requests, through
//! an axum middleware, and internal scheduler operations, through an
//! operation wrapper. Buckets refill lazily and idle ones are swept by a
//! background reaper.

pub mod action;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
