//! # nearlock-server
//!
//! HTTP server library for the nearlock presence detection system.
//!
//! This library provides the API handlers and state management for nearlock.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
