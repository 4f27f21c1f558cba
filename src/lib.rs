//! Guild Roster - backend for a game community's guild roster
//!
//! This crate hosts the HTTP request pipeline of the roster service. Every
//! request passes through a per-client rate limiter whose fixed-window
//! counters live in a shared counter store (Redis in production, an
//! in-process map for single-instance deployments and tests).

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
