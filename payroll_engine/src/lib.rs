//! Payroll Engine library crate.
//!
//! This crate computes monthly payroll under Tanzanian statutory rules
//! and exposes it, together with the run workflow and statutory filing
//! generation, over an HTTP API.  External applications may depend on
//! the `payroll_engine` crate and call `engine::compute_payroll`
//! directly, or embed the API via `api::build_router`.
//!
//! Mutations with financial side effects are de-duplicated by the
//! `idempotency` module, so client retries and concurrent duplicate
//! submissions take effect at most once.

pub mod money;
pub mod models;
pub mod rules;
pub mod resolver;
pub mod benefits;
pub mod statutory;
pub mod engine;
pub mod period;
pub mod workflow;
pub mod idempotency;
pub mod runs;
pub mod filings;
pub mod config;
pub mod error;
pub mod api;
