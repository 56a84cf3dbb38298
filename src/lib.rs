//! Procurement Engine Library
//!
//! Purchase order lifecycle and receiving reconciliation: the status graph,
//! validation, permission gate, reconciliation of goods receipts against
//! ordered quantities, and the stock instructions those receipts produce.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod audit;
pub mod auth;
pub mod commands;
pub mod concurrency;
pub mod config;
pub mod errors;
pub mod events;
pub mod inventory;
pub mod models;
pub mod repositories;
pub mod services;
pub mod workflow;

pub use auth::{CallerContext, Role};
pub use errors::ServiceError;
pub use services::{PurchaseOrderService, ReceiveOutcome};
