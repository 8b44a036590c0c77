//! Procura
//!
//! Procurement and inventory reconciliation core: quote consolidation into
//! purchase orders, the purchase order lifecycle with payment reconciliation,
//! incremental cost distribution and a two-pool inventory ledger.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod money;
pub mod services;

pub mod prelude {
    pub use crate::config::{AppConfig, ProcurementConfig};
    pub use crate::db::DbPool;
    pub use crate::errors::ServiceError;
    pub use crate::events::{Event, EventSender};
    pub use crate::services::{ServiceContainer, ServiceFactory};
}
