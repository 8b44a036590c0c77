// Pricing and payment derivations shared by the order services
pub mod payments;
pub mod pricing;

// Requisitions and quote consolidation
pub mod consolidation;
pub mod requisitions;

// Purchase order lifecycle
pub mod purchase_orders;

// Incremental costs
pub mod cost_distribution;
pub mod incremental_costs;

// Inventory ledger
pub mod inventory;

// Service factory for dependency injection
pub mod factory;

pub use factory::{ServiceContainer, ServiceFactory};
