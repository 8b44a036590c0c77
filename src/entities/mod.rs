// Requisitions and supplier quotes
pub mod quote_option;
pub mod requisition;
pub mod requisition_line;

// Purchase orders
pub mod payment;
pub mod purchase_order;
pub mod purchase_order_change;
pub mod purchase_order_line;

// Incremental costs
pub mod incremental_cost_base_order;
pub mod incremental_cost_distribution;
pub mod incremental_cost_order;

// Inventory ledger
pub mod inventory_assignment;
pub mod inventory_movement;
pub mod inventory_record;

pub mod sequence;
