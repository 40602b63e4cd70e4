//! Order Management System: the deal/order domain model (§3), the in-memory
//! store (C2), and the order factory (C3).

pub mod factory;
pub mod store;
pub mod types;

pub use factory::OrderFactory;
pub use store::{DealLock, DealStore, OrderFilter};
pub use types::{Deal, DealId, DealStatus, Order, OrderId, OrderKind, OrderStatus};
