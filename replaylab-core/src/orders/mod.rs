//! Order lifecycle management.

pub mod manager;

pub use manager::{OrderError, OrderManager};
