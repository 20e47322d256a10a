//! Domain types for ReplayLab

pub mod bar;
pub mod event;
pub mod fill;
pub mod ids;
pub mod order;
pub mod portfolio;
pub mod position;
pub mod trade;

pub use bar::Bar;
pub use event::{Direction, Event, EventKind, Signal};
pub use fill::{Fill, Liquidity};
pub use ids::{DatasetHash, OrderId, RunId};
pub use order::{
    Order, OrderAuditEntry, OrderKind, OrderOrigin, OrderRequest, OrderSide, OrderStatus,
};
pub use portfolio::{EquityPoint, Marks, Portfolio, PortfolioSnapshot};
pub use position::{Position, PositionSide};
pub use trade::{OpenTrade, Trade};

/// Symbol type alias
pub type Symbol = String;
