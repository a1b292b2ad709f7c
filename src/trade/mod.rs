mod data;
mod state;
mod trade;

pub use data::{ProcessModel, Trade, TradeCollaborators, TradeData, TradeStateChange};
pub use state::TradeState;
pub use trade::TradeAccess;

pub(crate) use trade::TradeEngine;
