mod provider;
mod service;

pub use provider::{
    FeeData, FeeFigures, FeeProvider, HttpFeeProvider, FEES_TIMESTAMP_KEY, MIN_TX_FEE_KEY,
    TX_FEE_KEY,
};
pub use service::{FeeRefresh, FeeService, FeeServiceAccess, FeeSnapshot};

#[cfg(test)]
pub(crate) use provider::MockFeeProvider;
