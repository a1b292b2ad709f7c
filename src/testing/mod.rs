mod doubles;
mod params;

pub use doubles::{
    FailBeforeTask, ManualTxObserver, RecordingMessenger, RecordingPersistence, StaticFeeProvider,
    StubWallet, TestDoubles,
};
pub use params::SomeTestTradeParams;
