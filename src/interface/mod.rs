mod peer_messaging;
mod persistence;
mod tx_observer;
mod wallet;

pub use peer_messaging::{PeerMessenger, TradeMessage};
pub use persistence::RequestPersistence;
pub use tx_observer::{ObservedTx, TxEvent, TxListenerKind, TxObserver};
pub use wallet::TradeWallet;
