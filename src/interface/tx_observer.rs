use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};
use tokio::sync::mpsc;

use crate::common::{
    error::EscrowError,
    types::{TradeId, TxId},
};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
pub enum TxListenerKind {
    /// The deposit transaction itself becoming visible or confirmed
    Deposit,
    /// Any transaction spending the deposit, i.e. the payout
    Payout,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedTx {
    pub tx_id: TxId,
    pub confirmations: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxEvent {
    pub trade_id: TradeId,
    pub kind: TxListenerKind,
    pub tx: ObservedTx,
}

/// Blockchain event boundary. Implementations deliver a `TxEvent` on `events_tx`
/// every time a watched transaction is seen or gains confirmations, until the
/// listener is unregistered.
#[async_trait]
pub trait TxObserver: Send + Sync {
    async fn register_listener(
        &self,
        trade_id: TradeId,
        kind: TxListenerKind,
        deposit_tx_id: TxId,
        events_tx: mpsc::Sender<TxEvent>,
    ) -> Result<(), EscrowError>;

    async fn unregister_listener(
        &self,
        trade_id: TradeId,
        kind: TxListenerKind,
    ) -> Result<(), EscrowError>;
}
