use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};

use crate::common::{
    error::EscrowError,
    types::{TradeId, TxId},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, IntoStaticStr)]
pub enum TradeMessage {
    DepositTxPublished { deposit_tx_id: TxId },
    PaymentSent,
    PayoutTxPublished { payout_tx_id: TxId },
}

#[async_trait]
pub trait PeerMessenger: Send + Sync {
    async fn send_message(
        &self,
        trade_id: TradeId,
        peer: &str,
        message: TradeMessage,
    ) -> Result<(), EscrowError>;
}
