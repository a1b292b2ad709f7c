use async_trait::async_trait;

use crate::common::{
    error::EscrowError,
    types::{Satoshis, TxId},
};
use crate::trade::TradeData;

/// Wallet operations the protocol orchestrates. Key management and the
/// construction of the multisig transactions stay behind this boundary.
#[async_trait]
pub trait TradeWallet: Send + Sync {
    async fn publish_deposit_tx(
        &self,
        trade: &TradeData,
        tx_fee: Satoshis,
    ) -> Result<TxId, EscrowError>;

    async fn publish_payout_tx(
        &self,
        trade: &TradeData,
        tx_fee: Satoshis,
    ) -> Result<TxId, EscrowError>;
}
