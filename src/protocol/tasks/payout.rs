use async_trait::async_trait;
use tracing::info;

use super::{apply_peer_state, take_trade_message, unexpected_message};
use crate::{
    common::error::EscrowError,
    interface::TradeMessage,
    task::Task,
    trade::{Trade, TradeState},
};

#[derive(Default)]
pub struct PublishPayoutTx;

#[async_trait]
impl Task<Trade> for PublishPayoutTx {
    fn name(&self) -> &'static str {
        "PublishPayoutTx"
    }

    async fn run(&mut self, trade: &mut Trade) -> Result<(), EscrowError> {
        let Some(tx_fee) = trade.data().payout_tx_fee else {
            return Err(EscrowError::Wallet(format!(
                "Trade w/ TradeID {} has no payout tx fee",
                trade.trade_id()
            )));
        };

        let wallet = trade.process_model().wallet.clone();
        let payout_tx_id = wallet.publish_payout_tx(trade.data(), tx_fee).await?;
        info!(
            "Trade w/ TradeID {} published payout tx {}",
            trade.trade_id(),
            payout_tx_id
        );

        trade.set_payout_tx_id(payout_tx_id);
        trade.transition_to(TradeState::PayoutPublished)
    }
}

#[derive(Default)]
pub struct SendPayoutTxPublishedMessage;

#[async_trait]
impl Task<Trade> for SendPayoutTxPublishedMessage {
    fn name(&self) -> &'static str {
        "SendPayoutTxPublishedMessage"
    }

    async fn run(&mut self, trade: &mut Trade) -> Result<(), EscrowError> {
        let Some(payout_tx_id) = trade.data().payout_tx_id.clone() else {
            return Err(EscrowError::Wallet(format!(
                "Trade w/ TradeID {} has no payout tx to announce",
                trade.trade_id()
            )));
        };

        let messenger = trade.process_model().messenger.clone();
        messenger
            .send_message(
                trade.trade_id(),
                &trade.data().peer,
                TradeMessage::PayoutTxPublished { payout_tx_id },
            )
            .await
    }
}

#[derive(Default)]
pub struct ProcessPayoutTxPublishedMessage;

#[async_trait]
impl Task<Trade> for ProcessPayoutTxPublishedMessage {
    fn name(&self) -> &'static str {
        "ProcessPayoutTxPublishedMessage"
    }

    async fn run(&mut self, trade: &mut Trade) -> Result<(), EscrowError> {
        match take_trade_message(trade, "PayoutTxPublished")? {
            TradeMessage::PayoutTxPublished { payout_tx_id } => {
                // The payout listener may already have seen it in the network
                if trade.data().payout_tx_id.is_none() {
                    trade.set_payout_tx_id(payout_tx_id);
                }
                apply_peer_state(trade, "PayoutTxPublished", TradeState::PayoutPublished)
            }
            message => Err(unexpected_message(trade, "PayoutTxPublished", message)),
        }
    }
}
