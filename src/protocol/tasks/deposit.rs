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
pub struct PublishDepositTx;

#[async_trait]
impl Task<Trade> for PublishDepositTx {
    fn name(&self) -> &'static str {
        "PublishDepositTx"
    }

    async fn run(&mut self, trade: &mut Trade) -> Result<(), EscrowError> {
        let Some(tx_fee) = trade.data().deposit_tx_fee else {
            return Err(EscrowError::Wallet(format!(
                "Trade w/ TradeID {} has no deposit tx fee",
                trade.trade_id()
            )));
        };

        let wallet = trade.process_model().wallet.clone();
        let deposit_tx_id = wallet.publish_deposit_tx(trade.data(), tx_fee).await?;
        info!(
            "Trade w/ TradeID {} published deposit tx {}",
            trade.trade_id(),
            deposit_tx_id
        );

        trade.set_deposit_tx_id(deposit_tx_id);
        trade.transition_to(TradeState::DepositPublished)
    }
}

#[derive(Default)]
pub struct SendDepositTxPublishedMessage;

#[async_trait]
impl Task<Trade> for SendDepositTxPublishedMessage {
    fn name(&self) -> &'static str {
        "SendDepositTxPublishedMessage"
    }

    async fn run(&mut self, trade: &mut Trade) -> Result<(), EscrowError> {
        let Some(deposit_tx_id) = trade.data().deposit_tx_id.clone() else {
            return Err(EscrowError::Wallet(format!(
                "Trade w/ TradeID {} has no deposit tx to announce",
                trade.trade_id()
            )));
        };

        let messenger = trade.process_model().messenger.clone();
        messenger
            .send_message(
                trade.trade_id(),
                &trade.data().peer,
                TradeMessage::DepositTxPublished { deposit_tx_id },
            )
            .await
    }
}

#[derive(Default)]
pub struct ProcessDepositTxPublishedMessage;

#[async_trait]
impl Task<Trade> for ProcessDepositTxPublishedMessage {
    fn name(&self) -> &'static str {
        "ProcessDepositTxPublishedMessage"
    }

    async fn run(&mut self, trade: &mut Trade) -> Result<(), EscrowError> {
        match take_trade_message(trade, "DepositTxPublished")? {
            TradeMessage::DepositTxPublished { deposit_tx_id } => {
                trade.set_deposit_tx_id(deposit_tx_id);
                apply_peer_state(trade, "DepositTxPublished", TradeState::DepositPublished)
            }
            message => Err(unexpected_message(trade, "DepositTxPublished", message)),
        }
    }
}
