use async_trait::async_trait;

use super::{apply_peer_state, take_trade_message, unexpected_message};
use crate::{
    common::error::EscrowError,
    interface::TradeMessage,
    task::Task,
    trade::{Trade, TradeState},
};

#[derive(Default)]
pub struct SendPaymentSentMessage;

#[async_trait]
impl Task<Trade> for SendPaymentSentMessage {
    fn name(&self) -> &'static str {
        "SendPaymentSentMessage"
    }

    async fn run(&mut self, trade: &mut Trade) -> Result<(), EscrowError> {
        // Checked up front so the peer is never told about a payment we cannot record
        if !trade.state().can_transition_to(TradeState::PaymentSent) {
            return Err(EscrowError::InvalidTransition {
                from: trade.state(),
                to: TradeState::PaymentSent,
            });
        }

        let messenger = trade.process_model().messenger.clone();
        messenger
            .send_message(trade.trade_id(), &trade.data().peer, TradeMessage::PaymentSent)
            .await?;

        trade.transition_to(TradeState::PaymentSent)
    }
}

#[derive(Default)]
pub struct ProcessPaymentSentMessage;

#[async_trait]
impl Task<Trade> for ProcessPaymentSentMessage {
    fn name(&self) -> &'static str {
        "ProcessPaymentSentMessage"
    }

    async fn run(&mut self, trade: &mut Trade) -> Result<(), EscrowError> {
        match take_trade_message(trade, "PaymentSent")? {
            TradeMessage::PaymentSent => {
                apply_peer_state(trade, "PaymentSent", TradeState::PaymentSent)
            }
            message => Err(unexpected_message(trade, "PaymentSent", message)),
        }
    }
}

#[derive(Default)]
pub struct ConfirmPaymentReceipt;

#[async_trait]
impl Task<Trade> for ConfirmPaymentReceipt {
    fn name(&self) -> &'static str {
        "ConfirmPaymentReceipt"
    }

    async fn run(&mut self, trade: &mut Trade) -> Result<(), EscrowError> {
        trade.transition_to(TradeState::PaymentReceived)
    }
}
