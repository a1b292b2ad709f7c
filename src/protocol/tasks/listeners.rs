use async_trait::async_trait;
use tracing::debug;

use crate::{
    common::error::EscrowError,
    interface::TxListenerKind,
    task::Task,
    trade::{Trade, TradeState},
};

/// Registration is the task's success. The state change happens later, when
/// the observer's event reaches the trade.
#[derive(Default)]
pub struct SetupDepositTxListener;

#[async_trait]
impl Task<Trade> for SetupDepositTxListener {
    fn name(&self) -> &'static str {
        "SetupDepositTxListener"
    }

    async fn run(&mut self, trade: &mut Trade) -> Result<(), EscrowError> {
        trade.register_listener(TxListenerKind::Deposit).await
    }
}

#[derive(Default)]
pub struct SetupPayoutTxListener;

#[async_trait]
impl Task<Trade> for SetupPayoutTxListener {
    fn name(&self) -> &'static str {
        "SetupPayoutTxListener"
    }

    async fn run(&mut self, trade: &mut Trade) -> Result<(), EscrowError> {
        trade.register_listener(TxListenerKind::Payout).await
    }
}

#[derive(Default)]
pub struct RestoreTxListeners;

impl RestoreTxListeners {
    fn listeners_for(state: TradeState) -> &'static [TxListenerKind] {
        match state {
            state if state.awaits_deposit_confirmation() => &[TxListenerKind::Deposit],
            TradeState::PaymentSent
            | TradeState::PaymentReceived
            | TradeState::PayoutPublished
            | TradeState::DisputeOpened => &[TxListenerKind::Payout],
            _ => &[],
        }
    }
}

#[async_trait]
impl Task<Trade> for RestoreTxListeners {
    fn name(&self) -> &'static str {
        "RestoreTxListeners"
    }

    async fn run(&mut self, trade: &mut Trade) -> Result<(), EscrowError> {
        let kinds = Self::listeners_for(trade.state());
        if kinds.is_empty() {
            debug!(
                "Trade w/ TradeID {} in {} needs no tx listeners",
                trade.trade_id(),
                trade.state()
            );
        }
        for kind in kinds {
            trade.register_listener(*kind).await?;
        }
        Ok(())
    }
}
