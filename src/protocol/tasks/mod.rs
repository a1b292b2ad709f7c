mod deposit;
mod fees;
mod listeners;
mod payment;
mod payout;

pub use deposit::{ProcessDepositTxPublishedMessage, PublishDepositTx, SendDepositTxPublishedMessage};
pub use fees::CalculateTxFees;
pub use listeners::{RestoreTxListeners, SetupDepositTxListener, SetupPayoutTxListener};
pub use payment::{ConfirmPaymentReceipt, ProcessPaymentSentMessage, SendPaymentSentMessage};
pub use payout::{ProcessPayoutTxPublishedMessage, PublishPayoutTx, SendPayoutTxPublishedMessage};

use tracing::debug;

use crate::{
    common::error::EscrowError,
    interface::TradeMessage,
    trade::{Trade, TradeState},
};

/// Takes the peer message that triggered the running pipeline
fn take_trade_message(trade: &mut Trade, expected: &str) -> Result<TradeMessage, EscrowError> {
    trade
        .process_model_mut()
        .trade_message
        .take()
        .ok_or_else(|| {
            EscrowError::PeerMessaging(format!(
                "Trade w/ TradeID {} expected a {} message but has none",
                trade.trade_id(),
                expected
            ))
        })
}

fn unexpected_message(trade: &Trade, expected: &str, message: TradeMessage) -> EscrowError {
    EscrowError::PeerMessaging(format!(
        "Trade w/ TradeID {} expected a {} message but got {}",
        trade.trade_id(),
        expected,
        message
    ))
}

/// Applies the state a peer message announces. A message the trade has already
/// moved past is consumed quietly; one that arrives too early is an error so it
/// is recorded instead of lost.
fn apply_peer_state(
    trade: &mut Trade,
    message: &str,
    target: TradeState,
) -> Result<(), EscrowError> {
    let from = trade.state();
    if trade.set_state_if_valid_transition_to(target) {
        return Ok(());
    }

    if from.can_reach(target) {
        debug!(
            "Trade w/ TradeID {} got {} message too early in {}",
            trade.trade_id(),
            message,
            from
        );
        return Err(EscrowError::InvalidTransition { from, to: target });
    }

    debug!(
        "Trade w/ TradeID {} already past {} in {}, {} message consumed",
        trade.trade_id(),
        target,
        from,
        message
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        task::Task,
        testing::{SomeTestTradeParams, TestDoubles},
    };

    fn seller_in_state(doubles: &TestDoubles, state: TradeState) -> Trade {
        let (tx_event_tx, _) = mpsc::channel(10);
        let mut data = SomeTestTradeParams::seller_data();
        data.state = state;
        data.deposit_tx_id = Some(SomeTestTradeParams::deposit_tx_id());
        let mut trade = Trade::new(data, doubles.process_model(tx_event_tx));
        trade.process_model_mut().trade_message = Some(TradeMessage::PaymentSent);
        trade
    }

    #[tokio::test]
    async fn test_payment_sent_accepted_before_own_deposit_confirmation() {
        let doubles = TestDoubles::new();
        let mut trade = seller_in_state(&doubles, TradeState::DepositSeenInNetwork);

        ProcessPaymentSentMessage.run(&mut trade).await.unwrap();

        assert_eq!(trade.state(), TradeState::PaymentSent);
        assert!(trade.process_model().trade_message.is_none());
    }

    #[tokio::test]
    async fn test_payment_sent_too_early_is_an_error() {
        let doubles = TestDoubles::new();
        let mut trade = seller_in_state(&doubles, TradeState::Preparation);

        let result = ProcessPaymentSentMessage.run(&mut trade).await;

        assert!(matches!(
            result,
            Err(EscrowError::InvalidTransition {
                from: TradeState::Preparation,
                to: TradeState::PaymentSent
            })
        ));
        assert_eq!(trade.state(), TradeState::Preparation);
    }

    #[tokio::test]
    async fn test_payment_sent_after_trade_moved_on_is_consumed() {
        let doubles = TestDoubles::new();
        let mut trade = seller_in_state(&doubles, TradeState::PaymentReceived);

        ProcessPaymentSentMessage.run(&mut trade).await.unwrap();

        assert_eq!(trade.state(), TradeState::PaymentReceived);
        assert_eq!(doubles.persistence.count(), 0);
    }
}
