use strum_macros::{Display, IntoStaticStr};
use tracing::debug;

use super::tasks::*;
use crate::{
    common::{error::EscrowError, types::TradeRole},
    interface::TradeMessage,
    task::{RunnerStatus, TaskRunner, TaskSequence},
    trade::Trade,
};

/// What started a pipeline on a trade
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, IntoStaticStr)]
pub enum ProtocolTrigger {
    Start,
    DepositTxPublishedMessage,
    ConfirmPaymentStarted,
    PaymentSentMessage,
    ConfirmPaymentReceived,
    PayoutTxPublishedMessage,
    Restore,
}

impl From<&TradeMessage> for ProtocolTrigger {
    fn from(message: &TradeMessage) -> Self {
        match message {
            TradeMessage::DepositTxPublished { .. } => ProtocolTrigger::DepositTxPublishedMessage,
            TradeMessage::PaymentSent => ProtocolTrigger::PaymentSentMessage,
            TradeMessage::PayoutTxPublished { .. } => ProtocolTrigger::PayoutTxPublishedMessage,
        }
    }
}

pub fn pipeline_for(
    role: TradeRole,
    trigger: ProtocolTrigger,
) -> Result<TaskSequence<Trade>, EscrowError> {
    let sequence = match (role, trigger) {
        (TradeRole::Seller, ProtocolTrigger::Start) => TaskSequence::new()
            .then::<CalculateTxFees>()
            .then::<PublishDepositTx>()
            .then::<SendDepositTxPublishedMessage>()
            .then::<SetupDepositTxListener>(),
        (TradeRole::Buyer, ProtocolTrigger::Start) => {
            TaskSequence::new().then::<CalculateTxFees>()
        }
        (TradeRole::Buyer, ProtocolTrigger::DepositTxPublishedMessage) => TaskSequence::new()
            .then::<ProcessDepositTxPublishedMessage>()
            .then::<SetupDepositTxListener>(),
        (TradeRole::Buyer, ProtocolTrigger::ConfirmPaymentStarted) => TaskSequence::new()
            .then::<SendPaymentSentMessage>()
            .then::<SetupPayoutTxListener>(),
        (TradeRole::Seller, ProtocolTrigger::PaymentSentMessage) => {
            TaskSequence::new().then::<ProcessPaymentSentMessage>()
        }
        (TradeRole::Seller, ProtocolTrigger::ConfirmPaymentReceived) => TaskSequence::new()
            .then::<ConfirmPaymentReceipt>()
            .then::<PublishPayoutTx>()
            .then::<SendPayoutTxPublishedMessage>()
            .then::<SetupPayoutTxListener>(),
        (TradeRole::Buyer, ProtocolTrigger::PayoutTxPublishedMessage) => {
            TaskSequence::new().then::<ProcessPayoutTxPublishedMessage>()
        }
        (_, ProtocolTrigger::Restore) => TaskSequence::new().then::<RestoreTxListeners>(),
        (role, trigger) => {
            return Err(EscrowError::Config(format!(
                "{} trigger is not valid for a {}",
                trigger, role
            )));
        }
    };
    Ok(sequence)
}

/// Runs the pipeline for `trigger` to the end. A failed pipeline has already
/// been recorded on the trade when this returns `PipelineFailed`.
pub async fn run_pipeline(trade: &mut Trade, trigger: ProtocolTrigger) -> Result<(), EscrowError> {
    let sequence = pipeline_for(trade.role(), trigger)?;

    let mut runner = TaskRunner::new(
        sequence,
        move |trade: &mut Trade| {
            debug!(
                "Trade w/ TradeID {} completed {} pipeline",
                trade.trade_id(),
                trigger
            );
            trade.request_persistence();
        },
        |trade: &mut Trade, error_message, _error| trade.handle_pipeline_failure(error_message),
    )?;

    if let Some(intercept_hook) = trade.process_model().intercept_hook.clone() {
        runner = runner.with_intercept_hook(intercept_hook);
    }

    match runner.run(trade).await? {
        RunnerStatus::Completed => Ok(()),
        status => Err(EscrowError::PipelineFailed(
            trade
                .data()
                .error_message
                .clone()
                .unwrap_or_else(|| format!("{} pipeline ended as {}", trigger, status)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seller_start_pipeline() {
        let sequence = pipeline_for(TradeRole::Seller, ProtocolTrigger::Start).unwrap();
        assert_eq!(
            sequence.task_names(),
            vec![
                "CalculateTxFees",
                "PublishDepositTx",
                "SendDepositTxPublishedMessage",
                "SetupDepositTxListener"
            ]
        );
    }

    #[test]
    fn test_buyer_confirm_payment_started_pipeline() {
        let sequence =
            pipeline_for(TradeRole::Buyer, ProtocolTrigger::ConfirmPaymentStarted).unwrap();
        assert_eq!(
            sequence.task_names(),
            vec!["SendPaymentSentMessage", "SetupPayoutTxListener"]
        );
    }

    #[test]
    fn test_seller_confirm_payment_received_pipeline() {
        let sequence =
            pipeline_for(TradeRole::Seller, ProtocolTrigger::ConfirmPaymentReceived).unwrap();
        assert_eq!(
            sequence.task_names(),
            vec![
                "ConfirmPaymentReceipt",
                "PublishPayoutTx",
                "SendPayoutTxPublishedMessage",
                "SetupPayoutTxListener"
            ]
        );
    }

    #[test]
    fn test_wrong_role_is_config_error() {
        let invalid = [
            (TradeRole::Seller, ProtocolTrigger::ConfirmPaymentStarted),
            (TradeRole::Seller, ProtocolTrigger::DepositTxPublishedMessage),
            (TradeRole::Seller, ProtocolTrigger::PayoutTxPublishedMessage),
            (TradeRole::Buyer, ProtocolTrigger::ConfirmPaymentReceived),
            (TradeRole::Buyer, ProtocolTrigger::PaymentSentMessage),
        ];
        for (role, trigger) in invalid {
            assert!(
                matches!(pipeline_for(role, trigger), Err(EscrowError::Config(_))),
                "{} / {}",
                role,
                trigger
            );
        }
    }

    #[test]
    fn test_restore_valid_for_any_role() {
        for role in [TradeRole::Buyer, TradeRole::Seller] {
            let sequence = pipeline_for(role, ProtocolTrigger::Restore).unwrap();
            assert_eq!(sequence.task_names(), vec!["RestoreTxListeners"]);
        }
    }

    #[test]
    fn test_trigger_from_message() {
        assert_eq!(
            ProtocolTrigger::from(&TradeMessage::PaymentSent),
            ProtocolTrigger::PaymentSentMessage
        );
        assert_eq!(
            ProtocolTrigger::from(&TradeMessage::PayoutTxPublished {
                payout_tx_id: "payout".into()
            }),
            ProtocolTrigger::PayoutTxPublishedMessage
        );
    }
}
