use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{common::error::EscrowError, task::Task, trade::Trade};

#[derive(Default)]
pub struct CalculateTxFees;

#[async_trait]
impl Task<Trade> for CalculateTxFees {
    fn name(&self) -> &'static str {
        "CalculateTxFees"
    }

    async fn run(&mut self, trade: &mut Trade) -> Result<(), EscrowError> {
        let process_model = trade.process_model();
        let fee_service = &process_model.fee_service;

        if !fee_service.is_fee_data_available() {
            warn!(
                "Trade w/ TradeID {} calculating fees from default fee figures",
                trade.trade_id()
            );
        }

        let deposit_tx_fee = fee_service.tx_fee(process_model.config.deposit_tx_vsize);
        let payout_tx_fee = fee_service.tx_fee(process_model.config.payout_tx_vsize);
        let trade_fee = fee_service.trading_fee(trade.data().side, trade.data().amount);

        debug!(
            "Trade w/ TradeID {} deposit tx fee {} sat, payout tx fee {} sat, trade fee {} sat",
            trade.trade_id(),
            deposit_tx_fee,
            payout_tx_fee,
            trade_fee
        );

        trade.set_tx_fees(deposit_tx_fee, payout_tx_fee);
        trade.set_trade_fee(trade_fee);
        Ok(())
    }
}
