use uuid::Uuid;

use crate::{
    common::types::{Satoshis, TradeId, TradeRole, TradeSide, TxId},
    trade::TradeData,
};

pub struct SomeTestTradeParams {}

impl SomeTestTradeParams {
    pub fn trade_id() -> TradeId {
        Uuid::from_u128(0x20c38e4b_037b_4654_b99c_1d9f2beb755f)
    }

    pub fn amount() -> Satoshis {
        10_000_000 // 0.1 BTC
    }

    pub fn deposit_tx_id() -> TxId {
        TxId::new("4f2b9c1e7d3a5b8f0c6e2a9d1b7f3c5e8a0d4b6f2c9e1a7d3b5f8c0e6a2d9b1f")
    }

    pub fn payout_tx_id() -> TxId {
        TxId::new("9a1d7b3f5c8e0a6d2b9f1c7e3a5d8b0f6c2e9a1d7b3f5c8e0a6d2b9f1c7e3a5d")
    }

    pub fn seller_peer() -> String {
        "seller7xq2vq3sxb.onion:9999".to_string()
    }

    pub fn buyer_peer() -> String {
        "buyerk4mfj2nq6tc.onion:9999".to_string()
    }

    /// Seller as maker, talking to the buyer
    pub fn seller_data() -> TradeData {
        TradeData::new(
            Self::trade_id(),
            TradeRole::Seller,
            TradeSide::Maker,
            Self::amount(),
            Self::buyer_peer(),
        )
    }

    /// Buyer as taker, talking to the seller
    pub fn buyer_data() -> TradeData {
        TradeData::new(
            Self::trade_id(),
            TradeRole::Buyer,
            TradeSide::Taker,
            Self::amount(),
            Self::seller_peer(),
        )
    }
}
