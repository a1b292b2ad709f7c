use crusty_escrow::{
    common::error::EscrowError,
    config::EscrowConfig,
    manager::TradeManager,
    testing::TestDoubles,
    trade::{TradeAccess, TradeData, TradeState},
};
use tempfile::TempDir;

/// One side of a trade: its own manager, doubles and trade handle
pub struct TradeParty {
    pub doubles: TestDoubles,
    pub manager: TradeManager,
    pub trade: TradeAccess,
    _data_dir: TempDir,
}

impl TradeParty {
    pub async fn start(data: TradeData) -> Self {
        let doubles = TestDoubles::new();
        let data_dir = tempfile::tempdir().unwrap();
        let config = EscrowConfig {
            data_dir: data_dir.path().to_path_buf(),
            ..Default::default()
        };

        let manager = TradeManager::with_persistence(
            config,
            doubles.fee_provider.clone(),
            doubles.collaborators(),
            doubles.persistence.clone(),
        );
        manager.initialize().await.unwrap();

        // Trades should price from fetched fees, not the defaults
        let mut fee_rx = manager.fee_service().subscribe();
        fee_rx
            .wait_for(|snapshot| snapshot.update_counter > 0)
            .await
            .unwrap();

        let trade = manager.new_trade(data).await.unwrap();

        Self {
            doubles,
            manager,
            trade,
            _data_dir: data_dir,
        }
    }

    /// Hands every message this party sent over to the other party's trade
    pub async fn deliver_messages_to(&self, other: &TradeParty) -> Result<usize, EscrowError> {
        let messages = self.doubles.messenger.take_messages();
        let count = messages.len();
        for message in messages {
            other.trade.handle_peer_message(message).await?;
        }
        Ok(count)
    }

    pub async fn state(&self) -> TradeState {
        self.trade.query_state().await.unwrap()
    }
}
