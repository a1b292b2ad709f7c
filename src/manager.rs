use std::{collections::HashMap, fs, sync::Arc};

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::{
    common::{error::EscrowError, persist::Persister, types::TradeId},
    config::EscrowConfig,
    fee::{FeeProvider, FeeService, FeeServiceAccess},
    interface::RequestPersistence,
    trade::{TradeAccess, TradeCollaborators, TradeData, TradeEngine},
};

/// Owns the fee service, the file persister and every trade actor of this
/// process
pub struct TradeManager {
    config: EscrowConfig,
    fee_service: FeeService,
    collaborators: TradeCollaborators,
    persistence: Arc<dyn RequestPersistence>,
    persister: Option<Arc<Persister>>,
    trades: RwLock<HashMap<TradeId, TradeEngine>>,
}

impl TradeManager {
    // Constructors

    /// Trades are persisted to and restored from `config.data_dir`, which is
    /// created if missing
    pub fn new(
        config: EscrowConfig,
        fee_provider: Arc<dyn FeeProvider>,
        collaborators: TradeCollaborators,
    ) -> Result<Self, EscrowError> {
        fs::create_dir_all(&config.data_dir)?;
        let persister = Arc::new(Persister::new(&config.data_dir));
        debug!("Trade manager persisting to {}", config.data_dir.display());

        Ok(Self::build(
            config,
            fee_provider,
            collaborators,
            persister.clone(),
            Some(persister),
        ))
    }

    /// Persists through `persistence` instead of the data directory. Nothing
    /// written this way is found by `restore_trades`.
    pub fn with_persistence(
        config: EscrowConfig,
        fee_provider: Arc<dyn FeeProvider>,
        collaborators: TradeCollaborators,
        persistence: Arc<dyn RequestPersistence>,
    ) -> Self {
        Self::build(config, fee_provider, collaborators, persistence, None)
    }

    fn build(
        config: EscrowConfig,
        fee_provider: Arc<dyn FeeProvider>,
        collaborators: TradeCollaborators,
        persistence: Arc<dyn RequestPersistence>,
        persister: Option<Arc<Persister>>,
    ) -> Self {
        let fee_service = FeeService::new(fee_provider, config.fee.clone());

        TradeManager {
            config,
            fee_service,
            collaborators,
            persistence,
            persister,
            trades: RwLock::new(HashMap::new()),
        }
    }

    /// Starts periodic fee refreshes and brings back every persisted trade
    pub async fn initialize(&self) -> Result<Vec<TradeId>, EscrowError> {
        self.fee_service.new_accessor().initialize().await?;
        self.restore_trades().await
    }

    pub fn fee_service(&self) -> FeeServiceAccess {
        self.fee_service.new_accessor()
    }

    // Trade Management

    pub async fn new_trade(&self, data: TradeData) -> Result<TradeAccess, EscrowError> {
        let trade_id = data.trade_id;
        let mut trades = self.trades.write().await;
        if trades.contains_key(&trade_id) {
            return Err(EscrowError::TradeExists(trade_id));
        }

        self.persistence.request_persistence(&data);
        let engine = TradeEngine::new(
            data,
            self.fee_service.new_accessor(),
            self.collaborators.clone(),
            self.persistence.clone(),
            self.config.trade.clone(),
        );
        let accessor = engine.new_accessor();
        trades.insert(trade_id, engine);

        info!("Trade w/ TradeID {} created", trade_id);
        Ok(accessor)
    }

    pub async fn trade(&self, trade_id: TradeId) -> Result<TradeAccess, EscrowError> {
        self.trades
            .read()
            .await
            .get(&trade_id)
            .map(|engine| engine.new_accessor())
            .ok_or(EscrowError::TradeNotFound(trade_id))
    }

    pub async fn trades(&self) -> HashMap<TradeId, TradeAccess> {
        self.trades
            .read()
            .await
            .iter()
            .map(|(trade_id, engine)| (*trade_id, engine.new_accessor()))
            .collect()
    }

    /// Restores trades persisted under the data directory that are not already
    /// running. Unreadable snapshots are skipped.
    pub async fn restore_trades(&self) -> Result<Vec<TradeId>, EscrowError> {
        let data_dir = &self.config.data_dir;
        if !data_dir.exists() {
            debug!(
                "Data directory {} does not exist, nothing to restore",
                data_dir.display()
            );
            return Ok(Vec::new());
        }

        let mut restored = Vec::new();
        let mut trades = self.trades.write().await;

        for data_path in Persister::trade_data_paths(data_dir)? {
            let data = match Persister::restore(&data_path) {
                Ok(data) => data,
                Err(error) => {
                    error!(
                        "Failed to restore trade from {} - {}",
                        data_path.display(),
                        error
                    );
                    continue;
                }
            };

            let trade_id = data.trade_id;
            if trades.contains_key(&trade_id) {
                debug!("Trade w/ TradeID {} already running", trade_id);
                continue;
            }

            info!("Trade w/ TradeID {} restored in {}", trade_id, data.state);
            let engine = TradeEngine::restore(
                data,
                self.fee_service.new_accessor(),
                self.collaborators.clone(),
                self.persistence.clone(),
                self.config.trade.clone(),
            );
            trades.insert(trade_id, engine);
            restored.push(trade_id);
        }
        Ok(restored)
    }

    pub async fn shutdown(self) -> Result<(), EscrowError> {
        let trades = self.trades.into_inner();
        for (trade_id, engine) in trades {
            if let Some(error) = engine.new_accessor().shutdown().await.err() {
                warn!("Trade w/ TradeID {} shutdown failed - {}", trade_id, error);
            }
            if let Some(error) = engine.task_handle.await.err() {
                error!("Trade w/ TradeID {} actor failed - {}", trade_id, error);
            }
        }

        // Trade actors are gone, so every snapshot is queued by now
        if let Some(persister) = self.persister {
            persister.terminate();
        }

        self.fee_service.new_accessor().shutdown().await?;
        if let Some(error) = self.fee_service.task_handle.await.err() {
            error!("Fee service actor failed - {}", error);
        }
        info!("Trade manager shut down");
        Ok(())
    }
}
