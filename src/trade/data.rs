use std::{collections::HashSet, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use super::state::TradeState;
use crate::{
    common::{
        error::EscrowError,
        types::{Satoshis, TradeId, TradeRole, TradeSide, TxId},
    },
    config::TradeConfig,
    fee::FeeServiceAccess,
    interface::{
        PeerMessenger, RequestPersistence, TradeMessage, TradeWallet, TxEvent, TxListenerKind,
        TxObserver,
    },
    task::InterceptHook,
};

/// Persisted snapshot of a trade
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeData {
    pub trade_id: TradeId,
    pub role: TradeRole,
    pub side: TradeSide,
    pub amount: Satoshis,
    pub peer: String,
    pub state: TradeState,
    pub deposit_tx_id: Option<TxId>,
    pub payout_tx_id: Option<TxId>,
    pub deposit_tx_fee: Option<Satoshis>,
    pub payout_tx_fee: Option<Satoshis>,
    pub trade_fee: Option<Satoshis>,
    pub error_message: Option<String>,
}

impl TradeData {
    pub fn new(
        trade_id: TradeId,
        role: TradeRole,
        side: TradeSide,
        amount: Satoshis,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            trade_id,
            role,
            side,
            amount,
            peer: peer.into(),
            state: TradeState::Preparation,
            deposit_tx_id: None,
            payout_tx_id: None,
            deposit_tx_fee: None,
            payout_tx_fee: None,
            trade_fee: None,
            error_message: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TradeStateChange {
    pub trade_id: TradeId,
    pub from: TradeState,
    pub to: TradeState,
}

/// External services a trade is wired to
#[derive(Clone)]
pub struct TradeCollaborators {
    pub wallet: Arc<dyn TradeWallet>,
    pub messenger: Arc<dyn PeerMessenger>,
    pub tx_observer: Arc<dyn TxObserver>,
    pub intercept_hook: Option<Arc<dyn InterceptHook<Trade>>>,
}

pub struct ProcessModel {
    pub fee_service: FeeServiceAccess,
    pub wallet: Arc<dyn TradeWallet>,
    pub messenger: Arc<dyn PeerMessenger>,
    pub tx_observer: Arc<dyn TxObserver>,
    pub persistence: Arc<dyn RequestPersistence>,
    pub intercept_hook: Option<Arc<dyn InterceptHook<Trade>>>,
    /// Handed to the observer so events land in the owning trade's mailbox
    pub tx_event_tx: mpsc::Sender<TxEvent>,
    pub active_listeners: HashSet<TxListenerKind>,
    pub trade_message: Option<TradeMessage>,
    pub config: TradeConfig,
}

impl ProcessModel {
    pub fn new(
        fee_service: FeeServiceAccess,
        collaborators: TradeCollaborators,
        persistence: Arc<dyn RequestPersistence>,
        tx_event_tx: mpsc::Sender<TxEvent>,
        config: TradeConfig,
    ) -> Self {
        Self {
            fee_service,
            wallet: collaborators.wallet,
            messenger: collaborators.messenger,
            tx_observer: collaborators.tx_observer,
            persistence,
            intercept_hook: collaborators.intercept_hook,
            tx_event_tx,
            active_listeners: HashSet::new(),
            trade_message: None,
            config,
        }
    }
}

/// The trade model tasks operate on. State only changes through the
/// transition guard.
pub struct Trade {
    data: TradeData,
    process_model: ProcessModel,
    state_tx: broadcast::Sender<TradeStateChange>,
}

impl Trade {
    const TRADE_STATE_CHANNEL_SIZE: usize = 20;

    pub fn new(data: TradeData, process_model: ProcessModel) -> Self {
        let (state_tx, _) = broadcast::channel(Self::TRADE_STATE_CHANNEL_SIZE);
        Self {
            data,
            process_model,
            state_tx,
        }
    }

    // Getter methods

    pub fn trade_id(&self) -> TradeId {
        self.data.trade_id
    }

    pub fn role(&self) -> TradeRole {
        self.data.role
    }

    pub fn state(&self) -> TradeState {
        self.data.state
    }

    pub fn data(&self) -> &TradeData {
        &self.data
    }

    pub fn process_model(&self) -> &ProcessModel {
        &self.process_model
    }

    pub fn process_model_mut(&mut self) -> &mut ProcessModel {
        &mut self.process_model
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<TradeStateChange> {
        self.state_tx.subscribe()
    }

    // Setter methods

    pub fn set_deposit_tx_id(&mut self, deposit_tx_id: TxId) {
        self.data.deposit_tx_id = Some(deposit_tx_id);
    }

    pub fn set_payout_tx_id(&mut self, payout_tx_id: TxId) {
        self.data.payout_tx_id = Some(payout_tx_id);
    }

    pub fn set_tx_fees(&mut self, deposit_tx_fee: Satoshis, payout_tx_fee: Satoshis) {
        self.data.deposit_tx_fee = Some(deposit_tx_fee);
        self.data.payout_tx_fee = Some(payout_tx_fee);
    }

    pub fn set_trade_fee(&mut self, trade_fee: Satoshis) {
        self.data.trade_fee = Some(trade_fee);
    }

    pub fn set_error_message(&mut self, error_message: impl Into<String>) {
        self.data.error_message = Some(error_message.into());
    }

    // State guard

    /// Applies `new_state` only if the transition table allows it. An applied
    /// transition is broadcast once and persisted once.
    pub fn set_state_if_valid_transition_to(&mut self, new_state: TradeState) -> bool {
        let from = self.data.state;
        if !from.can_transition_to(new_state) {
            warn!(
                "Trade w/ TradeID {} cannot transition from {} to {}, ignoring",
                self.data.trade_id, from, new_state
            );
            return false;
        }

        self.data.state = new_state;
        info!(
            "Trade w/ TradeID {} transitioned from {} to {}",
            self.data.trade_id, from, new_state
        );

        let change = TradeStateChange {
            trade_id: self.data.trade_id,
            from,
            to: new_state,
        };
        if self.state_tx.send(change).is_err() {
            trace!(
                "Trade w/ TradeID {} has no state subscribers",
                self.data.trade_id
            );
        }

        self.request_persistence();
        true
    }

    pub fn transition_to(&mut self, new_state: TradeState) -> Result<(), EscrowError> {
        let from = self.data.state;
        if self.set_state_if_valid_transition_to(new_state) {
            Ok(())
        } else {
            Err(EscrowError::InvalidTransition {
                from,
                to: new_state,
            })
        }
    }

    pub fn request_persistence(&self) {
        self.process_model
            .persistence
            .request_persistence(&self.data);
    }

    /// Maps a blockchain event to its protocol state and applies it through the
    /// guard. Duplicate and late events are rejected by the guard.
    pub fn apply_tx_event(&mut self, event: &TxEvent) -> bool {
        if event.trade_id != self.data.trade_id {
            warn!(
                "Trade w/ TradeID {} received {} event for TradeID {}, ignoring",
                self.data.trade_id, event.kind, event.trade_id
            );
            return false;
        }

        debug!(
            "Trade w/ TradeID {} received {} event for tx {} w/ {} confirmations",
            self.data.trade_id, event.kind, event.tx.tx_id, event.tx.confirmations
        );

        match event.kind {
            TxListenerKind::Deposit => {
                let target = if event.tx.confirmations == 0 {
                    TradeState::DepositSeenInNetwork
                } else {
                    TradeState::DepositConfirmed
                };
                self.set_state_if_valid_transition_to(target)
            }
            TxListenerKind::Payout => {
                let target = TradeState::PayoutSeenInNetwork;
                if self.data.state.can_transition_to(target) {
                    // Recorded first so the persisted snapshot carries it
                    self.data.payout_tx_id = Some(event.tx.tx_id.clone());
                }
                self.set_state_if_valid_transition_to(target)
            }
        }
    }

    /// Failure continuation of every protocol pipeline
    pub fn handle_pipeline_failure(&mut self, error_message: String) {
        self.set_error_message(error_message);
        if self.data.state == TradeState::Preparation {
            // The guard persists on success
            if self.set_state_if_valid_transition_to(TradeState::Failed) {
                return;
            }
        }
        self.request_persistence();
    }

    pub async fn register_listener(&mut self, kind: TxListenerKind) -> Result<(), EscrowError> {
        if self.process_model.active_listeners.contains(&kind) {
            debug!(
                "Trade w/ TradeID {} already has an active {} listener",
                self.data.trade_id, kind
            );
            return Ok(());
        }

        if self.data.state.is_terminal() {
            debug!(
                "Trade w/ TradeID {} is {}, not registering {} listener",
                self.data.trade_id, self.data.state, kind
            );
            return Ok(());
        }

        let Some(deposit_tx_id) = self.data.deposit_tx_id.clone() else {
            return Err(EscrowError::TxObserver(format!(
                "Trade w/ TradeID {} has no deposit tx to watch",
                self.data.trade_id
            )));
        };

        self.process_model
            .tx_observer
            .register_listener(
                self.data.trade_id,
                kind,
                deposit_tx_id,
                self.process_model.tx_event_tx.clone(),
            )
            .await?;
        self.process_model.active_listeners.insert(kind);

        debug!(
            "Trade w/ TradeID {} registered {} listener",
            self.data.trade_id, kind
        );
        Ok(())
    }

    pub async fn unregister_listener(&mut self, kind: TxListenerKind) {
        if !self.process_model.active_listeners.remove(&kind) {
            return;
        }
        if let Some(error) = self
            .process_model
            .tx_observer
            .unregister_listener(self.data.trade_id, kind)
            .await
            .err()
        {
            warn!(
                "Trade w/ TradeID {} failed to unregister {} listener - {}",
                self.data.trade_id, kind, error
            );
        }
    }

    pub async fn unregister_listeners(&mut self) {
        let kinds: Vec<TxListenerKind> =
            self.process_model.active_listeners.iter().copied().collect();
        for kind in kinds {
            self.unregister_listener(kind).await;
        }
    }

    /// Drops listeners whose events can no longer move the trade: all of them
    /// once terminal, the deposit listener once the deposit is confirmed.
    pub async fn release_finished_listeners(&mut self) {
        let state = self.data.state;
        if state.is_terminal() {
            if !self.process_model.active_listeners.is_empty() {
                debug!(
                    "Trade w/ TradeID {} is {}, removing tx listeners",
                    self.data.trade_id, state
                );
                self.unregister_listeners().await;
            }
        } else if !state.awaits_deposit_confirmation()
            && self
                .process_model
                .active_listeners
                .contains(&TxListenerKind::Deposit)
        {
            debug!(
                "Trade w/ TradeID {} is {}, removing deposit listener",
                self.data.trade_id, state
            );
            self.unregister_listener(TxListenerKind::Deposit).await;
        }
    }
}
