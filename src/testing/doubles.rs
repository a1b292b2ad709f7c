use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    common::{
        error::EscrowError,
        types::{Satoshis, TradeId, TxId},
    },
    config::{FeeServiceConfig, TradeConfig},
    fee::{FeeData, FeeProvider, FeeService},
    interface::{
        ObservedTx, PeerMessenger, RequestPersistence, TradeMessage, TradeWallet, TxEvent,
        TxListenerKind, TxObserver,
    },
    task::{Intercept, InterceptHook},
    trade::{ProcessModel, Trade, TradeCollaborators, TradeData},
};

/// Keeps every persisted snapshot in memory
#[derive(Default)]
pub struct RecordingPersistence {
    snapshots: Mutex<Vec<TradeData>>,
}

impl RecordingPersistence {
    pub fn snapshots(&self) -> Vec<TradeData> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<TradeData> {
        self.snapshots.lock().unwrap().last().cloned()
    }
}

impl RequestPersistence for RecordingPersistence {
    fn request_persistence(&self, trade: &TradeData) {
        self.snapshots.lock().unwrap().push(trade.clone());
    }
}

struct Listener {
    deposit_tx_id: TxId,
    events_tx: mpsc::Sender<TxEvent>,
}

/// Transaction observer driven by the test through `fire`
#[derive(Default)]
pub struct ManualTxObserver {
    listeners: Mutex<HashMap<(TradeId, TxListenerKind), Listener>>,
    registrations: AtomicUsize,
    fail_registration: AtomicBool,
}

impl ManualTxObserver {
    pub fn set_fail_registration(&self, fail: bool) {
        self.fail_registration.store(fail, Ordering::SeqCst);
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn is_registered(&self, trade_id: TradeId, kind: TxListenerKind) -> bool {
        self.listeners
            .lock()
            .unwrap()
            .contains_key(&(trade_id, kind))
    }

    pub fn watched_deposit_tx_id(&self, trade_id: TradeId, kind: TxListenerKind) -> Option<TxId> {
        self.listeners
            .lock()
            .unwrap()
            .get(&(trade_id, kind))
            .map(|listener| listener.deposit_tx_id.clone())
    }

    /// Delivers an event to the registered listener. False if nobody listens.
    pub async fn fire(
        &self,
        trade_id: TradeId,
        kind: TxListenerKind,
        tx_id: TxId,
        confirmations: u32,
    ) -> bool {
        let events_tx = self
            .listeners
            .lock()
            .unwrap()
            .get(&(trade_id, kind))
            .map(|listener| listener.events_tx.clone());

        let Some(events_tx) = events_tx else {
            return false;
        };

        let event = TxEvent {
            trade_id,
            kind,
            tx: ObservedTx {
                tx_id,
                confirmations,
            },
        };
        events_tx.send(event).await.is_ok()
    }
}

#[async_trait]
impl TxObserver for ManualTxObserver {
    async fn register_listener(
        &self,
        trade_id: TradeId,
        kind: TxListenerKind,
        deposit_tx_id: TxId,
        events_tx: mpsc::Sender<TxEvent>,
    ) -> Result<(), EscrowError> {
        if self.fail_registration.load(Ordering::SeqCst) {
            return Err(EscrowError::TxObserver(
                "Observer refused the registration".to_string(),
            ));
        }
        self.registrations.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().insert(
            (trade_id, kind),
            Listener {
                deposit_tx_id,
                events_tx,
            },
        );
        Ok(())
    }

    async fn unregister_listener(
        &self,
        trade_id: TradeId,
        kind: TxListenerKind,
    ) -> Result<(), EscrowError> {
        self.listeners.lock().unwrap().remove(&(trade_id, kind));
        Ok(())
    }
}

/// Records outgoing peer messages instead of sending them
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(TradeId, String, TradeMessage)>>,
    fail: AtomicBool,
}

impl RecordingMessenger {
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(TradeId, String, TradeMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<TradeMessage> {
        self.sent()
            .into_iter()
            .map(|(_, _, message)| message)
            .collect()
    }

    pub fn take_messages(&self) -> Vec<TradeMessage> {
        self.sent
            .lock()
            .unwrap()
            .drain(..)
            .map(|(_, _, message)| message)
            .collect()
    }
}

#[async_trait]
impl PeerMessenger for RecordingMessenger {
    async fn send_message(
        &self,
        trade_id: TradeId,
        peer: &str,
        message: TradeMessage,
    ) -> Result<(), EscrowError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EscrowError::PeerMessaging(format!(
                "Peer {} unreachable",
                peer
            )));
        }
        self.sent
            .lock()
            .unwrap()
            .push((trade_id, peer.to_string(), message));
        Ok(())
    }
}

/// Wallet handing out fixed transaction ids
pub struct StubWallet {
    deposit_tx_id: TxId,
    payout_tx_id: TxId,
    fail_deposit: AtomicBool,
    published_fees: Mutex<Vec<Satoshis>>,
}

impl StubWallet {
    pub fn new(deposit_tx_id: TxId, payout_tx_id: TxId) -> Self {
        Self {
            deposit_tx_id,
            payout_tx_id,
            fail_deposit: AtomicBool::new(false),
            published_fees: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fail_deposit(&self, fail: bool) {
        self.fail_deposit.store(fail, Ordering::SeqCst);
    }

    /// Fees of every published transaction, in publishing order
    pub fn published_fees(&self) -> Vec<Satoshis> {
        self.published_fees.lock().unwrap().clone()
    }
}

#[async_trait]
impl TradeWallet for StubWallet {
    async fn publish_deposit_tx(
        &self,
        _trade: &TradeData,
        tx_fee: Satoshis,
    ) -> Result<TxId, EscrowError> {
        if self.fail_deposit.load(Ordering::SeqCst) {
            return Err(EscrowError::Wallet("Insufficient funds".to_string()));
        }
        self.published_fees.lock().unwrap().push(tx_fee);
        Ok(self.deposit_tx_id.clone())
    }

    async fn publish_payout_tx(
        &self,
        _trade: &TradeData,
        tx_fee: Satoshis,
    ) -> Result<TxId, EscrowError> {
        self.published_fees.lock().unwrap().push(tx_fee);
        Ok(self.payout_tx_id.clone())
    }
}

/// Fee provider answering with fixed figures
pub struct StaticFeeProvider {
    fee_data: FeeData,
    fetches: AtomicUsize,
}

impl StaticFeeProvider {
    pub fn new(fees_timestamp: u64, tx_fee_per_vbyte: u64, min_fee_per_vbyte: u64) -> Self {
        Self {
            fee_data: FeeData::new(fees_timestamp, tx_fee_per_vbyte, min_fee_per_vbyte),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Default for StaticFeeProvider {
    fn default() -> Self {
        Self::new(1_700_000_000, 10, 2)
    }
}

#[async_trait]
impl FeeProvider for StaticFeeProvider {
    async fn get_fees(&self) -> Result<FeeData, EscrowError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.fee_data.clone())
    }
}

/// Fails the named task before it runs
pub struct FailBeforeTask {
    task_name: &'static str,
}

impl FailBeforeTask {
    pub fn new(task_name: &'static str) -> Self {
        Self { task_name }
    }
}

impl<M> InterceptHook<M> for FailBeforeTask {
    fn before_task(&self, task_name: &'static str, _model: &M) -> Intercept {
        if task_name == self.task_name {
            Intercept::Fail(format!("{} intercepted", task_name))
        } else {
            Intercept::Proceed
        }
    }
}

/// One set of doubles for a single trade party. Needs a tokio runtime.
pub struct TestDoubles {
    pub persistence: Arc<RecordingPersistence>,
    pub tx_observer: Arc<ManualTxObserver>,
    pub messenger: Arc<RecordingMessenger>,
    pub wallet: Arc<StubWallet>,
    pub fee_provider: Arc<StaticFeeProvider>,
    pub fee_service: FeeService,
    pub intercept_hook: Option<Arc<dyn InterceptHook<Trade>>>,
}

impl TestDoubles {
    pub fn new() -> Self {
        let fee_provider = Arc::new(StaticFeeProvider::default());
        let fee_service = FeeService::new(fee_provider.clone(), FeeServiceConfig::default());

        Self {
            persistence: Arc::new(RecordingPersistence::default()),
            tx_observer: Arc::new(ManualTxObserver::default()),
            messenger: Arc::new(RecordingMessenger::default()),
            wallet: Arc::new(StubWallet::new(
                super::SomeTestTradeParams::deposit_tx_id(),
                super::SomeTestTradeParams::payout_tx_id(),
            )),
            fee_provider,
            fee_service,
            intercept_hook: None,
        }
    }

    pub fn collaborators(&self) -> TradeCollaborators {
        TradeCollaborators {
            wallet: self.wallet.clone(),
            messenger: self.messenger.clone(),
            tx_observer: self.tx_observer.clone(),
            intercept_hook: self.intercept_hook.clone(),
        }
    }

    pub fn process_model(&self, tx_event_tx: mpsc::Sender<TxEvent>) -> ProcessModel {
        ProcessModel::new(
            self.fee_service.new_accessor(),
            self.collaborators(),
            self.persistence.clone(),
            tx_event_tx,
            TradeConfig::default(),
        )
    }
}

impl Default for TestDoubles {
    fn default() -> Self {
        Self::new()
    }
}
