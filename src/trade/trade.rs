use std::sync::Arc;

use strum_macros::{Display, IntoStaticStr};
use tokio::{
    select,
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use super::{
    data::{ProcessModel, Trade, TradeCollaborators, TradeData, TradeStateChange},
    state::TradeState,
};
use crate::{
    common::{error::EscrowError, types::TradeId},
    config::TradeConfig,
    fee::FeeServiceAccess,
    interface::{RequestPersistence, TradeMessage, TxEvent},
    protocol::{run_pipeline, ProtocolTrigger},
};

#[derive(Clone)]
pub struct TradeAccess {
    trade_id: TradeId,
    tx: mpsc::Sender<TradeRequest>,
}

impl TradeAccess {
    fn new(trade_id: TradeId, tx: mpsc::Sender<TradeRequest>) -> Self {
        Self { trade_id, tx }
    }

    pub fn trade_id(&self) -> TradeId {
        self.trade_id
    }

    pub async fn start(&self) -> Result<(), EscrowError> {
        self.run_protocol(ProtocolTrigger::Start).await
    }

    pub async fn confirm_payment_started(&self) -> Result<(), EscrowError> {
        self.run_protocol(ProtocolTrigger::ConfirmPaymentStarted).await
    }

    pub async fn confirm_payment_received(&self) -> Result<(), EscrowError> {
        self.run_protocol(ProtocolTrigger::ConfirmPaymentReceived).await
    }

    async fn run_protocol(&self, trigger: ProtocolTrigger) -> Result<(), EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), EscrowError>>();
        let request = TradeRequest::Protocol { trigger, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn handle_peer_message(&self, message: TradeMessage) -> Result<(), EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), EscrowError>>();
        let request = TradeRequest::PeerMessage { message, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn open_dispute(&self) -> Result<(), EscrowError> {
        self.transition_to(TradeState::DisputeOpened).await
    }

    pub async fn close_dispute(&self) -> Result<(), EscrowError> {
        self.transition_to(TradeState::DisputeClosed).await
    }

    pub async fn complete(&self) -> Result<(), EscrowError> {
        self.transition_to(TradeState::Completed).await
    }

    async fn transition_to(&self, state: TradeState) -> Result<(), EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), EscrowError>>();
        let request = TradeRequest::TransitionTo { state, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn query_state(&self) -> Result<TradeState, EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<TradeState>();
        let request = TradeRequest::QueryState { rsp_tx };
        self.tx.send(request).await?;
        Ok(rsp_rx.await?)
    }

    pub async fn query_data(&self) -> Result<TradeData, EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<TradeData>();
        let request = TradeRequest::QueryData { rsp_tx };
        self.tx.send(request).await?;
        Ok(rsp_rx.await?)
    }

    pub async fn subscribe_state(
        &self,
    ) -> Result<broadcast::Receiver<TradeStateChange>, EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<broadcast::Receiver<TradeStateChange>>();
        let request = TradeRequest::SubscribeState { rsp_tx };
        self.tx.send(request).await?;
        Ok(rsp_rx.await?)
    }

    pub async fn shutdown(&self) -> Result<(), EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<()>();
        let request = TradeRequest::Shutdown { rsp_tx };
        self.tx.send(request).await?; // Shutdown is allowed to fail if already shutdown
        Ok(rsp_rx.await?)
    }
}

pub(crate) struct TradeEngine {
    trade_id: TradeId,
    tx: mpsc::Sender<TradeRequest>,
    pub(crate) task_handle: JoinHandle<()>,
}

impl TradeEngine {
    const TRADE_REQUEST_CHANNEL_SIZE: usize = 10;
    const TX_EVENT_CHANNEL_SIZE: usize = 20;

    pub(crate) fn new(
        data: TradeData,
        fee_service: FeeServiceAccess,
        collaborators: TradeCollaborators,
        persistence: Arc<dyn RequestPersistence>,
        config: TradeConfig,
    ) -> Self {
        Self::spawn(data, fee_service, collaborators, persistence, config, false)
    }

    /// Resumes a persisted trade. Transaction listeners matching its state are
    /// registered again before any request is served.
    pub(crate) fn restore(
        data: TradeData,
        fee_service: FeeServiceAccess,
        collaborators: TradeCollaborators,
        persistence: Arc<dyn RequestPersistence>,
        config: TradeConfig,
    ) -> Self {
        Self::spawn(data, fee_service, collaborators, persistence, config, true)
    }

    fn spawn(
        data: TradeData,
        fee_service: FeeServiceAccess,
        collaborators: TradeCollaborators,
        persistence: Arc<dyn RequestPersistence>,
        config: TradeConfig,
        restored: bool,
    ) -> Self {
        let trade_id = data.trade_id;
        let (tx, rx) = mpsc::channel::<TradeRequest>(Self::TRADE_REQUEST_CHANNEL_SIZE);
        let (tx_event_tx, tx_event_rx) = mpsc::channel::<TxEvent>(Self::TX_EVENT_CHANNEL_SIZE);

        let process_model =
            ProcessModel::new(fee_service, collaborators, persistence, tx_event_tx, config);
        let trade = Trade::new(data, process_model);
        let actor = TradeActor::new(rx, tx_event_rx, trade);
        let task_handle = tokio::spawn(async move { actor.run(restored).await });

        Self {
            trade_id,
            tx,
            task_handle,
        }
    }

    pub(crate) fn new_accessor(&self) -> TradeAccess {
        TradeAccess::new(self.trade_id, self.tx.clone())
    }
}

#[derive(Display, IntoStaticStr)]
enum TradeRequest {
    Protocol {
        trigger: ProtocolTrigger,
        rsp_tx: oneshot::Sender<Result<(), EscrowError>>,
    },
    PeerMessage {
        message: TradeMessage,
        rsp_tx: oneshot::Sender<Result<(), EscrowError>>,
    },
    TransitionTo {
        state: TradeState,
        rsp_tx: oneshot::Sender<Result<(), EscrowError>>,
    },
    QueryState {
        rsp_tx: oneshot::Sender<TradeState>,
    },
    QueryData {
        rsp_tx: oneshot::Sender<TradeData>,
    },
    SubscribeState {
        rsp_tx: oneshot::Sender<broadcast::Receiver<TradeStateChange>>,
    },
    Shutdown {
        rsp_tx: oneshot::Sender<()>,
    },
}

struct TradeActor {
    rx: mpsc::Receiver<TradeRequest>,
    tx_event_rx: mpsc::Receiver<TxEvent>,
    trade: Trade,
}

impl TradeActor {
    fn new(
        rx: mpsc::Receiver<TradeRequest>,
        tx_event_rx: mpsc::Receiver<TxEvent>,
        trade: Trade,
    ) -> Self {
        TradeActor {
            rx,
            tx_event_rx,
            trade,
        }
    }

    async fn run(mut self, restored: bool) {
        if restored {
            if let Some(error) = run_pipeline(&mut self.trade, ProtocolTrigger::Restore)
                .await
                .err()
            {
                warn!(
                    "Trade w/ TradeID {} failed to restore tx listeners - {}",
                    self.trade.trade_id(),
                    error
                );
            }
        }

        loop {
            select! {
                biased;

                Some(event) = self.tx_event_rx.recv() => {
                    self.handle_tx_event(event).await;
                },
                request = self.rx.recv() => match request {
                    Some(request) => {
                        if self.handle_request(request).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.trade.unregister_listeners().await;
        info!("Trade w/ TradeID {} terminating", self.trade.trade_id());
    }

    // Bottom-up tx event handling

    async fn handle_tx_event(&mut self, event: TxEvent) {
        if self.trade.apply_tx_event(&event) {
            self.trade.release_finished_listeners().await;
        }
    }

    // Top-down Request Handling

    async fn handle_request(&mut self, request: TradeRequest) -> bool {
        let mut terminate = false;

        debug!(
            "Trade w/ TradeID {} handle_request() of type {}",
            self.trade.trade_id(),
            request
        );

        match request {
            TradeRequest::Protocol { trigger, rsp_tx } => {
                let result = run_pipeline(&mut self.trade, trigger).await;
                self.trade.release_finished_listeners().await;
                Self::respond(rsp_tx, result);
            }
            TradeRequest::PeerMessage { message, rsp_tx } => {
                self.handle_peer_message(message, rsp_tx).await;
            }
            TradeRequest::TransitionTo { state, rsp_tx } => {
                let result = self.trade.transition_to(state);
                self.trade.release_finished_listeners().await;
                Self::respond(rsp_tx, result);
            }
            TradeRequest::QueryState { rsp_tx } => {
                Self::respond(rsp_tx, self.trade.state());
            }
            TradeRequest::QueryData { rsp_tx } => {
                Self::respond(rsp_tx, self.trade.data().clone());
            }
            TradeRequest::SubscribeState { rsp_tx } => {
                Self::respond(rsp_tx, self.trade.subscribe_state());
            }
            TradeRequest::Shutdown { rsp_tx } => {
                Self::respond(rsp_tx, ());
                terminate = true;
            }
        }
        terminate
    }

    async fn handle_peer_message(
        &mut self,
        message: TradeMessage,
        rsp_tx: oneshot::Sender<Result<(), EscrowError>>,
    ) {
        debug!(
            "Trade w/ TradeID {} received {} message from peer {}",
            self.trade.trade_id(),
            message,
            self.trade.data().peer
        );

        let trigger = ProtocolTrigger::from(&message);
        self.trade.process_model_mut().trade_message = Some(message);
        let result = run_pipeline(&mut self.trade, trigger).await;

        // Never leave a message behind for the next pipeline
        self.trade.process_model_mut().trade_message = None;
        self.trade.release_finished_listeners().await;
        Self::respond(rsp_tx, result);
    }

    fn respond<T>(rsp_tx: oneshot::Sender<T>, response: T) {
        if rsp_tx.send(response).is_err() {
            trace!("Trade requester went away before the response");
        }
    }
}
