use std::{panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use strum_macros::{Display, IntoStaticStr};
use tokio::{
    select,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, trace, warn};

use super::provider::{FeeData, FeeFigures, FeeProvider};
use crate::{
    common::{
        error::EscrowError,
        types::{Satoshis, TradeSide, SATOSHIS_PER_BTC},
    },
    config::{FeeServiceConfig, TradingFeeSchedule},
};

/// Committed fee figures. Readers only ever observe whole snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeSnapshot {
    pub tx_fee_per_vbyte: u64,
    pub min_fee_per_vbyte: u64,
    pub fees_timestamp: Option<u64>,
    pub update_counter: u64,
}

/// Both outcomes count as success, callers need not tell them apart
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum FeeRefresh {
    Fetched,
    Throttled,
}

type RefreshResponder = oneshot::Sender<Result<FeeRefresh, EscrowError>>;

#[derive(Clone)]
pub struct FeeServiceAccess {
    tx: mpsc::Sender<FeeRequest>,
    snapshot_rx: watch::Receiver<FeeSnapshot>,
    trading_fees: TradingFeeSchedule,
}

impl FeeServiceAccess {
    /// Starts the periodic refresh. The first refresh is issued right away.
    pub async fn initialize(&self) -> Result<(), EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<()>();
        let request = FeeRequest::Initialize { rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?;
        Ok(())
    }

    pub async fn refresh(&self) -> Result<FeeRefresh, EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<FeeRefresh, EscrowError>>();
        let request = FeeRequest::Refresh {
            rsp_tx: Some(rsp_tx),
        };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn shutdown(&self) -> Result<(), EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<()>();
        let request = FeeRequest::Shutdown { rsp_tx };
        self.tx.send(request).await?; // Shutdown is allowed to fail if already shutdown
        rsp_rx.await?;
        Ok(())
    }

    pub fn snapshot(&self) -> FeeSnapshot {
        *self.snapshot_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeeSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn tx_fee(&self, vsize_in_vbytes: u64) -> Satoshis {
        self.tx_fee_per_vbyte().saturating_mul(vsize_in_vbytes)
    }

    pub fn tx_fee_per_vbyte(&self) -> u64 {
        self.snapshot().tx_fee_per_vbyte
    }

    pub fn min_fee_per_vbyte(&self) -> u64 {
        self.snapshot().min_fee_per_vbyte
    }

    pub fn fees_timestamp(&self) -> Option<u64> {
        self.snapshot().fees_timestamp
    }

    pub fn update_counter(&self) -> u64 {
        self.snapshot().update_counter
    }

    /// False while the figures are still the configured defaults
    pub fn is_fee_data_available(&self) -> bool {
        self.update_counter() > 0
    }

    pub fn maker_fee(&self, amount: Satoshis) -> Satoshis {
        Self::scaled_fee(
            amount,
            self.trading_fees.maker_fee_per_btc,
            self.trading_fees.min_maker_fee,
        )
    }

    pub fn taker_fee(&self, amount: Satoshis) -> Satoshis {
        Self::scaled_fee(
            amount,
            self.trading_fees.taker_fee_per_btc,
            self.trading_fees.min_taker_fee,
        )
    }

    pub fn trading_fee(&self, side: TradeSide, amount: Satoshis) -> Satoshis {
        match side {
            TradeSide::Maker => self.maker_fee(amount),
            TradeSide::Taker => self.taker_fee(amount),
        }
    }

    fn scaled_fee(amount: Satoshis, fee_per_btc: Satoshis, min_fee: Satoshis) -> Satoshis {
        let fee = amount as u128 * fee_per_btc as u128 / SATOSHIS_PER_BTC as u128;
        u64::try_from(fee).unwrap_or(u64::MAX).max(min_fee)
    }
}

pub struct FeeService {
    tx: mpsc::Sender<FeeRequest>,
    snapshot_rx: watch::Receiver<FeeSnapshot>,
    trading_fees: TradingFeeSchedule,
    pub(crate) task_handle: JoinHandle<()>,
}

impl FeeService {
    const FEE_REQUEST_CHANNEL_SIZE: usize = 10;
    const FETCH_DONE_CHANNEL_SIZE: usize = 10;

    pub fn new(provider: Arc<dyn FeeProvider>, config: FeeServiceConfig) -> Self {
        let (tx, rx) = mpsc::channel::<FeeRequest>(Self::FEE_REQUEST_CHANNEL_SIZE);
        let initial_snapshot = FeeSnapshot {
            tx_fee_per_vbyte: config.default_tx_fee_per_vbyte,
            min_fee_per_vbyte: config.default_min_fee_per_vbyte,
            fees_timestamp: None,
            update_counter: 0,
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial_snapshot);
        let trading_fees = config.trading_fees;

        let actor = FeeServiceActor::new(rx, tx.downgrade(), provider, config, snapshot_tx);
        let task_handle = tokio::spawn(async move { actor.run().await });

        Self {
            tx,
            snapshot_rx,
            trading_fees,
            task_handle,
        }
    }

    pub fn new_accessor(&self) -> FeeServiceAccess {
        FeeServiceAccess {
            tx: self.tx.clone(),
            snapshot_rx: self.snapshot_rx.clone(),
            trading_fees: self.trading_fees,
        }
    }
}

#[derive(Display, IntoStaticStr)]
enum FeeRequest {
    Initialize {
        rsp_tx: oneshot::Sender<()>,
    },
    Refresh {
        rsp_tx: Option<RefreshResponder>,
    },
    Shutdown {
        rsp_tx: oneshot::Sender<()>,
    },
}

struct FetchDone {
    result: Result<FeeData, EscrowError>,
    rsp_tx: Option<RefreshResponder>,
}

struct FeeServiceActor {
    rx: mpsc::Receiver<FeeRequest>,
    weak_tx: mpsc::WeakSender<FeeRequest>,
    fetch_tx: mpsc::Sender<FetchDone>,
    fetch_rx: mpsc::Receiver<FetchDone>,
    provider: Arc<dyn FeeProvider>,
    config: FeeServiceConfig,
    snapshot_tx: watch::Sender<FeeSnapshot>,
    last_request: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

impl FeeServiceActor {
    fn new(
        rx: mpsc::Receiver<FeeRequest>,
        weak_tx: mpsc::WeakSender<FeeRequest>,
        provider: Arc<dyn FeeProvider>,
        config: FeeServiceConfig,
        snapshot_tx: watch::Sender<FeeSnapshot>,
    ) -> Self {
        let (fetch_tx, fetch_rx) = mpsc::channel::<FetchDone>(FeeService::FETCH_DONE_CHANNEL_SIZE);

        FeeServiceActor {
            rx,
            weak_tx,
            fetch_tx,
            fetch_rx,
            provider,
            config,
            snapshot_tx,
            last_request: None,
            timer: None,
        }
    }

    async fn run(mut self) {
        loop {
            select! {
                request = self.rx.recv() => match request {
                    Some(request) => {
                        if self.handle_request(request) {
                            break;
                        }
                    }
                    None => break,
                },
                Some(fetch_done) = self.fetch_rx.recv() => {
                    self.handle_fetch_done(fetch_done);
                },
            }
        }

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        info!("Fee service terminating");
    }

    fn handle_request(&mut self, request: FeeRequest) -> bool {
        let mut terminate = false;

        trace!("Fee service handle_request() of type {}", request);

        match request {
            FeeRequest::Initialize { rsp_tx } => {
                self.initialize();
                Self::acknowledge(rsp_tx);
            }
            FeeRequest::Refresh { rsp_tx } => {
                self.refresh(rsp_tx);
            }
            FeeRequest::Shutdown { rsp_tx } => {
                Self::acknowledge(rsp_tx);
                terminate = true;
            }
        }
        terminate
    }

    fn initialize(&mut self) {
        if self.timer.is_some() {
            debug!("Fee service already initialized");
            return;
        }

        let period = self.config.refresh_interval();
        if period.is_zero() {
            warn!("Fee service refresh interval is zero, periodic refresh disabled");
            return;
        }

        // Holds only a weak sender so the timer never keeps the service alive
        let weak_tx = self.weak_tx.clone();
        self.timer = Some(tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(tx) = weak_tx.upgrade() else {
                    break;
                };
                if tx.send(FeeRequest::Refresh { rsp_tx: None }).await.is_err() {
                    break;
                }
            }
            debug!("Fee refresh timer exiting");
        }));

        info!(
            "Fee service initialized, refreshing every {}s",
            period.as_secs()
        );
    }

    fn refresh(&mut self, rsp_tx: Option<RefreshResponder>) {
        let now = Instant::now();

        if let Some(last_request) = self.last_request {
            let elapsed = now.duration_since(last_request);
            let min_pause = self.config.min_pause_between_requests();
            if elapsed < min_pause {
                debug!(
                    "Fee refresh requested {}s after the last request, before the min pause of {}s has passed",
                    elapsed.as_secs(),
                    min_pause.as_secs()
                );
                Self::respond(rsp_tx, Ok(FeeRefresh::Throttled));
                return;
            }
        }

        // Recorded before the fetch completes so a slow provider cannot cause a request storm
        self.last_request = Some(now);

        let provider = self.provider.clone();
        let fetch_tx = self.fetch_tx.clone();
        tokio::spawn(async move {
            let fetch = async move { provider.get_fees().await };
            let result = match AssertUnwindSafe(fetch).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(EscrowError::FeeProvider(
                    "Fee provider panicked while fetching fees".to_string(),
                )),
            };
            if fetch_tx.send(FetchDone { result, rsp_tx }).await.is_err() {
                warn!("Fee service terminated before fee fetch completed");
            }
        });
    }

    fn handle_fetch_done(&mut self, fetch_done: FetchDone) {
        let FetchDone { result, rsp_tx } = fetch_done;

        let result = result
            .and_then(|fee_data| fee_data.figures())
            .map(|figures| {
                self.apply_figures(figures);
                FeeRefresh::Fetched
            });

        if let Err(error) = &result {
            warn!("Could not load fees - {}", error);
        }
        Self::respond(rsp_tx, result);
    }

    fn apply_figures(&mut self, figures: FeeFigures) {
        let mut tx_fee_per_vbyte = figures.tx_fee_per_vbyte;
        if tx_fee_per_vbyte < figures.min_fee_per_vbyte {
            warn!(
                "The delivered fee of {} sat/vbyte is smaller than the min fee of {} sat/vbyte",
                tx_fee_per_vbyte, figures.min_fee_per_vbyte
            );
            tx_fee_per_vbyte = figures.min_fee_per_vbyte;
        }

        let update_counter = self.snapshot_tx.borrow().update_counter + 1;
        self.snapshot_tx.send_replace(FeeSnapshot {
            tx_fee_per_vbyte,
            min_fee_per_vbyte: figures.min_fee_per_vbyte,
            fees_timestamp: Some(figures.fees_timestamp),
            update_counter,
        });

        info!(
            "BTC tx fee: tx_fee_per_vbyte={} min_fee_per_vbyte={}",
            tx_fee_per_vbyte, figures.min_fee_per_vbyte
        );
    }

    fn respond(rsp_tx: Option<RefreshResponder>, result: Result<FeeRefresh, EscrowError>) {
        if let Some(rsp_tx) = rsp_tx {
            if rsp_tx.send(result).is_err() {
                trace!("Fee refresh requester went away before the response");
            }
        }
    }

    fn acknowledge(rsp_tx: oneshot::Sender<()>) {
        if rsp_tx.send(()).is_err() {
            trace!("Fee service requester went away before the acknowledgement");
        }
    }
}
