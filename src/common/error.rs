use thiserror::Error;

use crate::common::types::TradeId;
use crate::trade::TradeState;

#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("Escrow-Error | Other - {0}")]
    Simple(String),

    #[error("Escrow-Error | Config - {0}")]
    Config(String),

    #[error("Escrow-Error | TaskFailed - Task {task} failed: {message}")]
    TaskFailed { task: &'static str, message: String },

    #[error("Escrow-Error | TaskPanicked - Task {task} panicked: {message}")]
    TaskPanicked { task: &'static str, message: String },

    #[error("Escrow-Error | RunnerReused - Task runner already {0}, cannot run again")]
    RunnerReused(String),

    #[error("Escrow-Error | PipelineFailed - {0}")]
    PipelineFailed(String),

    #[error("Escrow-Error | InvalidTransition - Cannot transition from {from} to {to}")]
    InvalidTransition { from: TradeState, to: TradeState },

    #[error("Escrow-Error | TradeNotFound - No trade w/ TradeID {0}")]
    TradeNotFound(TradeId),

    #[error("Escrow-Error | TradeExists - Trade w/ TradeID {0} already exists")]
    TradeExists(TradeId),

    #[error("Escrow-Error | FeeProvider - {0}")]
    FeeProvider(String),

    #[error("Escrow-Error | MalformedFeeResponse - {0}")]
    MalformedFeeResponse(String),

    #[error("Escrow-Error | TxObserver - {0}")]
    TxObserver(String),

    #[error("Escrow-Error | Wallet - {0}")]
    Wallet(String),

    #[error("Escrow-Error | PeerMessaging - {0}")]
    PeerMessaging(String),

    #[error("Escrow-Error | Http - {0}")]
    Http(#[from] reqwest::Error),

    #[error("Escrow-Error | UrlParse - {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Escrow-Error | StrumParseError - {0}")]
    StrumParsing(#[from] strum::ParseError),

    #[error("Escrow-Error | SerdesJsonError - {0}")]
    SerdesJson(#[from] serde_json::Error),

    #[error("Escrow-Error | TomlError - {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Escrow-Error | IoError - {0}")]
    Io(#[from] std::io::Error),

    #[error("Escrow-Error | MpscSendError - {0}")]
    MpscSend(String),

    #[error("Escrow-Error | OneshotRecvError - {0}")]
    OneshotRecv(#[from] tokio::sync::oneshot::error::RecvError),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for EscrowError {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> EscrowError {
        EscrowError::MpscSend(e.to_string())
    }
}
