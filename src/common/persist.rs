use std::{
    fs,
    path::{Path, PathBuf},
    sync::{mpsc, Mutex},
};
use tracing::{debug, error, trace};

use crate::{
    common::{error::EscrowError, types::TradeId},
    interface::RequestPersistence,
    trade::TradeData,
};

const TRADE_FILE_SUFFIX: &str = "-trade.json";

enum PersisterMsg {
    Persist { data_path: PathBuf, json: String },
    Close,
}

/// Writes trade snapshots as JSON files into a directory, one per trade, from a
/// dedicated thread so callers never block on disk I/O.
pub struct Persister {
    dir_path: PathBuf,
    persist_tx: mpsc::Sender<PersisterMsg>,
    task_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Persister {
    pub fn new(dir_path: impl AsRef<Path>) -> Self {
        let (persist_tx, task_handle) = Self::setup_persistence();

        Self {
            dir_path: dir_path.as_ref().to_path_buf(),
            persist_tx,
            task_handle: Mutex::new(Some(task_handle)),
        }
    }

    pub fn data_path(&self, trade_id: TradeId) -> PathBuf {
        self.dir_path
            .join(format!("{}{}", trade_id, TRADE_FILE_SUFFIX))
    }

    pub fn restore(data_path: impl AsRef<Path>) -> Result<TradeData, EscrowError> {
        let json: String = fs::read_to_string(data_path.as_ref())?;
        debug!(
            "Restored JSON from path: {} - {}",
            data_path.as_ref().display(),
            json
        );
        let data: TradeData = serde_json::from_str(&json)?;
        Ok(data)
    }

    /// Paths of every trade snapshot found in `dir_path`
    pub fn trade_data_paths(dir_path: impl AsRef<Path>) -> Result<Vec<PathBuf>, EscrowError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir_path.as_ref())? {
            let path = entry?.path();
            let is_trade_file = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(TRADE_FILE_SUFFIX))
                .unwrap_or(false);
            if path.is_file() && is_trade_file {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn setup_persistence() -> (mpsc::Sender<PersisterMsg>, std::thread::JoinHandle<()>) {
        let (persist_tx, persist_rx) = mpsc::channel::<PersisterMsg>();
        let task_handle = std::thread::spawn(move || {
            loop {
                match persist_rx.recv() {
                    Ok(PersisterMsg::Persist { data_path, json }) => {
                        if let Some(error) = Self::persist(&data_path, json).err() {
                            error!(
                                "Error persisting data to path {} - {}",
                                data_path.display(),
                                error
                            );
                        }
                    }
                    Ok(PersisterMsg::Close) => break,
                    Err(err) => {
                        error!("Persistence channel recv Error - {}", err);
                        break;
                    }
                }
            }
            debug!("Persistence thread exiting");
        });
        (persist_tx, task_handle)
    }

    fn persist(data_path: impl AsRef<Path>, json: String) -> Result<(), EscrowError> {
        trace!(
            "Persisting JSON to path: {} - {}",
            data_path.as_ref().display(),
            json
        );
        let tmp_path = data_path.as_ref().with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, data_path.as_ref())?;
        Ok(())
    }

    pub fn terminate(&self) {
        if self.persist_tx.send(PersisterMsg::Close).is_err() {
            debug!("Persistence thread already closed");
        }
        let task_handle = match self.task_handle.lock() {
            Ok(mut task_handle) => task_handle.take(),
            Err(error) => {
                error!("Error locking persistence thread handle - {}", error);
                None
            }
        };
        if let Some(task_handle) = task_handle {
            if let Some(error) = task_handle.join().err() {
                error!("Error terminating persistence thread - {:?}", error);
            }
        }
    }
}

impl RequestPersistence for Persister {
    fn request_persistence(&self, trade: &TradeData) {
        let json = match serde_json::to_string(trade) {
            Ok(json) => json,
            Err(error) => {
                error!(
                    "Trade w/ TradeID {} could not be serialized for persistence - {}",
                    trade.trade_id, error
                );
                return;
            }
        };
        let msg = PersisterMsg::Persist {
            data_path: self.data_path(trade.trade_id),
            json,
        };
        if self.persist_tx.send(msg).is_err() {
            error!(
                "Persistence channel disconnected, Trade w/ TradeID {} not persisted",
                trade.trade_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SomeTestTradeParams;

    #[test]
    fn test_persist_and_restore_trade() {
        let dir = tempfile::tempdir().unwrap();
        let persister = Persister::new(dir.path());

        let data = SomeTestTradeParams::seller_data();
        persister.request_persistence(&data);
        persister.terminate();

        let paths = Persister::trade_data_paths(dir.path()).unwrap();
        assert_eq!(paths, vec![persister.data_path(data.trade_id)]);

        let restored = Persister::restore(&paths[0]).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_trade_data_paths_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("settings.toml"), "").unwrap();
        fs::write(dir.path().join("notes-trade.txt"), "").unwrap();

        let paths = Persister::trade_data_paths(dir.path()).unwrap();
        assert!(paths.is_empty());
    }
}
