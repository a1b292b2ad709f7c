use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::common::{error::EscrowError, types::Satoshis};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    pub data_dir: PathBuf,
    pub fee: FeeServiceConfig,
    pub fee_provider: FeeProviderConfig,
    pub trade: TradeConfig,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("escrow_data"),
            fee: FeeServiceConfig::default(),
            fee_provider: FeeProviderConfig::default(),
            trade: TradeConfig::default(),
        }
    }
}

impl EscrowConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EscrowError> {
        let toml_str = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&toml_str)
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, EscrowError> {
        let config: EscrowConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EscrowError> {
        if self.fee.refresh_interval_secs == 0 {
            return Err(EscrowError::Config(
                "fee.refresh_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.fee.default_tx_fee_per_vbyte < self.fee.default_min_fee_per_vbyte {
            return Err(EscrowError::Config(format!(
                "fee.default_tx_fee_per_vbyte {} is below fee.default_min_fee_per_vbyte {}",
                self.fee.default_tx_fee_per_vbyte, self.fee.default_min_fee_per_vbyte
            )));
        }
        Ok(())
    }
}

/// Fee figures and timings used by the fee service. Miner fees are between
/// 1-600 sat/vbyte, the default only applies until the provider delivers data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeServiceConfig {
    pub default_tx_fee_per_vbyte: u64,
    pub default_min_fee_per_vbyte: u64,
    pub min_pause_between_requests_secs: u64,
    pub refresh_interval_secs: u64,
    pub trading_fees: TradingFeeSchedule,
}

impl Default for FeeServiceConfig {
    fn default() -> Self {
        Self {
            default_tx_fee_per_vbyte: 50,
            default_min_fee_per_vbyte: 2,
            min_pause_between_requests_secs: 2 * 60,
            refresh_interval_secs: 5 * 60,
            trading_fees: TradingFeeSchedule::default(),
        }
    }
}

impl FeeServiceConfig {
    pub fn min_pause_between_requests(&self) -> Duration {
        Duration::from_secs(self.min_pause_between_requests_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Trading fees in satoshis charged per BTC of trade amount, with a floor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingFeeSchedule {
    pub maker_fee_per_btc: Satoshis,
    pub min_maker_fee: Satoshis,
    pub taker_fee_per_btc: Satoshis,
    pub min_taker_fee: Satoshis,
}

impl Default for TradingFeeSchedule {
    fn default() -> Self {
        Self {
            maker_fee_per_btc: 100_000, // 0.001 BTC
            min_maker_fee: 5_000,
            taker_fee_per_btc: 300_000, // 0.003 BTC
            min_taker_fee: 5_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeProviderConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for FeeProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8078/".to_string(),
            timeout_secs: 10,
        }
    }
}

impl FeeProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Virtual sizes used to size the on-chain fees of a trade
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeConfig {
    pub deposit_tx_vsize: u64,
    pub payout_tx_vsize: u64,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            deposit_tx_vsize: 233,
            payout_tx_vsize: 169,
        }
    }
}
