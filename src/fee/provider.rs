use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

#[cfg(test)]
use mockall::automock;

use crate::common::error::EscrowError;
use crate::config::FeeProviderConfig;

pub const FEES_TIMESTAMP_KEY: &str = "btcFeesTs";
pub const TX_FEE_KEY: &str = "btcTxFee";
pub const MIN_TX_FEE_KEY: &str = "btcMinTxFee";

const GET_FEES_PATH: &str = "getFees";

/// Raw result of one fee fetch: a timestamp map and a fee map, both keyed by
/// the provider's well known keys. Fees are in sat/vbyte.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeData {
    pub timestamps: HashMap<String, u64>,
    pub fees: HashMap<String, u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeFigures {
    pub fees_timestamp: u64,
    pub tx_fee_per_vbyte: u64,
    pub min_fee_per_vbyte: u64,
}

impl FeeData {
    pub fn new(fees_timestamp: u64, tx_fee_per_vbyte: u64, min_fee_per_vbyte: u64) -> Self {
        Self {
            timestamps: HashMap::from([(FEES_TIMESTAMP_KEY.to_string(), fees_timestamp)]),
            fees: HashMap::from([
                (TX_FEE_KEY.to_string(), tx_fee_per_vbyte),
                (MIN_TX_FEE_KEY.to_string(), min_fee_per_vbyte),
            ]),
        }
    }

    pub fn figures(&self) -> Result<FeeFigures, EscrowError> {
        Ok(FeeFigures {
            fees_timestamp: Self::required(&self.timestamps, FEES_TIMESTAMP_KEY)?,
            tx_fee_per_vbyte: Self::required(&self.fees, TX_FEE_KEY)?,
            min_fee_per_vbyte: Self::required(&self.fees, MIN_TX_FEE_KEY)?,
        })
    }

    fn required(map: &HashMap<String, u64>, key: &str) -> Result<u64, EscrowError> {
        map.get(key).copied().ok_or_else(|| {
            EscrowError::MalformedFeeResponse(format!("Fee response missing key {}", key))
        })
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait FeeProvider: Send + Sync {
    async fn get_fees(&self) -> Result<FeeData, EscrowError>;
}

#[derive(Debug, Deserialize)]
struct GetFeesResponse {
    #[serde(rename = "btcFeesTs")]
    fees_timestamp: Option<u64>,
    #[serde(rename = "dataMap", default)]
    data_map: HashMap<String, u64>,
}

impl From<GetFeesResponse> for FeeData {
    fn from(response: GetFeesResponse) -> Self {
        let mut timestamps = HashMap::new();
        if let Some(fees_timestamp) = response.fees_timestamp {
            timestamps.insert(FEES_TIMESTAMP_KEY.to_string(), fees_timestamp);
        }
        FeeData {
            timestamps,
            fees: response.data_map,
        }
    }
}

/// Fetches fee estimates from a price/fee node over HTTP
pub struct HttpFeeProvider {
    client: Client,
    fees_url: Url,
}

impl HttpFeeProvider {
    pub fn new(config: &FeeProviderConfig) -> Result<Self, EscrowError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        let fees_url = Url::parse(&config.base_url)?.join(GET_FEES_PATH)?;
        Ok(Self { client, fees_url })
    }

    pub fn fees_url(&self) -> &Url {
        &self.fees_url
    }

    fn parse_fees(body: &str) -> Result<FeeData, EscrowError> {
        let response: GetFeesResponse = serde_json::from_str(body).map_err(|error| {
            EscrowError::MalformedFeeResponse(format!("Cannot parse fee response - {}", error))
        })?;
        Ok(response.into())
    }
}

#[async_trait]
impl FeeProvider for HttpFeeProvider {
    async fn get_fees(&self) -> Result<FeeData, EscrowError> {
        debug!("Requesting fees from {}", self.fees_url);

        let response = self.client.get(self.fees_url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EscrowError::FeeProvider(format!(
                "HTTP {} from {}",
                status, self.fees_url
            )));
        }
        let body = response.text().await?;
        Self::parse_fees(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_figures_from_complete_data() {
        let data = FeeData::new(1_700_000_000, 20, 2);
        let figures = data.figures().unwrap();
        assert_eq!(figures.fees_timestamp, 1_700_000_000);
        assert_eq!(figures.tx_fee_per_vbyte, 20);
        assert_eq!(figures.min_fee_per_vbyte, 2);
    }

    #[test]
    fn test_figures_missing_min_fee() {
        let mut data = FeeData::new(1_700_000_000, 20, 2);
        data.fees.remove(MIN_TX_FEE_KEY);
        let result = data.figures();
        assert!(matches!(result, Err(EscrowError::MalformedFeeResponse(_))));
    }

    #[test]
    fn test_figures_missing_timestamp() {
        let mut data = FeeData::new(1_700_000_000, 20, 2);
        data.timestamps.clear();
        assert!(data.figures().is_err());
    }

    #[test]
    fn test_parse_get_fees_body() {
        let body = r#"{"btcFeesTs":1700000123,"dataMap":{"btcTxFee":31,"btcMinTxFee":4}}"#;
        let data = HttpFeeProvider::parse_fees(body).unwrap();
        assert_eq!(data, FeeData::new(1_700_000_123, 31, 4));
    }

    #[test]
    fn test_parse_get_fees_body_without_timestamp() {
        let body = r#"{"dataMap":{"btcTxFee":31,"btcMinTxFee":4}}"#;
        let data = HttpFeeProvider::parse_fees(body).unwrap();
        assert!(data.timestamps.is_empty());
        assert!(data.figures().is_err());
    }

    #[test]
    fn test_parse_garbage_body() {
        let result = HttpFeeProvider::parse_fees("<html>502</html>");
        assert!(matches!(result, Err(EscrowError::MalformedFeeResponse(_))));
    }

    #[test]
    fn test_fees_url_joined_on_base() {
        let config = FeeProviderConfig {
            base_url: "https://fees.example.org/api/".to_string(),
            timeout_secs: 5,
        };
        let provider = HttpFeeProvider::new(&config).unwrap();
        assert_eq!(
            provider.fees_url().as_str(),
            "https://fees.example.org/api/getFees"
        );
    }
}
