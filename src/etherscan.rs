use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use crate::fetcher::UnitSource;
use crate::helpers::{self, MalformedBlock};

pub const DEFAULT_API_URL: &str = "https://api.etherscan.io/api";

#[derive(Debug, thiserror::Error)]
pub enum EtherscanError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Etherscan error: {0}")]
    Api(String),

    #[error("Malformed block: {0}")]
    Malformed(#[from] MalformedBlock),

    #[error("Invalid block number {0:?}")]
    BlockNumber(String),
}

/// Envelope shared by proxy responses and Etherscan's own `status` errors.
#[derive(Debug, Deserialize)]
struct ProxyResponse {
    #[serde(default)]
    result: Value,
    error: Option<ProxyError>,
    status: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProxyError {
    code: i64,
    message: String,
}

impl ProxyResponse {
    fn into_result(self) -> Result<Value, EtherscanError> {
        if let Some(err) = self.error {
            return Err(EtherscanError::Api(format!("{} (code {})", err.message, err.code)));
        }

        if self.status.as_deref() == Some("0") {
            let reason = match self.result {
                Value::String(s) => s,
                _ => self.message.unwrap_or_else(|| "request rejected".to_string()),
            };
            return Err(EtherscanError::Api(reason));
        }

        Ok(self.result)
    }
}

pub struct EtherscanClient {
    http: reqwest::Client,
    api_url: Url,
    api_key: Option<String>,
    chain_id: Option<u64>,
}

impl EtherscanClient {
    pub fn new(api_url: Url, api_key: Option<String>, chain_id: Option<u64>) -> Self {
        if api_key.is_none() {
            tracing::warn!("No Etherscan API key set, requests will be heavily rate limited");
        }

        Self {
            http: reqwest::Client::new(),
            api_url,
            api_key,
            chain_id,
        }
    }

    fn proxy_url(&self, action: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.api_url.clone();

        {
            let mut query = url.query_pairs_mut();
            if let Some(chain_id) = self.chain_id {
                query.append_pair("chainid", &chain_id.to_string());
            }
            query.append_pair("module", "proxy");
            query.append_pair("action", action);
            query.extend_pairs(params);
            if let Some(key) = &self.api_key {
                query.append_pair("apikey", key);
            }
        }

        url
    }

    async fn call(&self, url: Url) -> Result<Value, EtherscanError> {
        let body: ProxyResponse = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        body.into_result()
    }

    /// Latest block number known to Etherscan.
    pub async fn block_number(&self) -> Result<u64, EtherscanError> {
        let result = self.call(self.proxy_url("eth_blockNumber", &[])).await?;

        match result {
            Value::String(s) => parse_quantity(&s).ok_or(EtherscanError::BlockNumber(s)),
            other => Err(EtherscanError::BlockNumber(other.to_string())),
        }
    }
}

impl UnitSource for EtherscanClient {
    type Item = Value;
    type Error = EtherscanError;

    async fn fetch_unit(&self, unit: u64) -> Result<Option<Vec<Value>>, EtherscanError> {
        let tag = format!("{unit:#x}");
        let url = self.proxy_url(
            "eth_getBlockByNumber",
            &[("tag", tag.as_str()), ("boolean", "true")],
        );

        block_result(self.call(url).await?)
    }
}

fn block_result(result: Value) -> Result<Option<Vec<Value>>, EtherscanError> {
    match result {
        // rate limit and key problems come back as a bare string
        Value::String(s) => Err(EtherscanError::Api(s)),
        block => Ok(helpers::block_transactions(block)?),
    }
}

fn parse_quantity(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x")?;
    u64::from_str_radix(digits, 16).ok()
}
