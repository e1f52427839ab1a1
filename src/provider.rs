use std::sync::Arc;

use alloy::eips::BlockNumberOrTag;
use alloy::providers::{IpcConnect, Provider, ProviderBuilder, WsConnect};
use alloy::transports::{RpcError, TransportErrorKind};
use reqwest::Url;
use serde_json::Value;

use crate::fetcher::UnitSource;
use crate::helpers::{self, MalformedBlock};

pub async fn get_provider(url: &Url) -> anyhow::Result<Box<dyn Provider>> {
    match url.scheme() {
        "http" | "https" => Ok(Box::new(ProviderBuilder::new().connect_http(url.clone()))),
        "ws" | "wss" => {
            let provider = ProviderBuilder::new()
                .connect_ws(WsConnect::new(url.to_string()))
                .await?;
            Ok(Box::new(provider))
        }
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|()| anyhow::anyhow!("Invalid IPC path: {url}"))?;
            let provider = ProviderBuilder::new().connect_ipc(IpcConnect::new(path)).await?;
            Ok(Box::new(provider))
        }
        _ => Err(anyhow::anyhow!("Invalid URL scheme: {}", url.scheme())),
    }
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum RpcSourceError {
    #[error("RPC error: {0}")]
    Rpc(Arc<RpcError<TransportErrorKind>>),

    #[error("Malformed block: {0}")]
    Malformed(Arc<MalformedBlock>),
}

impl From<RpcError<TransportErrorKind>> for RpcSourceError {
    fn from(value: RpcError<TransportErrorKind>) -> Self {
        RpcSourceError::Rpc(Arc::new(value))
    }
}

impl From<MalformedBlock> for RpcSourceError {
    fn from(value: MalformedBlock) -> Self {
        RpcSourceError::Malformed(Arc::new(value))
    }
}

/// Reads blocks straight from a node instead of going through Etherscan.
pub struct RpcSource {
    provider: Box<dyn Provider>,
}

impl RpcSource {
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self { provider }
    }

    pub async fn connect(url: &Url) -> anyhow::Result<Self> {
        Ok(Self::new(get_provider(url).await?))
    }

    pub async fn block_number(&self) -> Result<u64, RpcSourceError> {
        Ok(self.provider.get_block_number().await?)
    }
}

impl UnitSource for RpcSource {
    type Item = Value;
    type Error = RpcSourceError;

    async fn fetch_unit(&self, unit: u64) -> Result<Option<Vec<Value>>, RpcSourceError> {
        // raw JSON keeps every field the node returns
        let block: Value = self
            .provider
            .client()
            .request("eth_getBlockByNumber", (BlockNumberOrTag::Number(unit), true))
            .await?;

        Ok(helpers::block_transactions(block)?)
    }
}
