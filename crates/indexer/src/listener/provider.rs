//! WebSocket RPC provider for the IssueTracker contract.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::pubsub::PubSubFrontend;
use alloy::rpc::types::{BlockTransactionsKind, Filter, Log};
use anyhow::Context;
use async_trait::async_trait;
use chrono::DateTime;
use futures::StreamExt;
use issuetrack_core::{CommitTime, EventKind};
use parking_lot::RwLock;
use tracing::{info, warn};

use super::events::{decode_log, signature_hash};
use super::source::{ChainSource, Delivery, EventStream};
use crate::error::{IndexerError, Result};

/// WebSocket provider bound to one IssueTracker deployment.
///
/// The transport handle is held until [`ChainSource::release`] is called.
pub struct RpcProvider {
    provider: RwLock<Option<RootProvider<PubSubFrontend>>>,
    issue_tracker: Address,
}

impl RpcProvider {
    /// Connect to the WebSocket endpoint and bind the contract address.
    pub async fn connect(ws_url: &str, issue_tracker: Address) -> anyhow::Result<Self> {
        let provider = ProviderBuilder::new()
            .on_ws(WsConnect::new(ws_url))
            .await
            .with_context(|| format!("Failed to connect to {}", redact(ws_url)))?;

        info!(contract = %issue_tracker, "WebSocket provider connected");

        Ok(Self {
            provider: RwLock::new(Some(provider)),
            issue_tracker,
        })
    }

    /// Contract address this provider listens to.
    pub fn contract(&self) -> Address {
        self.issue_tracker
    }

    /// Chain ID reported by the node.
    pub async fn chain_id(&self) -> Result<u64> {
        self.handle()?
            .get_chain_id()
            .await
            .map_err(|e| IndexerError::Transport(format!("get_chain_id: {e}")))
    }

    fn handle(&self) -> Result<RootProvider<PubSubFrontend>> {
        self.provider
            .read()
            .clone()
            .ok_or_else(|| IndexerError::Transport("provider released".to_string()))
    }

    fn filter(&self, kind: EventKind) -> Filter {
        Filter::new()
            .address(self.issue_tracker)
            .event_signature(signature_hash(kind))
    }
}

#[async_trait]
impl ChainSource for RpcProvider {
    async fn subscribe(&self, kind: EventKind) -> Result<EventStream> {
        let subscription = self
            .handle()?
            .subscribe_logs(&self.filter(kind))
            .await
            .map_err(|e| IndexerError::Transport(format!("subscribe {kind}: {e}")))?;

        info!(%kind, "Subscribed to contract events");

        let stream = subscription
            .into_stream()
            .map(move |log: Log| decode_log(kind, &log));

        Ok(stream.boxed())
    }

    async fn query_range(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Delivery>> {
        let filter = self.filter(kind).from_block(from_block).to_block(to_block);

        let mut logs: Vec<Log> = self
            .handle()?
            .get_logs(&filter)
            .await
            .map_err(|e| {
                IndexerError::Transport(format!(
                    "get_logs {kind} [{from_block}, {to_block}]: {e}"
                ))
            })?;

        logs.sort_by_key(|log| (log.block_number, log.log_index));

        let deliveries: Vec<Delivery> = logs.iter().map(|log| decode_log(kind, log)).collect();
        let failed = deliveries.iter().filter(|d| d.is_err()).count();
        if failed > 0 {
            warn!(%kind, failed, "Some logs in range could not be decoded");
        }

        Ok(deliveries)
    }

    async fn tip(&self) -> Result<u64> {
        self.handle()?
            .get_block_number()
            .await
            .map_err(|e| IndexerError::Transport(format!("get_block_number: {e}")))
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<CommitTime> {
        let unavailable = |reason: String| IndexerError::TimestampUnavailable {
            block_number,
            reason,
        };

        let block = self
            .handle()?
            .get_block_by_number(
                BlockNumberOrTag::Number(block_number),
                BlockTransactionsKind::Hashes,
            )
            .await
            .map_err(|e| unavailable(e.to_string()))?
            .ok_or_else(|| unavailable("block not found".to_string()))?;

        let secs = i64::try_from(block.header.timestamp)
            .map_err(|_| unavailable("timestamp out of range".to_string()))?;

        DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| unavailable("timestamp out of range".to_string()))
    }

    async fn release(&self) {
        if self.provider.write().take().is_some() {
            info!("WebSocket provider released");
        }
    }
}

/// Strip the path (which usually carries an API key) from an endpoint URL.
pub fn redact(url: &str) -> String {
    match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            let host = rest.split('/').next().unwrap_or(rest);
            format!("{}://{}/…", &url[..scheme_end], host)
        }
        None => "<invalid url>".to_string(),
    }
}
