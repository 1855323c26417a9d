//! On-chain write path (spec §6): submitting Merkle roots and resolving
//! collateral-ledger relayer requests. Grounded on the wallet/provider setup
//! in the teacher's `minimal-relayer` binary — a `MnemonicBuilder` wallet
//! wrapped in `SignerMiddleware`, stacked over `NonceManagerMiddleware` so
//! concurrent submissions from the same signer don't race on nonce
//! assignment.

use async_std::sync::Mutex;
use ethers::abi::Token;
use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::prelude::NonceManagerMiddleware;
use ethers::providers::{Http, Middleware, Provider, ProviderError};
use ethers::signers::{coins_bip39::English, LocalWallet, MnemonicBuilder, Signer};
use ethers::types::{Address, Bytes, TransactionReceipt, H256};
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use tracing::{event, Level};

abigen!(
    PipelineContract,
    r#"[
        function updateNFTOwnershipRoot(bytes32 root) external
        function processRequest(bytes32 requestId, bool approved) external
        function completeWithdraw(address handler, bytes32 requestId, bytes32[] proof, bytes additionalData) external
    ]"#,
);

type SignerClient = SignerMiddleware<NonceManagerMiddleware<Provider<Http>>, LocalWallet>;

#[derive(Debug, Snafu)]
pub enum RelayerClientError {
    #[snafu(display("could not construct provider: {}", source))]
    Provider { source: ProviderError },
    #[snafu(display("could not build relayer wallet: {}", source))]
    Wallet {
        source: ethers::signers::WalletError,
    },
    #[snafu(display("contract call to {} failed: {}", method, source))]
    Call {
        method: &'static str,
        source: ethers::contract::ContractError<SignerClient>,
    },
    #[snafu(display("waiting for {} confirmation failed: {}", method, source))]
    Confirm {
        method: &'static str,
        source: ProviderError,
    },
    #[snafu(display("transaction for {} was dropped before confirmation", method))]
    Dropped { method: &'static str },
}

impl RelayerClientError {
    pub fn kind(&self) -> pipeline_types::Kind {
        match self {
            RelayerClientError::Call { .. }
            | RelayerClientError::Confirm { .. }
            | RelayerClientError::Dropped { .. } => pipeline_types::Kind::Transient,
            _ => pipeline_types::Kind::Fatal,
        }
    }
}

/// Submits the three on-chain writes the consumer's ledger/Merkle
/// subsystems need (spec §6). One instance per chain; `submit_lock`
/// serializes calls so two concurrent submissions from this process never
/// race on the signer's next nonce.
pub struct RelayerClient {
    contract: PipelineContract<SignerClient>,
    submit_lock: Mutex<()>,
}

impl RelayerClient {
    pub async fn connect(
        rpc_url: &str,
        contract_address: Address,
        mnemonic: &str,
    ) -> Result<Self, RelayerClientError> {
        let provider = Provider::<Http>::try_from(rpc_url).map_err(|err| {
            RelayerClientError::Provider {
                source: ProviderError::CustomError(err.to_string()),
            }
        })?;
        let chain_id = provider
            .get_chainid()
            .await
            .context(ProviderSnafu)?
            .as_u64();

        let wallet = MnemonicBuilder::<English>::default()
            .phrase(mnemonic)
            .build()
            .context(WalletSnafu)?
            .with_chain_id(chain_id);
        let address = wallet.address();

        let provider = NonceManagerMiddleware::new(provider, address);
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = PipelineContract::new(contract_address, client);

        Ok(RelayerClient {
            contract,
            submit_lock: Mutex::new(()),
        })
    }

    /// spec §6: `updateNFTOwnershipRoot(bytes32)` on a relayer contract
    /// configured for `chainId` (which contract that is follows from how
    /// `RelayerClient` was constructed for that chain — `chainId` here is
    /// only carried for logging).
    pub async fn update_nft_ownership_root(
        &self,
        chain_id: u64,
        root: H256,
    ) -> Result<TransactionReceipt, RelayerClientError> {
        let _guard = self.submit_lock.lock().await;
        event!(Level::INFO, chain_id, %root, "submitting NFT ownership root");
        let call = self.contract.update_nft_ownership_root(root.into());
        let pending = call.send().await.context(CallSnafu {
            method: "updateNFTOwnershipRoot",
        })?;
        pending
            .await
            .context(ConfirmSnafu {
                method: "updateNFTOwnershipRoot",
            })?
            .ok_or(RelayerClientError::Dropped {
                method: "updateNFTOwnershipRoot",
            })
    }

    /// spec §6: `processRequest(bytes32 requestId, bool approved)`.
    pub async fn process_request(
        &self,
        request_id: H256,
        approved: bool,
    ) -> Result<TransactionReceipt, RelayerClientError> {
        let _guard = self.submit_lock.lock().await;
        event!(Level::INFO, %request_id, approved, "processing relayer request");
        let call = self.contract.process_request(request_id.into(), approved);
        let pending = call.send().await.context(CallSnafu {
            method: "processRequest",
        })?;
        pending
            .await
            .context(ConfirmSnafu {
                method: "processRequest",
            })?
            .ok_or(RelayerClientError::Dropped {
                method: "processRequest",
            })
    }

    /// spec §6: `completeWithdraw(address handler, bytes32 requestId,
    /// bytes32[] proof, bytes additionalData)` on the vault entry point,
    /// with `additionalData = abi.encode(address asset)`.
    pub async fn complete_withdraw(
        &self,
        handler: Address,
        request_id: H256,
        proof: Vec<H256>,
        asset: Address,
    ) -> Result<TransactionReceipt, RelayerClientError> {
        let _guard = self.submit_lock.lock().await;
        event!(Level::INFO, %request_id, %asset, "completing withdraw");
        let additional_data = Bytes::from(ethers::abi::encode(&[Token::Address(asset)]));
        let proof: Vec<[u8; 32]> = proof.into_iter().map(|h| h.into()).collect();
        let call = self
            .contract
            .complete_withdraw(handler, request_id.into(), proof, additional_data);
        let pending = call.send().await.context(CallSnafu {
            method: "completeWithdraw",
        })?;
        pending
            .await
            .context(ConfirmSnafu {
                method: "completeWithdraw",
            })?
            .ok_or(RelayerClientError::Dropped {
                method: "completeWithdraw",
            })
    }
}
