//! `Ledger` (C3) — spec §4.9: the collateral-ledger state machine. Durable
//! state follows the `BlockLedger` pattern (`Persisted<T>` snapshot plus a
//! rebuilt-on-load in-memory index); unlike `BlockLedger`, the whole
//! `apply_message` call is additionally serialized by `processing_lock`,
//! since spec §5 requires "no parallel event processing within one
//! consumer instance" and handlers make outbound RPC calls (oracle,
//! lending pool, relayer) that must not interleave with a sibling event's
//! mutation of the same user's balances.

use crate::asset_table::AssetTable;
use crate::events::{
    parse_event, CollateralProcessStatus, EventDecodeError, LedgerEvent, TRANSFER_TOPIC0,
};
use crate::lending_pool::LendingPoolRegistry;
use crate::oracle::PriceOracle;
use crate::state::{Index, LedgerState};
use async_std::sync::{Mutex, RwLock};
use ethers::types::{Address, H256, U256};
use merkle_engine::MerkleEngine;
use persistence::{Persisted, PersistenceError};
use pipeline_types::{
    decimal::DecimalError, Borrow, BorrowStatus, BlockchainMessage, RelayerEvent,
    RelayerEventStatus, RelayerEventType, UsdAmount, VaultEvent, VaultEventType, Withdrawal,
    WithdrawalStatus,
};
use relayer_client::RelayerClient;
use snafu::{ResultExt, Snafu};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{event, Level};

#[derive(Debug, Snafu)]
pub enum LedgerError {
    #[snafu(display("persistence failure: {}", source))]
    Persistence { source: PersistenceError },
}

struct Inner {
    state: LedgerState,
    index: Index,
}

struct EventContext {
    chain_id: u64,
    tx_hash: H256,
    log_index: u64,
    timestamp: u64,
}

/// Non-fatal failure within a single event's handler — logged and dropped
/// by `apply_message`, never bubbled (spec §7: "per-event errors in the
/// Ledger are absorbed").
#[derive(Debug, Snafu)]
enum HandlerError {
    #[snafu(display("decimal arithmetic error: {}", source))]
    Decimal { source: DecimalError },
    #[snafu(display("oracle lookup failed: {}", source))]
    Oracle { source: crate::oracle::OracleError },
    #[snafu(display("lending pool lookup failed: {}", source))]
    LendingPool {
        source: crate::lending_pool::LendingPoolError,
    },
    #[snafu(display("duplicate event dropped"))]
    Duplicate,
    #[snafu(display("{}", reason))]
    Invariant { reason: String },
}

pub struct Ledger {
    inner: RwLock<Inner>,
    persisted: RwLock<Persisted<LedgerState>>,
    processing_lock: Mutex<()>,
    oracle: Arc<dyn PriceOracle>,
    lending_pools: LendingPoolRegistry,
    assets: AssetTable,
    merkle: Arc<MerkleEngine>,
    relayers: HashMap<u64, Arc<RelayerClient>>,
    /// Per-chain vault entry-point address passed as `completeWithdraw`'s
    /// `handler` argument (spec §4.9/§6); configured alongside each chain's
    /// `RelayerClient`, not derived from any event.
    handlers: HashMap<u64, Address>,
}

impl Ledger {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        base_path: &Path,
        key_tag: &str,
        oracle: Arc<dyn PriceOracle>,
        lending_pools: LendingPoolRegistry,
        assets: AssetTable,
        merkle: Arc<MerkleEngine>,
        relayers: HashMap<u64, Arc<RelayerClient>>,
        handlers: HashMap<u64, Address>,
    ) -> Result<Self, LedgerError> {
        let persisted = Persisted::create(base_path, key_tag).context(PersistenceSnafu)?;
        let state = LedgerState::default();
        let index = Index::rebuild(&state);
        Ok(Ledger {
            inner: RwLock::new(Inner { state, index }),
            persisted: RwLock::new(persisted),
            processing_lock: Mutex::new(()),
            oracle,
            lending_pools,
            assets,
            merkle,
            relayers,
            handlers,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn load(
        base_path: &Path,
        key_tag: &str,
        oracle: Arc<dyn PriceOracle>,
        lending_pools: LendingPoolRegistry,
        assets: AssetTable,
        merkle: Arc<MerkleEngine>,
        relayers: HashMap<u64, Arc<RelayerClient>>,
        handlers: HashMap<u64, Address>,
    ) -> Result<Self, LedgerError> {
        let persisted = Persisted::load(base_path, key_tag).context(PersistenceSnafu)?;
        let state = persisted.load_latest().context(PersistenceSnafu)?;
        let index = Index::rebuild(&state);
        Ok(Ledger {
            inner: RwLock::new(Inner { state, index }),
            persisted: RwLock::new(persisted),
            processing_lock: Mutex::new(()),
            oracle,
            lending_pools,
            assets,
            merkle,
            relayers,
            handlers,
        })
    }

    async fn commit(&self) -> Result<(), LedgerError> {
        let state = self.inner.read().await.state.clone();
        self.persisted
            .write()
            .await
            .commit(&state)
            .context(PersistenceSnafu)
    }

    pub async fn user(&self, wallet_address: Address) -> Option<pipeline_types::User> {
        self.inner.read().await.state.users.get(&wallet_address).cloned()
    }

    /// Processes every decoded event in `message` in order. Per-event
    /// failures (decode, validation, duplicate) are logged and skipped;
    /// only a persistence failure bubbles, per spec §7.
    pub async fn apply_message(&self, message: &BlockchainMessage) -> Result<(), LedgerError> {
        let _serialize = self.processing_lock.lock().await;
        let mut mutated = false;
        for (i, decoded) in message.events.iter().enumerate() {
            let ctx = EventContext {
                chain_id: message.metadata.chain_id,
                tx_hash: message.metadata.transaction_hash,
                log_index: message
                    .transaction
                    .logs
                    .get(i)
                    .map(|log| log.log_index)
                    .unwrap_or(0),
                timestamp: message.metadata.timestamp,
            };
            let parsed = match parse_event(decoded) {
                Ok(parsed) => parsed,
                Err(error) => {
                    log_decode_error(decoded, &error);
                    continue;
                }
            };
            let Some(ledger_event) = parsed else {
                continue;
            };
            let result = match ledger_event {
                LedgerEvent::Deposit(args) => self.handle_deposit(&ctx, args).await,
                LedgerEvent::WithdrawRequest(args) => {
                    self.handle_withdraw_request(&ctx, args).await
                }
                LedgerEvent::Withdraw(args) => self.handle_withdraw(&ctx, args).await,
                LedgerEvent::CollateralRequest(args) => {
                    self.handle_collateral_request(&ctx, args).await
                }
                LedgerEvent::CollateralProcess(args) => {
                    self.handle_collateral_process(&ctx, args).await
                }
                LedgerEvent::Repay(args) => {
                    self.handle_repay(&ctx, message, args).await
                }
            };
            match result {
                Ok(true) => mutated = true,
                Ok(false) => {}
                Err(error) => {
                    event!(Level::WARN, event = %decoded.name, %error, "event handler failed, dropping");
                }
            }
        }
        if mutated {
            self.commit().await?;
        }
        Ok(())
    }

    async fn handle_deposit(
        &self,
        ctx: &EventContext,
        args: crate::events::DepositArgs,
    ) -> Result<bool, HandlerError> {
        let event = VaultEvent {
            event_type: VaultEventType::Deposit,
            chain_id: ctx.chain_id,
            tx_hash: ctx.tx_hash,
            log_index: ctx.log_index,
            sender: args.sender,
            asset: args.asset,
            vault: args.vault,
            amount: args.amount,
            token_id: args.token_id,
            request_id: None,
            usd_value: args.usd_value,
            timestamp: ctx.timestamp,
        };
        let key = event.dedup_key();

        let mut inner = self.inner.write().await;
        if inner.index.vault_event_keys.contains(&key) {
            return DuplicateSnafu.fail();
        }
        let current = inner
            .state
            .users
            .get(&args.sender)
            .cloned()
            .unwrap_or_else(|| pipeline_types::User::new(args.sender));
        let new_total = current
            .total_usd_balance
            .checked_add(args.usd_value)
            .context(DecimalSnafu)?;
        let new_floating = current
            .floating_usd_balance
            .checked_add(args.usd_value)
            .context(DecimalSnafu)?;

        inner.index.vault_event_keys.insert(key);
        inner.state.vault_events.push(event);
        let id = inner.state.next_id();
        inner.state.deposits.push(pipeline_types::Deposit {
            id,
            wallet_address: args.sender,
            asset: args.asset,
            vault: args.vault,
            amount: args.amount,
            token_id: args.token_id,
            chain_id: ctx.chain_id,
            usd_value: args.usd_value,
            tx_hash: ctx.tx_hash,
            timestamp: ctx.timestamp,
        });
        let user = inner.state.user_mut(args.sender);
        user.total_usd_balance = new_total;
        user.floating_usd_balance = new_floating;
        Ok(true)
    }

    async fn handle_withdraw_request(
        &self,
        ctx: &EventContext,
        args: crate::events::WithdrawRequestArgs,
    ) -> Result<bool, HandlerError> {
        let event = VaultEvent {
            event_type: VaultEventType::WithdrawRequest,
            chain_id: ctx.chain_id,
            tx_hash: ctx.tx_hash,
            log_index: ctx.log_index,
            sender: args.sender,
            asset: args.asset,
            vault: Address::zero(),
            amount: args.amount,
            token_id: args.token_id,
            request_id: Some(args.request_id),
            usd_value: args.usd_value,
            timestamp: ctx.timestamp,
        };
        let key = event.dedup_key();

        // availableBalance per spec §4.9 step 1 equals floatingUsdBalance:
        // both are `Σdeposits − ΣcompletedWithdrawals − ΣpendingWithdrawals
        // − ΣactiveBorrows`, per the invariant on `pipeline_types::User`.
        let (available, already_seen) = {
            let inner = self.inner.read().await;
            let available = inner
                .state
                .users
                .get(&args.sender)
                .map(|u| u.floating_usd_balance)
                .unwrap_or(UsdAmount::ZERO);
            (available, inner.index.vault_event_keys.contains(&key))
        };
        if already_seen {
            return DuplicateSnafu.fail();
        }

        let approved = available >= args.usd_value;
        let proof = if approved {
            Some(self.withdraw_proof(args.sender, args.token_id).await)
        } else {
            None
        };

        let mut inner = self.inner.write().await;
        if inner.index.vault_event_keys.contains(&key) {
            return DuplicateSnafu.fail();
        }
        inner.index.vault_event_keys.insert(key);
        inner.state.vault_events.push(event);
        let id = inner.state.next_id();

        if approved {
            let current = inner
                .state
                .users
                .get(&args.sender)
                .cloned()
                .unwrap_or_else(|| pipeline_types::User::new(args.sender));
            let new_floating = current
                .floating_usd_balance
                .checked_sub(args.usd_value)
                .context(DecimalSnafu)?;
            let withdrawal_index = inner.state.withdrawals.len();
            inner.state.withdrawals.push(Withdrawal {
                id,
                request_id: args.request_id,
                wallet_address: args.sender,
                asset: args.asset,
                amount: args.amount,
                token_id: args.token_id,
                chain_id: ctx.chain_id,
                usd_value: args.usd_value,
                status: WithdrawalStatus::Pending,
                timestamp: ctx.timestamp,
            });
            inner
                .index
                .pending_withdrawal_by_request
                .insert(args.request_id, withdrawal_index);
            inner.state.user_mut(args.sender).floating_usd_balance = new_floating;
            drop(inner);

            if let Some(relayer) = self.relayers.get(&ctx.chain_id) {
                let handler = self.handlers.get(&ctx.chain_id).copied().unwrap_or_default();
                let proof = proof.unwrap_or_default();
                if let Err(error) = relayer
                    .complete_withdraw(handler, args.request_id, proof, args.asset)
                    .await
                {
                    event!(Level::WARN, request_id = %args.request_id, %error, "completeWithdraw submission failed");
                }
            }
        } else {
            inner.state.withdrawals.push(Withdrawal {
                id,
                request_id: args.request_id,
                wallet_address: args.sender,
                asset: args.asset,
                amount: args.amount,
                token_id: args.token_id,
                chain_id: ctx.chain_id,
                usd_value: args.usd_value,
                status: WithdrawalStatus::Rejected,
                timestamp: ctx.timestamp,
            });
        }
        Ok(true)
    }

    /// spec §4.9: "The proof supplied is `getProof(sender, tokenId).proof`;
    /// if proof is empty but a root exists, pass `[root]`; otherwise `[]`."
    async fn withdraw_proof(&self, sender: Address, token_id: U256) -> Vec<H256> {
        match self.merkle.get_proof(sender, token_id).await {
            Some(proof) if proof.proof.is_empty() => vec![proof.root],
            Some(proof) => proof.proof,
            None => Vec::new(),
        }
    }

    async fn handle_withdraw(
        &self,
        ctx: &EventContext,
        args: crate::events::WithdrawArgs,
    ) -> Result<bool, HandlerError> {
        let mut inner = self.inner.write().await;
        // primary lookup: the PENDING row for this requestId.
        let withdrawal_index = inner
            .index
            .pending_withdrawal_by_request
            .get(&args.request_id)
            .copied()
            // fallback per spec §4.9: same (user, asset, amount).
            .or_else(|| {
                inner.state.withdrawals.iter().position(|w| {
                    w.status == WithdrawalStatus::Pending
                        && w.wallet_address == args.sender
                        && w.asset == args.asset
                        && w.amount == args.amount
                })
            });

        let Some(withdrawal_index) = withdrawal_index else {
            return InvariantSnafu {
                reason: format!(
                    "WITHDRAW for unknown requestId {:#x}, dropping",
                    args.request_id
                ),
            }
            .fail();
        };

        let current = inner
            .state
            .users
            .get(&args.sender)
            .cloned()
            .unwrap_or_else(|| pipeline_types::User::new(args.sender));
        let new_total = current
            .total_usd_balance
            .checked_sub(args.usd_value)
            .context(DecimalSnafu)?;

        inner.state.withdrawals[withdrawal_index].status = WithdrawalStatus::Completed;
        inner
            .index
            .pending_withdrawal_by_request
            .remove(&args.request_id);
        inner.state.user_mut(args.sender).total_usd_balance = new_total;
        // floatingUsdBalance is unchanged here: it was debited at the
        // request (spec §4.9 WITHDRAW note).
        let _ = ctx;
        Ok(true)
    }

    async fn handle_collateral_request(
        &self,
        ctx: &EventContext,
        args: crate::events::CollateralRequestArgs,
    ) -> Result<bool, HandlerError> {
        let key = (args.request_id, ctx.chain_id, RelayerEventType::CollateralRequest);
        {
            let inner = self.inner.read().await;
            if inner.index.relayer_event_keys.contains(&key) {
                return DuplicateSnafu.fail();
            }
        }

        let pending_event = RelayerEvent {
            event_type: RelayerEventType::CollateralRequest,
            request_id: args.request_id,
            chain_id: ctx.chain_id,
            token_id: args.token_id,
            protocol: args.protocol,
            asset: args.asset,
            sender: args.sender,
            amount: args.amount,
            deadline: args.deadline,
            data: args.data.clone(),
            signature: args.signature.clone(),
            status: RelayerEventStatus::Pending,
            error_data: None,
            process_tx_hash: None,
        };

        {
            let mut inner = self.inner.write().await;
            if inner.index.relayer_event_keys.contains(&key) {
                return DuplicateSnafu.fail();
            }
            let request_index = inner.state.relayer_events.len();
            inner.index.relayer_event_keys.insert(key);
            inner
                .index
                .collateral_request_by_id
                .insert(args.request_id, request_index);
            inner.state.relayer_events.push(pending_event);
        }

        let (approved, rejection_reason) = self.evaluate_collateral_request(ctx, &args).await?;

        let mut inner = self.inner.write().await;
        if let Some(&idx) = inner.index.collateral_request_by_id.get(&args.request_id) {
            inner.state.relayer_events[idx].status = if approved {
                RelayerEventStatus::Approved
            } else {
                RelayerEventStatus::Rejected
            };
        }
        drop(inner);

        if let Some(relayer) = self.relayers.get(&ctx.chain_id) {
            if let Err(error) = relayer.process_request(args.request_id, approved).await {
                event!(Level::WARN, request_id = %args.request_id, %error, "processRequest submission failed");
            }
        }
        if let Some(reason) = rejection_reason {
            event!(Level::INFO, request_id = %args.request_id, reason, "collateral request rejected");
        }
        Ok(true)
    }

    /// spec §4.9 steps 2–5: ownership verification, LTV, and utilization.
    /// Returns `(approved, rejectionReason)`.
    async fn evaluate_collateral_request(
        &self,
        ctx: &EventContext,
        args: &crate::events::CollateralRequestArgs,
    ) -> Result<(bool, Option<String>), HandlerError> {
        use std::time::{SystemTime, UNIX_EPOCH};
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if args.deadline < now {
            return Ok((false, Some("deadline has passed".into())));
        }
        if self.inner.read().await.state.users.get(&args.sender).is_none() {
            return Ok((false, Some("unknown user".into())));
        }

        let ownership = self.merkle.verify_ownership(args.sender, args.token_id).await;
        let owns = match ownership {
            merkle_engine::VerificationOutcome::Confirmed => true,
            merkle_engine::VerificationOutcome::Denied => false,
            // fallback per spec §4.8: "a fallback 'has prior deposit' lookup
            // may be consulted only if Merkle verification is unavailable."
            merkle_engine::VerificationOutcome::RootUnavailable => {
                self.inner
                    .read()
                    .await
                    .state
                    .deposits
                    .iter()
                    .any(|d| d.wallet_address == args.sender && d.token_id == args.token_id)
            }
        };
        if !owns {
            return Ok((false, Some("NFT ownership verification failed".into())));
        }

        let (total_ltv, total_utilization) = self
            .compute_ltv_and_utilization(args.token_id)
            .await?;

        let amount_usd = self
            .oracle
            .usd_value(ctx.chain_id, args.asset, args.amount)
            .await
            .context(OracleSnafu)?;

        if total_utilization
            .checked_add(amount_usd)
            .context(DecimalSnafu)?
            <= total_ltv
        {
            Ok((true, None))
        } else {
            Ok((false, Some("Exceeds LTV limits".into())))
        }
    }

    /// spec §4.9 steps 3–4: `totalLTV` sums `usdValue * ltvRatio` across a
    /// token's deposits (missing LTV config contributes value but not LTV,
    /// logged); `totalUtilization` sums each distinct protocol's
    /// `LendingPool::utilization` among the token's approved borrows.
    async fn compute_ltv_and_utilization(
        &self,
        token_id: U256,
    ) -> Result<(UsdAmount, UsdAmount), HandlerError> {
        let deposits: Vec<_> = {
            let inner = self.inner.read().await;
            inner
                .state
                .deposits
                .iter()
                .filter(|d| d.token_id == token_id)
                .cloned()
                .collect()
        };

        let mut total_ltv = UsdAmount::ZERO;
        for deposit in &deposits {
            match self.assets.get(deposit.chain_id, deposit.asset) {
                Some(config) => match config.ltv_percent {
                    Some(percent) => {
                        total_ltv = total_ltv
                            .checked_add(deposit.usd_value.mul_percent(percent))
                            .context(DecimalSnafu)?;
                    }
                    None => {
                        event!(
                            Level::WARN,
                            asset = %deposit.asset,
                            "NO LTV CONFIGURED, contributing zero to totalLTV"
                        );
                    }
                },
                None => {
                    event!(
                        Level::WARN,
                        asset = %deposit.asset,
                        "NO LTV CONFIGURED, contributing zero to totalLTV"
                    );
                }
            }
        }

        let protocols: std::collections::HashSet<Address> = {
            let inner = self.inner.read().await;
            inner
                .state
                .borrows
                .iter()
                .filter(|b| b.token_id == token_id && b.status == BorrowStatus::Active)
                .map(|b| b.protocol)
                .collect()
        };

        let mut total_utilization = UsdAmount::ZERO;
        for protocol in protocols {
            let Some(pool) = self.lending_pools.get(&protocol) else {
                event!(Level::WARN, %protocol, "no LendingPool registered, skipping");
                continue;
            };
            let raw = pool.utilization(token_id).await.context(LendingPoolSnafu)?;
            total_utilization = total_utilization
                .checked_add(UsdAmount::from_micro_usd(raw))
                .context(DecimalSnafu)?;
        }

        Ok((total_ltv, total_utilization))
    }

    async fn handle_collateral_process(
        &self,
        ctx: &EventContext,
        args: crate::events::CollateralProcessArgs,
    ) -> Result<bool, HandlerError> {
        let key = (args.request_id, ctx.chain_id, RelayerEventType::CollateralProcess);
        let mut inner = self.inner.write().await;
        if inner.index.relayer_event_keys.contains(&key) {
            return DuplicateSnafu.fail();
        }

        let Some(&request_idx) = inner.index.collateral_request_by_id.get(&args.request_id) else {
            return InvariantSnafu {
                reason: format!(
                    "CollateralProcess for unknown requestId {:#x} (PROCESS before REQUEST), dropping",
                    args.request_id
                ),
            }
            .fail();
        };

        inner.index.relayer_event_keys.insert(key);
        inner.state.relayer_events[request_idx].process_tx_hash = Some(ctx.tx_hash);
        inner.state.relayer_events[request_idx].error_data = args.error_data.clone();

        if args.status == CollateralProcessStatus::Approved {
            let request = inner.state.relayer_events[request_idx].clone();
            let id = inner.state.next_id();
            let current = inner
                .state
                .users
                .get(&request.sender)
                .cloned()
                .unwrap_or_else(|| pipeline_types::User::new(request.sender));

            let amount_usd = self
                .oracle
                .usd_value(request.chain_id, request.asset, request.amount)
                .await
                .context(OracleSnafu)?;

            let new_borrowed = current
                .borrowed_usd_amount
                .checked_add(amount_usd)
                .context(DecimalSnafu)?;
            let new_floating = current
                .floating_usd_balance
                .checked_add(amount_usd)
                .context(DecimalSnafu)?;

            inner.state.relayer_events[request_idx].status = RelayerEventStatus::Approved;
            inner.state.borrows.push(Borrow {
                id,
                wallet_address: request.sender,
                protocol: request.protocol,
                token_id: request.token_id,
                asset: request.asset,
                chain_id: request.chain_id,
                usd_value: amount_usd,
                status: BorrowStatus::Active,
                opened_at: ctx.timestamp,
                loan_end_date: None,
            });
            let user = inner.state.user_mut(request.sender);
            user.borrowed_usd_amount = new_borrowed;
            user.floating_usd_balance = new_floating;
        } else {
            inner.state.relayer_events[request_idx].status = RelayerEventStatus::Rejected;
        }
        Ok(true)
    }

    async fn handle_repay(
        &self,
        ctx: &EventContext,
        message: &BlockchainMessage,
        args: crate::events::RepayArgs,
    ) -> Result<bool, HandlerError> {
        // Repay carries no requestId, so dedup keys off `processTxHash`
        // alone (one repayment recorded per tx) rather than the
        // `(requestId, chainId, type)` scheme the other relayer events use.
        let asset = message
            .transaction
            .logs
            .iter()
            .find(|log| log.topics.first() == Some(&TRANSFER_TOPIC0))
            .map(|log| log.address);
        let Some(asset) = asset else {
            return InvariantSnafu {
                reason: "REPAY has no co-emitted ERC20 Transfer log, cannot resolve asset".to_string(),
            }
            .fail();
        };

        let mut inner = self.inner.write().await;
        if inner
            .state
            .relayer_events
            .iter()
            .any(|e| e.event_type == RelayerEventType::Repay && e.process_tx_hash == Some(ctx.tx_hash))
        {
            return DuplicateSnafu.fail();
        }

        let active_total: UsdAmount = {
            let indices = inner.state.active_borrows_for_wallet_oldest_first(args.by);
            let mut total = UsdAmount::ZERO;
            for idx in indices {
                total = total
                    .checked_add(inner.state.borrows[idx].usd_value)
                    .context(DecimalSnafu)?;
            }
            total
        };
        drop(inner);

        let repay_usd_raw = self
            .oracle
            .usd_value(ctx.chain_id, asset, args.amount)
            .await
            .context(OracleSnafu)?;
        let repaid = repay_usd_raw.min(active_total);

        let mut inner = self.inner.write().await;
        inner.state.relayer_events.push(RelayerEvent {
            event_type: RelayerEventType::Repay,
            request_id: H256::zero(),
            chain_id: ctx.chain_id,
            token_id: U256::zero(),
            protocol: Address::zero(),
            asset,
            sender: args.by,
            amount: args.amount,
            deadline: 0,
            data: ethers::types::Bytes::default(),
            signature: ethers::types::Bytes::default(),
            status: RelayerEventStatus::Approved,
            error_data: None,
            process_tx_hash: Some(ctx.tx_hash),
        });

        let mut remaining = repaid;
        let indices = inner.state.active_borrows_for_wallet_oldest_first(args.by);
        for idx in indices {
            if remaining.is_zero() {
                break;
            }
            let owed = inner.state.borrows[idx].usd_value;
            if owed <= remaining {
                remaining = remaining.checked_sub(owed).context(DecimalSnafu)?;
                inner.state.borrows[idx].status = BorrowStatus::Repaid;
                inner.state.borrows[idx].loan_end_date = Some(ctx.timestamp);
            } else {
                inner.state.borrows[idx].usd_value =
                    owed.checked_sub(remaining).context(DecimalSnafu)?;
                remaining = UsdAmount::ZERO;
            }
        }

        let current = inner
            .state
            .users
            .get(&args.by)
            .cloned()
            .unwrap_or_else(|| pipeline_types::User::new(args.by));
        let new_borrowed = current.borrowed_usd_amount.saturating_sub(repaid);
        let new_floating = current
            .floating_usd_balance
            .checked_add(repaid)
            .context(DecimalSnafu)?;
        let user = inner.state.user_mut(args.by);
        user.borrowed_usd_amount = new_borrowed;
        user.floating_usd_balance = new_floating;
        Ok(true)
    }
}

fn log_decode_error(decoded: &pipeline_types::DecodedEvent, error: &EventDecodeError) {
    event!(Level::WARN, event = %decoded.name, %error, "could not decode event args, skipping");
}
