//! Per-message fan-out to the two subsystems a `BlockchainMessage` feeds:
//! `Transfer` events build `NftTransfer`s for the ownership-Merkle engine
//! (C2), while the message as a whole drives the collateral ledger (C3),
//! whose own `parse_event` ignores event names it doesn't recognize (spec
//! §6 — both subsystems read the same channel, each keying off the event
//! names it cares about).

use ethers::types::{Address, U256};
use ledger_core::Ledger;
use merkle_engine::MerkleEngine;
use pipeline_types::{BlockchainMessage, NftTransfer};
use serde::Deserialize;
use tracing::{event, Level};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferArgs {
    from: Address,
    to: Address,
    #[serde(default)]
    token_id: Option<U256>,
}

/// Builds an `NftTransfer` from a decoded `Transfer` event at position `i`
/// in `message.events`, pairing it with `message.transaction.logs[i]` for
/// its `logIndex` — the two vectors are positionally aligned by the
/// producer (spec §4.3: one `DecodedEvent` per log, never dropped).
fn nft_transfer_from_event(message: &BlockchainMessage, index: usize) -> Option<NftTransfer> {
    let decoded = message.events.get(index)?;
    if decoded.name != "Transfer" {
        return None;
    }
    let args: TransferArgs = serde_json::from_value(decoded.args.clone()).ok()?;
    let token_id = args.token_id?;
    let log_index = message
        .transaction
        .logs
        .get(index)
        .map(|log| log.log_index)
        .unwrap_or(index as u64);
    Some(NftTransfer {
        chain_id: message.metadata.chain_id,
        tx_hash: message.metadata.transaction_hash,
        block_number: message.transaction.block_number,
        log_index,
        block_hash: message.transaction.block_hash,
        token_address: decoded.contract,
        token_id,
        from: args.from,
        to: args.to,
        timestamp: message.timestamp,
        included_in_merkle: false,
        merkle_root: None,
    })
}

/// Routes one received message to the Merkle engine and the ledger. A
/// `Transfer` log without a `tokenId` (an ERC-20 transfer sharing the same
/// topic0, spec §4.3) is silently not an `NftTransfer` candidate; every
/// other log still reaches the ledger via `apply_message`.
pub async fn dispatch_message(
    message: &BlockchainMessage,
    merkle: &MerkleEngine,
    ledger: &Ledger,
    nft_address: Address,
) {
    for index in 0..message.events.len() {
        if let Some(transfer) = nft_transfer_from_event(message, index) {
            if transfer.token_address != nft_address {
                continue;
            }
            if let Err(error) = merkle.record_transfer(transfer).await {
                event!(
                    Level::ERROR,
                    %error,
                    tx_hash = %message.metadata.transaction_hash,
                    "failed to record NFT transfer"
                );
            }
        }
    }

    if let Err(error) = ledger.apply_message(message).await {
        event!(
            Level::ERROR,
            %error,
            tx_hash = %message.metadata.transaction_hash,
            "failed to apply message to ledger"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Bytes, H256};
    use pipeline_types::{DecodedEvent, MatchedLog, MessageMetadata, MessageTransaction};
    use serde_json::json;

    fn sample_message(nft: Address, token_id: u64, from: Address, to: Address) -> BlockchainMessage {
        let log = MatchedLog {
            address: nft,
            topics: vec![H256::repeat_byte(9)],
            data: Bytes::default(),
            log_index: 3,
        };
        let event = DecodedEvent {
            name: "Transfer".to_string(),
            contract: nft,
            args: json!({
                "from": format!("{:#x}", from),
                "to": format!("{:#x}", to),
                "tokenId": format!("{:#x}", U256::from(token_id)),
            }),
            address: nft,
        };
        BlockchainMessage {
            transaction: MessageTransaction {
                hash: H256::repeat_byte(1),
                block_number: 42,
                chain_id: 1,
                chain_name: "ethereum".to_string(),
                from,
                to: Some(nft),
                value: Default::default(),
                gas_used: None,
                gas_price: None,
                status: Some(1),
                logs: vec![log],
                timestamp: 1_000,
                block_hash: H256::repeat_byte(2),
                data: None,
                topics: vec![],
            },
            events: vec![event],
            timestamp: 1_000,
            metadata: MessageMetadata {
                chain_id: 1,
                chain_name: "ethereum".to_string(),
                block_number: 42,
                transaction_hash: H256::repeat_byte(1),
                timestamp: 1_000,
            },
        }
    }

    #[test]
    fn builds_nft_transfer_from_matching_log_index() {
        let nft = Address::repeat_byte(5);
        let from = Address::repeat_byte(6);
        let to = Address::repeat_byte(7);
        let message = sample_message(nft, 11, from, to);
        let transfer = nft_transfer_from_event(&message, 0).expect("transfer decoded");
        assert_eq!(transfer.token_id, U256::from(11u64));
        assert_eq!(transfer.log_index, 3);
        assert_eq!(transfer.from, from);
        assert_eq!(transfer.to, to);
        assert_eq!(transfer.token_address, nft);
    }

    #[test]
    fn non_transfer_event_yields_no_nft_transfer() {
        let nft = Address::repeat_byte(5);
        let mut message = sample_message(nft, 11, Address::zero(), Address::zero());
        message.events[0].name = "Deposit".to_string();
        assert!(nft_transfer_from_event(&message, 0).is_none());
    }
}
