//! Decodes a `BlockchainMessage`'s `events` into the six vault/relayer
//! events the Ledger state machine drives on (spec §4.9). Each
//! `DecodedEvent.args` is the producer's already-ABI-decoded JSON object;
//! this module only imposes the event-specific shape and dispatches by
//! `DecodedEvent.name`.

use ethers::types::{Address, Bytes, H256, U256};
use pipeline_types::UsdAmount;
use serde::Deserialize;

/// Topic0 for `Transfer(address,address,uint256)` — identical for ERC20 and
/// ERC721 (spec §6's known event signatures), since the signature text is
/// the same regardless of which parameters are indexed.
pub const TRANSFER_TOPIC0: H256 = H256([
    0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b, 0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37, 0x8d, 0xaa,
    0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16, 0x28, 0xf5, 0x5a, 0x4d, 0xf5, 0x23, 0xb3, 0xef,
]);

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositArgs {
    pub sender: Address,
    pub asset: Address,
    pub vault: Address,
    pub amount: U256,
    pub token_id: U256,
    pub usd_value: UsdAmount,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequestArgs {
    pub sender: Address,
    pub asset: Address,
    pub amount: U256,
    pub token_id: U256,
    pub request_id: H256,
    pub usd_value: UsdAmount,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawArgs {
    pub request_id: H256,
    pub sender: Address,
    pub asset: Address,
    pub amount: U256,
    pub usd_value: UsdAmount,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollateralRequestArgs {
    pub request_id: H256,
    pub token_id: U256,
    pub protocol: Address,
    pub asset: Address,
    pub sender: Address,
    pub amount: U256,
    pub deadline: u64,
    pub data: Bytes,
    pub signature: Bytes,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollateralProcessStatus {
    Approved,
    Rejected,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollateralProcessArgs {
    pub request_id: H256,
    pub status: CollateralProcessStatus,
    pub error_data: Option<Bytes>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepayArgs {
    pub by: Address,
    pub amount: U256,
}

#[derive(Clone, Debug)]
pub enum LedgerEvent {
    Deposit(DepositArgs),
    WithdrawRequest(WithdrawRequestArgs),
    Withdraw(WithdrawArgs),
    CollateralRequest(CollateralRequestArgs),
    CollateralProcess(CollateralProcessArgs),
    Repay(RepayArgs),
}

#[derive(Debug, snafu::Snafu)]
#[snafu(display("could not decode {} event args: {}", name, source))]
pub struct EventDecodeError {
    name: String,
    source: serde_json::Error,
}

/// Dispatches on `event.name`; returns `Ok(None)` for event names this
/// ledger does not drive on (e.g. the ERC721 `Transfer` events the
/// MerkleEngine consumes separately), and `Err` only when a *recognized*
/// name's args fail to parse — a `Decode` error per spec §7, logged and
/// skipped by the caller rather than treated as fatal.
pub fn parse_event(event: &pipeline_types::DecodedEvent) -> Result<Option<LedgerEvent>, EventDecodeError> {
    use snafu::ResultExt;
    let args = event.args.clone();
    match event.name.as_str() {
        "Deposit" => Ok(Some(LedgerEvent::Deposit(
            serde_json::from_value(args).context(EventDecodeSnafu { name: "Deposit" })?,
        ))),
        "WithdrawRequest" => Ok(Some(LedgerEvent::WithdrawRequest(
            serde_json::from_value(args).context(EventDecodeSnafu {
                name: "WithdrawRequest",
            })?,
        ))),
        "Withdraw" => Ok(Some(LedgerEvent::Withdraw(
            serde_json::from_value(args).context(EventDecodeSnafu { name: "Withdraw" })?,
        ))),
        "CollateralRequest" => Ok(Some(LedgerEvent::CollateralRequest(
            serde_json::from_value(args).context(EventDecodeSnafu {
                name: "CollateralRequest",
            })?,
        ))),
        "CollateralProcess" => Ok(Some(LedgerEvent::CollateralProcess(
            serde_json::from_value(args).context(EventDecodeSnafu {
                name: "CollateralProcess",
            })?,
        ))),
        "Repay" => Ok(Some(LedgerEvent::Repay(
            serde_json::from_value(args).context(EventDecodeSnafu { name: "Repay" })?,
        ))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deposit_args_parse_from_camel_case_json() {
        let event = pipeline_types::DecodedEvent {
            name: "Deposit".into(),
            contract: Address::zero(),
            address: Address::zero(),
            args: json!({
                "sender": format!("{:#x}", Address::repeat_byte(1)),
                "asset": format!("{:#x}", Address::repeat_byte(2)),
                "vault": format!("{:#x}", Address::repeat_byte(3)),
                "amount": format!("{:#x}", U256::from(1000)),
                "tokenId": format!("{:#x}", U256::from(7)),
                "usdValue": "12.50000000",
            }),
        };
        let parsed = parse_event(&event).unwrap().unwrap();
        match parsed {
            LedgerEvent::Deposit(args) => {
                assert_eq!(args.amount, U256::from(1000));
                assert_eq!(args.token_id, U256::from(7));
                assert_eq!(args.usd_value.to_string(), "12.50000000");
            }
            _ => panic!("expected Deposit"),
        }
    }

    #[test]
    fn unrecognized_event_names_are_ignored_not_errors() {
        let event = pipeline_types::DecodedEvent {
            name: "Transfer".into(),
            contract: Address::zero(),
            address: Address::zero(),
            args: json!({}),
        };
        assert!(parse_event(&event).unwrap().is_none());
    }

    #[test]
    fn malformed_args_on_a_recognized_event_is_a_decode_error() {
        let event = pipeline_types::DecodedEvent {
            name: "Deposit".into(),
            contract: Address::zero(),
            address: Address::zero(),
            args: json!({"sender": "not-an-address"}),
        };
        assert!(parse_event(&event).is_err());
    }
}
