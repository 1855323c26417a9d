//! ABI event definitions and log decoding for the six vault/relayer events
//! plus the `Transfer` signature shared by ERC20 and ERC721 (spec's "known
//! event signatures"). Built on `ethers::abi::Event` directly rather than
//! `abigen!` — a one-shot decode into JSON doesn't need a generated
//! contract binding, and the producer doesn't have a concrete ABI file to
//! hand `abigen!` in the first place.
//!
//! `FilteredTransaction::into_message` deliberately leaves `events` empty
//! and defers ABI decoding to "callers that carry contract ABIs" — this
//! module, wired in through `DecodingPublisher`, is that caller.

use ethers::abi::{Event, EventParam, Log, ParamType, RawLog, Token};
use ethers::types::{Address, Bytes, H256, U256};
use pipeline_types::{DecodedEvent, MatchedLog, TopicFilter};
use serde_json::{json, Map, Value};

fn event(name: &str, params: &[(&str, ParamType, bool)]) -> Event {
    Event {
        name: name.to_string(),
        inputs: params
            .iter()
            .map(|(name, kind, indexed)| EventParam {
                name: name.to_string(),
                kind: kind.clone(),
                indexed: *indexed,
            })
            .collect(),
        anonymous: false,
    }
}

fn deposit_event() -> Event {
    event(
        "Deposit",
        &[
            ("sender", ParamType::Address, false),
            ("asset", ParamType::Address, false),
            ("vault", ParamType::Address, false),
            ("amount", ParamType::Uint(256), false),
            ("tokenId", ParamType::Uint(256), false),
            ("usdValue", ParamType::Uint(256), false),
        ],
    )
}

fn withdraw_request_event() -> Event {
    event(
        "WithdrawRequest",
        &[
            ("sender", ParamType::Address, false),
            ("asset", ParamType::Address, false),
            ("amount", ParamType::Uint(256), false),
            ("tokenId", ParamType::Uint(256), false),
            ("requestId", ParamType::FixedBytes(32), false),
            ("usdValue", ParamType::Uint(256), false),
        ],
    )
}

fn withdraw_event() -> Event {
    event(
        "Withdraw",
        &[
            ("requestId", ParamType::FixedBytes(32), false),
            ("sender", ParamType::Address, false),
            ("asset", ParamType::Address, false),
            ("amount", ParamType::Uint(256), false),
            ("usdValue", ParamType::Uint(256), false),
        ],
    )
}

fn collateral_request_event() -> Event {
    event(
        "CollateralRequest",
        &[
            ("requestId", ParamType::FixedBytes(32), false),
            ("tokenId", ParamType::Uint(256), false),
            ("protocol", ParamType::Address, false),
            ("asset", ParamType::Address, false),
            ("sender", ParamType::Address, false),
            ("amount", ParamType::Uint(256), false),
            ("deadline", ParamType::Uint(64), false),
            ("data", ParamType::Bytes, false),
            ("signature", ParamType::Bytes, false),
        ],
    )
}

fn collateral_process_event() -> Event {
    event(
        "CollateralProcess",
        &[
            ("requestId", ParamType::FixedBytes(32), false),
            ("status", ParamType::Uint(8), false),
            ("errorData", ParamType::Bytes, false),
        ],
    )
}

fn repay_event() -> Event {
    event(
        "Repay",
        &[("by", ParamType::Address, false), ("amount", ParamType::Uint(256), false)],
    )
}

/// ERC721's fully-indexed layout: `Transfer(address indexed from, address
/// indexed to, uint256 indexed tokenId)`. Shares its topic0 with ERC20's
/// `Transfer(address indexed from, address indexed to, uint256 value)` —
/// `decode_log` tells the two apart by topic count, not topic0.
fn nft_transfer_event() -> Event {
    event(
        "Transfer",
        &[
            ("from", ParamType::Address, true),
            ("to", ParamType::Address, true),
            ("tokenId", ParamType::Uint(256), true),
        ],
    )
}

/// ERC20's partially-indexed layout, used for the same topic0 when a
/// repaid asset's own `Transfer` log rides along in the matched set
/// (`handle_repay` scans raw logs for it directly and doesn't need it
/// decoded, but it still needs an `events[i]` slot — see `decode_log`).
fn erc20_transfer_event() -> Event {
    event(
        "Transfer",
        &[
            ("from", ParamType::Address, true),
            ("to", ParamType::Address, true),
            ("value", ParamType::Uint(256), false),
        ],
    )
}

/// The topic filters this producer registers with the `TopicMatcher`.
/// Vault/relayer events are scoped to `vault_address`; `Transfer` is left
/// unscoped since `handle_repay` needs to see a repaid asset's ERC20
/// `Transfer` log too, not just the tracked NFT's.
pub fn topic_filters(vault_address: Address) -> Vec<TopicFilter> {
    vec![
        TopicFilter::scoped(deposit_event().signature(), vault_address),
        TopicFilter::scoped(withdraw_request_event().signature(), vault_address),
        TopicFilter::scoped(withdraw_event().signature(), vault_address),
        TopicFilter::scoped(collateral_request_event().signature(), vault_address),
        TopicFilter::scoped(collateral_process_event().signature(), vault_address),
        TopicFilter::scoped(repay_event().signature(), vault_address),
        TopicFilter::new(nft_transfer_event().signature()),
    ]
}

fn hex_uint(value: &U256) -> Value {
    json!(format!("{:#x}", value))
}

fn hex_bytes32(value: &[u8]) -> Value {
    json!(format!("{:#x}", H256::from_slice(value)))
}

fn hex_bytes(value: &[u8]) -> Value {
    json!(format!("{}", Bytes::from(value.to_vec())))
}

fn address(value: &Token) -> Value {
    match value {
        Token::Address(a) => json!(format!("{:#x}", a)),
        other => json!(format!("{:?}", other)),
    }
}

fn uint(value: &Token) -> Value {
    match value {
        Token::Uint(u) => hex_uint(u),
        other => json!(format!("{:?}", other)),
    }
}

fn fixed_bytes32(value: &Token) -> Value {
    match value {
        Token::FixedBytes(b) => hex_bytes32(b),
        other => json!(format!("{:?}", other)),
    }
}

fn bytes(value: &Token) -> Value {
    match value {
        Token::Bytes(b) => hex_bytes(b),
        other => json!(format!("{:?}", other)),
    }
}

/// `usdValue` is reported on-chain as a raw `uint256` scaled by 1e8; the
/// ledger's `UsdAmount` wire format is a decimal string (e.g.
/// `"12.50000000"`), not the raw integer, so it gets its own conversion
/// rather than going through `hex_uint`.
fn usd_value(value: &Token) -> Value {
    match value {
        // Assumes usd-scaled event values fit in 128 bits, true for any
        // realistic on-chain USD figure.
        Token::Uint(u) => json!(pipeline_types::UsdAmount::from_scaled(u.low_u128() as i128).to_string()),
        other => json!(format!("{:?}", other)),
    }
}

fn param(log: &Log, name: &str) -> Option<&Token> {
    log.params.iter().find(|p| p.name == name).map(|p| &p.value)
}

fn deposit_args(log: Log) -> Option<Map<String, Value>> {
    let mut out = Map::new();
    out.insert("sender".into(), address(param(&log, "sender")?));
    out.insert("asset".into(), address(param(&log, "asset")?));
    out.insert("vault".into(), address(param(&log, "vault")?));
    out.insert("amount".into(), uint(param(&log, "amount")?));
    out.insert("tokenId".into(), uint(param(&log, "tokenId")?));
    out.insert("usdValue".into(), usd_value(param(&log, "usdValue")?));
    Some(out)
}

fn withdraw_request_args(log: Log) -> Option<Map<String, Value>> {
    let mut out = Map::new();
    out.insert("sender".into(), address(param(&log, "sender")?));
    out.insert("asset".into(), address(param(&log, "asset")?));
    out.insert("amount".into(), uint(param(&log, "amount")?));
    out.insert("tokenId".into(), uint(param(&log, "tokenId")?));
    out.insert("requestId".into(), fixed_bytes32(param(&log, "requestId")?));
    out.insert("usdValue".into(), usd_value(param(&log, "usdValue")?));
    Some(out)
}

fn withdraw_args(log: Log) -> Option<Map<String, Value>> {
    let mut out = Map::new();
    out.insert("requestId".into(), fixed_bytes32(param(&log, "requestId")?));
    out.insert("sender".into(), address(param(&log, "sender")?));
    out.insert("asset".into(), address(param(&log, "asset")?));
    out.insert("amount".into(), uint(param(&log, "amount")?));
    out.insert("usdValue".into(), usd_value(param(&log, "usdValue")?));
    Some(out)
}

fn collateral_request_args(log: Log) -> Option<Map<String, Value>> {
    let mut out = Map::new();
    out.insert("requestId".into(), fixed_bytes32(param(&log, "requestId")?));
    out.insert("tokenId".into(), uint(param(&log, "tokenId")?));
    out.insert("protocol".into(), address(param(&log, "protocol")?));
    out.insert("asset".into(), address(param(&log, "asset")?));
    out.insert("sender".into(), address(param(&log, "sender")?));
    out.insert("amount".into(), uint(param(&log, "amount")?));
    out.insert(
        "deadline".into(),
        match param(&log, "deadline")? {
            Token::Uint(u) => json!(u.low_u64()),
            other => json!(format!("{:?}", other)),
        },
    );
    out.insert("data".into(), bytes(param(&log, "data")?));
    out.insert("signature".into(), bytes(param(&log, "signature")?));
    Some(out)
}

fn collateral_process_args(log: Log) -> Option<Map<String, Value>> {
    let mut out = Map::new();
    out.insert("requestId".into(), fixed_bytes32(param(&log, "requestId")?));
    let status = match param(&log, "status")? {
        Token::Uint(u) if u.is_zero() => "APPROVED",
        Token::Uint(_) => "REJECTED",
        _ => return None,
    };
    out.insert("status".into(), json!(status));
    match param(&log, "errorData")? {
        Token::Bytes(b) if b.is_empty() => {}
        Token::Bytes(b) => {
            out.insert("errorData".into(), hex_bytes(b));
        }
        _ => return None,
    }
    Some(out)
}

fn repay_args(log: Log) -> Option<Map<String, Value>> {
    let mut out = Map::new();
    out.insert("by".into(), address(param(&log, "by")?));
    out.insert("amount".into(), uint(param(&log, "amount")?));
    Some(out)
}

fn nft_transfer_args(log: Log) -> Option<Map<String, Value>> {
    let mut out = Map::new();
    out.insert("from".into(), address(param(&log, "from")?));
    out.insert("to".into(), address(param(&log, "to")?));
    out.insert("tokenId".into(), uint(param(&log, "tokenId")?));
    Some(out)
}

fn erc20_transfer_args(log: Log) -> Option<Map<String, Value>> {
    let mut out = Map::new();
    out.insert("from".into(), address(param(&log, "from")?));
    out.insert("to".into(), address(param(&log, "to")?));
    out.insert("value".into(), uint(param(&log, "value")?));
    Some(out)
}

/// Decodes `log` against the six ledger events plus `Transfer`.
///
/// `ledger_core::Ledger::apply_message` pairs `message.events[i]` with
/// `message.transaction.logs[i]` positionally, so this always returns one
/// `DecodedEvent` per log — never `None` — falling back to an empty-args
/// `"Unknown"` event for a topic0 this producer doesn't recognize or a log
/// whose shape doesn't fit the matched event's ABI (should only happen for
/// malformed upstream data, since every log reaching here already matched
/// a registered topic filter).
pub fn decode_log(log: &MatchedLog) -> DecodedEvent {
    let named_fields = (|| {
        let topic0 = *log.topics.first()?;
        let raw = RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        };
        if topic0 == deposit_event().signature() {
            Some(("Deposit", deposit_args(deposit_event().parse_log(raw).ok()?)?))
        } else if topic0 == withdraw_request_event().signature() {
            Some((
                "WithdrawRequest",
                withdraw_request_args(withdraw_request_event().parse_log(raw).ok()?)?,
            ))
        } else if topic0 == withdraw_event().signature() {
            Some(("Withdraw", withdraw_args(withdraw_event().parse_log(raw).ok()?)?))
        } else if topic0 == collateral_request_event().signature() {
            Some((
                "CollateralRequest",
                collateral_request_args(collateral_request_event().parse_log(raw).ok()?)?,
            ))
        } else if topic0 == collateral_process_event().signature() {
            Some((
                "CollateralProcess",
                collateral_process_args(collateral_process_event().parse_log(raw).ok()?)?,
            ))
        } else if topic0 == repay_event().signature() {
            Some(("Repay", repay_args(repay_event().parse_log(raw).ok()?)?))
        } else if topic0 == nft_transfer_event().signature() {
            if log.topics.len() == 4 {
                Some(("Transfer", nft_transfer_args(nft_transfer_event().parse_log(raw).ok()?)?))
            } else {
                Some(("Transfer", erc20_transfer_args(erc20_transfer_event().parse_log(raw).ok()?)?))
            }
        } else {
            None
        }
    })();

    let (name, fields) = named_fields.unwrap_or(("Unknown", Map::new()));
    DecodedEvent {
        name: name.to_string(),
        contract: log.address,
        args: Value::Object(fields),
        address: log.address,
    }
}

pub fn decode_events(logs: &[MatchedLog]) -> Vec<DecodedEvent> {
    logs.iter().map(decode_log).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::Token;

    fn encode(tokens: Vec<Token>) -> Bytes {
        ethers::abi::encode(&tokens).into()
    }

    #[test]
    fn decodes_deposit_into_camel_case_args() {
        let sender = Address::repeat_byte(1);
        let asset = Address::repeat_byte(2);
        let vault = Address::repeat_byte(3);
        let data = encode(vec![
            Token::Address(sender),
            Token::Address(asset),
            Token::Address(vault),
            Token::Uint(U256::from(1_000u64)),
            Token::Uint(U256::from(7u64)),
            Token::Uint(U256::from(1_250_000_000u64)),
        ]);
        let log = MatchedLog {
            address: vault,
            topics: vec![deposit_event().signature()],
            data,
            log_index: 0,
        };
        let decoded = decode_log(&log);
        assert_eq!(decoded.name, "Deposit");
        assert_eq!(decoded.args["usdValue"], json!("12.50000000"));
        assert_eq!(decoded.args["tokenId"], json!(format!("{:#x}", U256::from(7u64))));
    }

    #[test]
    fn unknown_topic_decodes_as_unknown_not_dropped() {
        let log = MatchedLog {
            address: Address::zero(),
            topics: vec![H256::repeat_byte(9)],
            data: Bytes::default(),
            log_index: 0,
        };
        let decoded = decode_log(&log);
        assert_eq!(decoded.name, "Unknown");
    }

    #[test]
    fn erc20_transfer_decodes_without_a_token_id() {
        let from = Address::repeat_byte(1);
        let to = Address::repeat_byte(2);
        let log = MatchedLog {
            address: Address::repeat_byte(5),
            topics: vec![nft_transfer_event().signature(), H256::from(from), H256::from(to)],
            data: encode(vec![Token::Uint(U256::from(500u64))]),
            log_index: 0,
        };
        let decoded = decode_log(&log);
        assert_eq!(decoded.name, "Transfer");
        assert!(decoded.args.get("tokenId").is_none());
        assert!(decoded.args.get("value").is_some());
    }

    #[test]
    fn erc721_transfer_decodes_with_a_token_id() {
        let nft = Address::repeat_byte(4);
        let from = Address::repeat_byte(1);
        let to = Address::repeat_byte(2);
        let token_id = U256::from(42u64);
        let log = MatchedLog {
            address: nft,
            topics: vec![
                nft_transfer_event().signature(),
                H256::from(from),
                H256::from(to),
                H256::from_uint(&token_id),
            ],
            data: Bytes::default(),
            log_index: 0,
        };
        let decoded = decode_log(&log);
        assert_eq!(decoded.name, "Transfer");
        assert_eq!(decoded.args["tokenId"], json!(format!("{:#x}", token_id)));
    }

    #[test]
    fn decode_events_preserves_a_slot_for_every_log() {
        let logs = vec![
            MatchedLog {
                address: Address::zero(),
                topics: vec![H256::repeat_byte(9)],
                data: Bytes::default(),
                log_index: 0,
            },
            MatchedLog {
                address: Address::repeat_byte(5),
                topics: vec![
                    nft_transfer_event().signature(),
                    H256::from(Address::repeat_byte(1)),
                    H256::from(Address::repeat_byte(2)),
                ],
                data: encode(vec![Token::Uint(U256::from(500u64))]),
                log_index: 1,
            },
        ];
        assert_eq!(decode_events(&logs).len(), logs.len());
    }
}
