//! Wire encoding for integers wider than 53 bits.
//!
//! JSON numbers lose precision past `2^53`; every field the spec lists
//! (`value`, `gasUsed`, `gasPrice`, on-chain amounts) is carried as a decimal
//! string instead. `U256Dec` is a transparent wrapper that gives
//! `ethers::types::U256` that (de)serialization without disturbing its normal
//! arithmetic API.

use ethers::types::U256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct U256Dec(pub U256);

impl From<U256> for U256Dec {
    fn from(value: U256) -> Self {
        U256Dec(value)
    }
}

impl From<U256Dec> for U256 {
    fn from(value: U256Dec) -> Self {
        value.0
    }
}

impl Deref for U256Dec {
    type Target = U256;

    fn deref(&self) -> &U256 {
        &self.0
    }
}

impl fmt::Debug for U256Dec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for U256Dec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for U256Dec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for U256Dec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        U256::from_dec_str(&raw)
            .map(U256Dec)
            .map_err(de::Error::custom)
    }
}

impl FromStr for U256Dec {
    type Err = <U256 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_dec_str(s).map(U256Dec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_decimal_string() {
        let wide = U256Dec(U256::from(9_007_199_254_740_993u64));
        let json = serde_json::to_string(&wide).unwrap();
        assert_eq!(json, "\"9007199254740993\"");
        let back: U256Dec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wide);
    }
}
