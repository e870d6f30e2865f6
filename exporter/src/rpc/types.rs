//! Typed values returned by the node's JSON-RPC API.
//!
//! The node speaks loosely-typed JSON. Everything crossing into the rest of
//! the exporter goes through these types first, so that a response with an
//! unexpected shape is rejected here instead of turning into a bogus sample
//! further down the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Length in bytes of a Substrate block hash.
pub const HASH_LEN: usize = 32;

/// Strongly-typed 256-bit block hash.
///
/// On the wire this is a `0x`-prefixed hex string. Parsing normalizes case,
/// so two spellings of the same hash compare equal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockHash(pub [u8; HASH_LEN]);

impl BlockHash {
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

/// Error produced when a string is not a valid `0x`-prefixed 32-byte hash.
#[derive(Debug, thiserror::Error)]
#[error("invalid block hash {0:?}")]
pub struct InvalidHash(pub String);

impl FromStr for BlockHash {
    type Err = InvalidHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .ok_or_else(|| InvalidHash(s.to_string()))?;
        let bytes = hex::decode(digits).map_err(|_| InvalidHash(s.to_string()))?;
        let arr: [u8; HASH_LEN] = bytes
            .try_into()
            .map_err(|_| InvalidHash(s.to_string()))?;
        Ok(BlockHash(arr))
    }
}

impl TryFrom<String> for BlockHash {
    type Error = InvalidHash;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BlockHash> for String {
    fn from(h: BlockHash) -> Self {
        h.to_string()
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Parses a JSON-RPC hex quantity such as `"0x1a"` into a `u64`.
pub fn parse_hex_quantity(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x")?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// The parts of a block the exporter cares about.
#[derive(Clone, Debug, PartialEq)]
pub struct SignedBlock {
    pub number: u64,
    pub extrinsics: usize,
}

/// Raw `chain_getBlock` result.
#[derive(Debug, Deserialize)]
pub(crate) struct RawSignedBlock {
    pub block: RawBlock,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBlock {
    pub header: RawHeader,
    pub extrinsics: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawHeader {
    pub number: String,
}

/// `system_health` result.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeHealth {
    pub is_syncing: bool,
    pub peers: u64,
    pub should_have_peers: bool,
}

/// Node identity, assembled from `system_name`, `system_version` and
/// `system_chain`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemInfo {
    pub name: String,
    pub version: String,
    pub chain: String,
}

/// Subset of `state_getRuntimeVersion` that is exported as labels.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeVersion {
    pub spec_name: String,
    pub impl_name: String,
    pub authoring_version: u64,
    pub spec_version: u64,
    pub impl_version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEAD: &str = "0x91b171bb158e2d3848fa23a9f1c25182fb8e20313b2c1eb49219da7a70ce90c3";

    #[test]
    fn block_hash_parsing_ignores_case() {
        let lower: BlockHash = HEAD.parse().expect("lowercase hash");
        let upper: BlockHash = format!("0x{}", HEAD[2..].to_uppercase())
            .parse()
            .expect("uppercase hash");
        assert_eq!(lower, upper);
        assert_eq!(lower.to_string(), HEAD);
    }

    #[test]
    fn block_hash_rejects_bad_input() {
        assert!("91b171bb".parse::<BlockHash>().is_err());
        assert!("0x91b171bb".parse::<BlockHash>().is_err());
        assert!("0xzz".parse::<BlockHash>().is_err());
    }

    #[test]
    fn hex_quantities() {
        assert_eq!(parse_hex_quantity("0x64"), Some(100));
        assert_eq!(parse_hex_quantity("0x0"), Some(0));
        assert_eq!(parse_hex_quantity("64"), None);
        assert_eq!(parse_hex_quantity("0x"), None);
    }

    #[test]
    fn health_deserializes_from_camel_case() {
        let json = r#"{"isSyncing":true,"peers":12,"shouldHavePeers":true}"#;
        let health: NodeHealth = serde_json::from_str(json).expect("health should parse");
        assert!(health.is_syncing);
        assert_eq!(health.peers, 12);
    }

    #[test]
    fn runtime_version_ignores_extra_fields() {
        let json = r#"{
            "specName": "polkadot",
            "implName": "parity-polkadot",
            "authoringVersion": 0,
            "specVersion": 9430,
            "implVersion": 0,
            "apis": [],
            "transactionVersion": 24
        }"#;
        let rv: RuntimeVersion = serde_json::from_str(json).expect("runtime version should parse");
        assert_eq!(rv.spec_name, "polkadot");
        assert_eq!(rv.spec_version, 9430);
    }
}
