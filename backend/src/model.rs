use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SubscriptionError;

const RECEIPT_PREFIX: &str = "Sub_";
const RECEIPT_OWNER_CHARS: usize = 8;
/// Ledger token names are capped at 32 bytes.
pub const MAX_RECEIPT_LEN: usize = 32;

/// Identity of a subscriber, taken from the public key of their wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(#[serde(with = "hex_bytes")] [u8; 32]);

impl OwnerId {
    pub fn from_public_key(key: [u8; 32]) -> Self {
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for OwnerId {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| SubscriptionError::InvalidConfig(format!("owner id: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SubscriptionError::InvalidConfig("owner id must be 32 bytes".into()))?;
        Ok(Self(key))
    }
}

/// Identifier of a fungible asset on the ledger (a token mint or policy+name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(pub String);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A payment destination understood by the ledger client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Wallet address controlled by `owner`.
    pub fn of_owner(owner: &OwnerId) -> Self {
        Self(owner.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the receipt token: `Sub_<owner prefix>_<start time ms>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReceiptId(String);

impl ReceiptId {
    /// Fails when the name would not fit in a ledger token name.
    pub fn derive(owner: &OwnerId, start_time: u64) -> Result<Self, SubscriptionError> {
        let owner_hex = owner.to_hex();
        let name = format!(
            "{RECEIPT_PREFIX}{}_{start_time}",
            &owner_hex[..RECEIPT_OWNER_CHARS]
        );
        if name.len() > MAX_RECEIPT_LEN {
            return Err(SubscriptionError::InvalidReceipt(format!(
                "{name:?}: longer than {MAX_RECEIPT_LEN} bytes"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex form used as the on-ledger token name.
    pub fn to_asset_name_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    pub fn from_asset_name_hex(name: &str) -> Result<Self, SubscriptionError> {
        let bytes = hex::decode(name).map_err(|e| SubscriptionError::InvalidReceipt(e.to_string()))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| SubscriptionError::InvalidReceipt("asset name is not utf-8".into()))?;
        text.parse()
    }

    /// Start time encoded in the name.
    pub fn start_time(&self) -> u64 {
        // Validated on construction.
        self.0
            .rsplit('_')
            .next()
            .and_then(|ts| ts.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ReceiptId {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| SubscriptionError::InvalidReceipt(format!("{s:?}: {why}"));

        if s.len() > MAX_RECEIPT_LEN {
            return Err(invalid("longer than 32 bytes"));
        }
        let rest = s
            .strip_prefix(RECEIPT_PREFIX)
            .ok_or_else(|| invalid("missing Sub_ prefix"))?;
        let (owner, ts) = rest
            .split_once('_')
            .ok_or_else(|| invalid("missing start time"))?;
        if owner.len() != RECEIPT_OWNER_CHARS
            || !owner.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(invalid("owner prefix must be 8 lowercase hex chars"));
        }
        // Only the form `derive` produces: plain digits, no sign or leading zero.
        let canonical = !ts.is_empty()
            && ts.bytes().all(|b| b.is_ascii_digit())
            && (ts == "0" || !ts.starts_with('0'));
        if !canonical || ts.parse::<u64>().is_err() {
            return Err(invalid("start time must be decimal milliseconds"));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ReceiptId {
    type Error = SubscriptionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReceiptId> for String {
    fn from(value: ReceiptId) -> Self {
        value.0
    }
}

/// Metadata attached to the locked stake, read by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDatum {
    pub owner: OwnerId,
    pub start_time: u64,
}

/// One active lock. Immutable between subscribe and withdraw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub owner: OwnerId,
    pub start_time: u64,
    pub locked_amount: u64,
    pub receipt_id: ReceiptId,
}

impl SubscriptionRecord {
    pub fn new(owner: OwnerId, start_time: u64, locked_amount: u64) -> Result<Self, SubscriptionError> {
        Ok(Self {
            owner,
            start_time,
            locked_amount,
            receipt_id: ReceiptId::derive(&owner, start_time)?,
        })
    }

    pub fn datum(&self) -> SubscriptionDatum {
        SubscriptionDatum {
            owner: self.owner,
            start_time: self.start_time,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(i64::try_from(self.start_time).ok()?)
    }
}

/// Ledger-assigned handle of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHandle(pub String);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}
