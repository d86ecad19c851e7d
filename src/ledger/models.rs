use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Chains the bridge can move value between.
/// Any supported chain can be a source; storage is paid for on the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Base,
    Optimism,
    Arbitrum,
    Avalanche,
    Filecoin,
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Base => "base",
            Chain::Optimism => "optimism",
            Chain::Arbitrum => "arbitrum",
            Chain::Avalanche => "avalanche",
            Chain::Filecoin => "filecoin",
        }
    }

    /// EVM chain id used by the bridge network
    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Ethereum => 1,
            Chain::Base => 8453,
            Chain::Optimism => 10,
            Chain::Arbitrum => 42161,
            Chain::Avalanche => 43114,
            Chain::Filecoin => 314,
        }
    }

    /// Return all known chains
    pub fn all() -> Vec<Chain> {
        vec![
            Chain::Ethereum,
            Chain::Base,
            Chain::Optimism,
            Chain::Arbitrum,
            Chain::Avalanche,
            Chain::Filecoin,
        ]
    }
}

impl FromStr for Chain {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Chain::all()
            .into_iter()
            .find(|chain| chain.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown chain: {}", s)))
    }
}

/// Non-negative integer amount in the smallest token unit.
///
/// Backed by a 256-bit unsigned integer, which covers every EVM-denominated amount.
/// Arithmetic is checked; serialized as a decimal string so no precision is lost at
/// JSON or SQL boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Wei(U256);

impl Wei {
    pub const ZERO: Wei = Wei(U256::ZERO);

    pub fn new(value: U256) -> Self {
        Self(value)
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, other: Wei) -> Option<Wei> {
        self.0.checked_add(other.0).map(Wei)
    }

    pub fn checked_sub(self, other: Wei) -> Option<Wei> {
        self.0.checked_sub(other.0).map(Wei)
    }

    pub fn checked_mul(self, factor: u64) -> Option<Wei> {
        self.0.checked_mul(U256::from(factor)).map(Wei)
    }

    /// Parse a decimal string such as one read back from a NUMERIC column
    pub fn parse_decimal(s: &str) -> AppResult<Wei> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::InvalidInput(format!(
                "Amount must be a non-negative decimal integer, got {:?}",
                s
            )));
        }
        U256::from_str_radix(trimmed, 10)
            .map(Wei)
            .map_err(|e| AppError::InvalidInput(format!("Amount out of range: {}", e)))
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Wei {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Wei::parse_decimal(s)
    }
}

impl From<u64> for Wei {
    fn from(value: u64) -> Self {
        Wei(U256::from(value))
    }
}

impl From<u128> for Wei {
    fn from(value: u128) -> Self {
        Wei(U256::from(value))
    }
}

impl Serialize for Wei {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Wei {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Wei::parse_decimal(&text).map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(Wei::from(n)),
        }
    }
}

/// Normalize a chain-agnostic account identity.
/// Addresses are compared case-insensitively, so they are stored lower-cased.
pub fn normalize_address(address: &str) -> AppResult<String> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidAddress("address is empty".to_string()));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(AppError::InvalidAddress(format!(
            "address contains whitespace: {:?}",
            address
        )));
    }
    Ok(trimmed.to_lowercase())
}

/// Balance entity (one per address)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountBalance {
    pub address: String,
    pub balance_wei: Wei,
    pub updated_at: DateTime<Utc>,
}

/// Ledger entry direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Deduct,
}

/// Append-only ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub address: String,
    pub kind: TransactionKind,
    pub amount_wei: Wei,
    pub related_file_id: Option<Uuid>,
    pub related_settlement_id: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Entry handed to a store; the kind is decided by the store operation
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub address: String,
    pub amount: Wei,
    pub related_file_id: Option<Uuid>,
    pub related_settlement_id: Option<String>,
    pub description: String,
}

impl NewEntry {
    pub fn into_record(self, kind: TransactionKind) -> TransactionRecord {
        TransactionRecord {
            id: Uuid::new_v4(),
            address: self.address,
            kind,
            amount_wei: self.amount,
            related_file_id: self.related_file_id,
            related_settlement_id: self.related_settlement_id,
            description: self.description,
            created_at: Utc::now(),
        }
    }
}

/// Result of an atomic check-then-deduct.
/// Insufficient funds is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DebitOutcome {
    Debited {
        new_balance: Wei,
        transaction_id: Uuid,
    },
    InsufficientFunds {
        current_balance: Wei,
        required: Wei,
    },
}

impl DebitOutcome {
    pub fn is_debited(&self) -> bool {
        matches!(self, DebitOutcome::Debited { .. })
    }
}
