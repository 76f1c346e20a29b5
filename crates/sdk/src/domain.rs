//! Domain identifiers and cached records of the swap application.
//!
//! Keys are derived deterministically from these identifiers:
//!
//! | Data | Key |
//! | --- | --- |
//! | Account balance | `<account>\|\|<token>` |
//! | Token metadata | `<token>` |
//! | Pool reserves / pool | `<token>\|\|<token>`, fragments sorted |
//!
//! where `<token>` is the canonical [`TokenId`] fragment (`native`,
//! `asset:<id>`, `foreign:0x<location>`, `erc20:0x<address>`).

use std::{fmt, str::FromStr};

use alloy::primitives::{Address, hex};
use serde::{Deserialize, Serialize};

use crate::{
    codec::{BigInt, Blob},
    error::{EngineError, Result},
    types::Key,
};

pub const KEY_SEPARATOR: &str = "||";

/// Token identifier, discriminated by the `type` field in cache blobs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenId {
    /// Native token of the chain.
    Native,
    /// Asset registered on the chain itself.
    Asset { id: u32 },
    /// Asset originating from another chain of the network family, identified
    /// by its encoded location.
    Foreign { location: Blob },
    /// ERC-20 token contract.
    Erc20 { address: Address },
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenId::Native => write!(f, "native"),
            TokenId::Asset { id } => write!(f, "asset:{id}"),
            TokenId::Foreign { location } => write!(f, "foreign:{location}"),
            TokenId::Erc20 { address } => write!(f, "erc20:{}", hex::encode_prefixed(address)),
        }
    }
}

impl FromStr for TokenId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || EngineError::InvalidArgument(format!("invalid token id: {s:?}"));
        if s == "native" {
            return Ok(TokenId::Native);
        }
        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;
        match kind {
            "asset" => rest.parse().map(|id| TokenId::Asset { id }).map_err(|_| invalid()),
            "foreign" => rest.parse().map(|location| TokenId::Foreign { location }),
            "erc20" => Address::from_str(rest)
                .map(|address| TokenId::Erc20 { address })
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

/// Key of an account balance, see [`BalanceKey`].
pub fn balance_key(account: &str, token: &TokenId) -> Key {
    Key::from(format!("{account}{KEY_SEPARATOR}{token}"))
}

/// Key of token metadata.
pub fn token_key(token: &TokenId) -> Key { Key::from(token.to_string()) }

/// Key of a token pair, independent of the order of the two tokens.
pub fn pair_key(a: &TokenId, b: &TokenId) -> Key {
    let (a, b) = (a.to_string(), b.to_string());
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    Key::from(format!("{first}{KEY_SEPARATOR}{second}"))
}

/// Identifier of one account balance.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BalanceKey {
    pub account: String,
    pub token: TokenId,
}

impl BalanceKey {
    pub fn new(account: impl Into<String>, token: TokenId) -> Self {
        Self { account: account.into(), token }
    }

    pub fn key(&self) -> Key { balance_key(&self.account, &self.token) }

    pub fn parse(key: &Key) -> Result<Self> {
        let (account, token) = key.as_str().split_once(KEY_SEPARATOR).ok_or_else(|| {
            EngineError::InvalidArgument(format!("not a balance key: {key}"))
        })?;
        Ok(Self { account: account.to_string(), token: token.parse()? })
    }
}

/// Balance of an account in a single token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub free: BigInt,
    pub reserved: BigInt,
    pub frozen: BigInt,
}

impl Balance {
    pub fn free(free: impl Into<BigInt>) -> Self { Self { free: free.into(), ..Default::default() } }

    /// Part of the free balance that is not frozen.
    pub fn transferable(&self) -> BigInt {
        (self.free.clone() - self.frozen.clone()).max(BigInt::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.free.is_zero() && self.reserved.is_zero() && self.frozen.is_zero()
    }
}

/// Reserves and liquidity token supply of a pool.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolReserves {
    pub reserve_a: BigInt,
    pub reserve_b: BigInt,
    pub lp_supply: BigInt,
}

impl PoolReserves {
    /// Pool exists but holds no liquidity.
    pub fn is_empty(&self) -> bool { self.reserve_a.is_zero() || self.reserve_b.is_zero() }
}

/// Token metadata, as listed in token directories.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub id: TokenId,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub existential_deposit: BigInt,
}

/// Liquidity pool between two tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub pair: (TokenId, TokenId),
    pub lp_token: TokenId,
}

impl Pool {
    pub fn key(&self) -> Key { pair_key(&self.pair.0, &self.pair.1) }
}
