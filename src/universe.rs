//! Market universes and asset bucket assignment.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tickers used when a market has no usable data of its own.
pub const FALLBACK_TICKERS: [&str; 4] = ["SPY", "QQQ", "TLT", "GLD"];

/// Asset bucket used by the regime allocation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetBucket {
    Equity,
    Bonds,
    Gold,
    Cash,
}

impl AssetBucket {
    pub const ALL: [AssetBucket; 4] = [
        AssetBucket::Equity,
        AssetBucket::Bonds,
        AssetBucket::Gold,
        AssetBucket::Cash,
    ];
}

impl fmt::Display for AssetBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetBucket::Equity => write!(f, "equity"),
            AssetBucket::Bonds => write!(f, "bonds"),
            AssetBucket::Gold => write!(f, "gold"),
            AssetBucket::Cash => write!(f, "cash"),
        }
    }
}

/// A tradable market universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketUniverse {
    /// Identifier used on the command line (`usa`, `india`, `uk`).
    pub id: String,
    pub name: String,
    pub currency: String,
    pub index: String,
    /// Ticker of the external volatility index.
    pub volatility: String,
    pub equity: Vec<String>,
    pub etfs: Vec<String>,
    pub bonds: Vec<String>,
    pub gold: Vec<String>,
    /// Default ticker set used for allocation.
    pub default_tickers: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl MarketUniverse {
    pub fn usa() -> Self {
        Self {
            id: "usa".to_string(),
            name: "USA".to_string(),
            currency: "$".to_string(),
            index: "S&P 500".to_string(),
            volatility: "^VIX".to_string(),
            equity: strings(&["AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META"]),
            etfs: strings(&["SPY", "QQQ", "XLK", "XLF"]),
            bonds: strings(&["TLT", "BND"]),
            gold: strings(&["GLD"]),
            default_tickers: strings(&["SPY", "QQQ", "TLT", "GLD", "XLK", "XLF"]),
        }
    }

    pub fn india() -> Self {
        Self {
            id: "india".to_string(),
            name: "India".to_string(),
            currency: "₹".to_string(),
            index: "NIFTY 50".to_string(),
            volatility: "^VIX".to_string(),
            equity: strings(&[
                "RELIANCE.NS",
                "TCS.NS",
                "HDFCBANK.NS",
                "INFY.NS",
                "ICICIBANK.NS",
                "SBIN.NS",
            ]),
            etfs: strings(&["NIFTYBEES.NS", "BANKBEES.NS"]),
            bonds: strings(&["LIQUIDBEES.NS"]),
            gold: strings(&["GOLDBEES.NS"]),
            default_tickers: strings(&[
                "RELIANCE.NS",
                "TCS.NS",
                "HDFCBANK.NS",
                "NIFTYBEES.NS",
                "GOLDBEES.NS",
                "LIQUIDBEES.NS",
            ]),
        }
    }

    pub fn uk() -> Self {
        Self {
            id: "uk".to_string(),
            name: "UK".to_string(),
            currency: "£".to_string(),
            index: "FTSE 100".to_string(),
            volatility: "^VIX".to_string(),
            equity: strings(&["HSBA.L", "SHEL.L", "AZN.L", "ULVR.L", "GSK.L", "BP.L"]),
            etfs: strings(&["ISF.L", "VUSA.L"]),
            bonds: strings(&["VGOV.L"]),
            gold: strings(&["SGLN.L"]),
            default_tickers: strings(&["ISF.L", "VUSA.L", "VGOV.L", "SGLN.L", "HSBA.L", "AZN.L"]),
        }
    }

    /// All built-in universes.
    pub fn all() -> Vec<MarketUniverse> {
        vec![Self::usa(), Self::india(), Self::uk()]
    }

    /// Look up a universe by identifier (case-insensitive).
    pub fn by_id(id: &str) -> Result<MarketUniverse> {
        let needle = id.to_lowercase();
        Self::all()
            .into_iter()
            .find(|m| m.id == needle)
            .ok_or_else(|| PipelineError::ConfigError(format!("Unknown market: {}", id)))
    }

    /// Bucket of a ticker. Bonds double as the cash proxy; anything not
    /// listed as a bond or gold holding is treated as equity.
    pub fn bucket_of(&self, ticker: &str) -> AssetBucket {
        if self.bonds.iter().any(|t| t == ticker) || is_fallback_bond(ticker) {
            AssetBucket::Bonds
        } else if self.gold.iter().any(|t| t == ticker) || is_fallback_gold(ticker) {
            AssetBucket::Gold
        } else {
            AssetBucket::Equity
        }
    }

    /// Column indices per bucket for a ticker list. The cash bucket reuses
    /// the bond columns.
    pub fn bucket_assignment(&self, tickers: &[String]) -> BucketAssignment {
        let mut assignment = BucketAssignment::default();
        for (i, ticker) in tickers.iter().enumerate() {
            match self.bucket_of(ticker) {
                AssetBucket::Equity => assignment.equity.push(i),
                AssetBucket::Bonds => assignment.bonds.push(i),
                AssetBucket::Gold => assignment.gold.push(i),
                AssetBucket::Cash => assignment.cash.push(i),
            }
        }
        if assignment.cash.is_empty() {
            assignment.cash = assignment.bonds.clone();
        }
        assignment
    }
}

fn is_fallback_bond(ticker: &str) -> bool {
    ticker == "TLT"
}

fn is_fallback_gold(ticker: &str) -> bool {
    ticker == "GLD"
}

/// Column indices per asset bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketAssignment {
    pub equity: Vec<usize>,
    pub bonds: Vec<usize>,
    pub gold: Vec<usize>,
    pub cash: Vec<usize>,
}

impl BucketAssignment {
    pub fn get(&self, bucket: AssetBucket) -> &[usize] {
        match bucket {
            AssetBucket::Equity => &self.equity,
            AssetBucket::Bonds => &self.bonds,
            AssetBucket::Gold => &self.gold,
            AssetBucket::Cash => &self.cash,
        }
    }
}
