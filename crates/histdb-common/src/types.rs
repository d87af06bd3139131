//! Shared domain types

use crate::error::HistdbError;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{BTreeMap, Values};

/// One side of a trade, or anything else denominated on the ledger.
///
/// An asset is either the network's native token or a token issued by an
/// account, identified by issuer address plus short code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum Asset {
    Native,
    Issued { code: String, issuer: String },
}

impl Asset {
    /// Construct an issued asset
    pub fn issued(code: impl Into<String>, issuer: impl Into<String>) -> Self {
        Asset::Issued {
            code: code.into(),
            issuer: issuer.into(),
        }
    }

    /// The type discriminator stored in the assets table
    pub fn asset_type(&self) -> &'static str {
        match self {
            Asset::Native => "native",
            Asset::Issued { .. } => "credit_alphanum",
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Asset::Native => "",
            Asset::Issued { code, .. } => code,
        }
    }

    pub fn issuer(&self) -> &str {
        match self {
            Asset::Native => "",
            Asset::Issued { issuer, .. } => issuer,
        }
    }

    /// Canonical identity string, independent of where or how the asset
    /// was observed. Used as the key of [`AssetsModified`].
    pub fn canonical_name(&self) -> String {
        match self {
            Asset::Native => "native".to_string(),
            Asset::Issued { code, issuer } => format!("{}:{}", code, issuer),
        }
    }
}

impl std::str::FromStr for Asset {
    type Err = HistdbError;

    /// Parse a canonical identity string back into an asset
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == "native" {
            return Ok(Asset::Native);
        }
        match s.split_once(':') {
            Some((code, issuer)) if !code.is_empty() && !issuer.is_empty() => {
                Ok(Asset::issued(code, issuer))
            },
            _ => Err(HistdbError::Parse(format!("invalid asset name: {}", s))),
        }
    }
}

/// The set of distinct assets touched during an ingestion cycle.
///
/// Keyed by canonical asset identity so the same asset observed through
/// different operations collapses to one entry; iteration order is the
/// key order, which keeps downstream bookkeeping deterministic.
#[derive(Debug, Clone, Default)]
pub struct AssetsModified(BTreeMap<String, Asset>);

impl AssetsModified {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an asset as touched. Re-inserting the same asset is a no-op.
    pub fn insert(&mut self, asset: Asset) {
        self.0.entry(asset.canonical_name()).or_insert(asset);
    }

    pub fn contains(&self, asset: &Asset) -> bool {
        self.0.contains_key(&asset.canonical_name())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate assets in canonical-name order
    pub fn iter(&self) -> Values<'_, String, Asset> {
        self.0.values()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name() {
        assert_eq!(Asset::Native.canonical_name(), "native");
        assert_eq!(
            Asset::issued("USD", "GABC").canonical_name(),
            "USD:GABC"
        );
    }

    #[test]
    fn test_canonical_name_round_trips() {
        for asset in [Asset::Native, Asset::issued("USD", "GABC")] {
            assert_eq!(asset.canonical_name().parse::<Asset>().unwrap(), asset);
        }
        assert!(matches!(
            "USD".parse::<Asset>(),
            Err(HistdbError::Parse(_))
        ));
        assert!(matches!(":GABC".parse::<Asset>(), Err(HistdbError::Parse(_))));
    }

    #[test]
    fn test_assets_modified_deduplicates() {
        let mut set = AssetsModified::new();
        set.insert(Asset::Native);
        set.insert(Asset::issued("USD", "GABC"));
        set.insert(Asset::issued("USD", "GABC"));

        assert_eq!(set.len(), 2);
        assert!(set.contains(&Asset::Native));
    }

    #[test]
    fn test_assets_modified_iteration_is_ordered() {
        let mut set = AssetsModified::new();
        set.insert(Asset::issued("ZZZ", "GXYZ"));
        set.insert(Asset::Native);
        set.insert(Asset::issued("AAA", "GABC"));

        let names: Vec<String> = set.iter().map(|a| a.canonical_name()).collect();
        assert_eq!(names, vec!["AAA:GABC", "ZZZ:GXYZ", "native"]);
    }
}
