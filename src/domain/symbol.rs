//! Symbol Mapping - Upstream Identifiers to Internal `BASE/QUOTE`
//!
//! Each upstream names instruments its own way (`BTC-USD`, `BTCUSDT`,
//! `XBT/USD`...). The exchange speaks only `BASE/QUOTE`. The mapper is a
//! fixed lookup table per source, built once from configuration.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Internal instrument identifier, e.g. `BTC/USDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Build a symbol from its base and quote legs (uppercased).
    pub fn new(base: &str, quote: &str) -> Self {
        Self(format!(
            "{}/{}",
            base.trim().to_ascii_uppercase(),
            quote.trim().to_ascii_uppercase()
        ))
    }

    /// Parse a `BASE/QUOTE` string. Returns `None` for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        let (base, quote) = raw.split_once('/')?;
        let valid = |leg: &str| {
            !leg.is_empty() && leg.chars().all(|c| c.is_ascii_alphanumeric())
        };
        if !valid(base.trim()) || !valid(quote.trim()) {
            return None;
        }
        Some(Self::new(base, quote))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which upstream an identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Primary,
    Backup,
}

impl Source {
    /// Label used for metrics and logs.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
        }
    }
}

/// One row of the tracked universe: the internal symbol and how each
/// upstream spells it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub symbol: Symbol,
    pub primary_id: String,
    pub backup_id: String,
}

/// Bidirectional lookup between upstream identifiers and internal symbols.
///
/// `map` is total: any input string yields either a symbol or `None`,
/// never a panic. Callers drop unmapped ticks and count them.
#[derive(Debug, Clone, Default)]
pub struct SymbolMapper {
    /// Primary upstream id → internal symbol.
    primary: HashMap<String, Symbol>,
    /// Backup upstream id → internal symbol.
    backup: HashMap<String, Symbol>,
    /// Internal symbol → (primary id, backup id).
    reverse: HashMap<Symbol, (String, String)>,
}

impl SymbolMapper {
    /// Build the lookup tables from the configured universe.
    pub fn new(entries: impl IntoIterator<Item = SymbolEntry>) -> Self {
        let mut mapper = Self::default();
        for entry in entries {
            mapper
                .primary
                .insert(entry.primary_id.clone(), entry.symbol.clone());
            mapper
                .backup
                .insert(entry.backup_id.clone(), entry.symbol.clone());
            mapper
                .reverse
                .insert(entry.symbol, (entry.primary_id, entry.backup_id));
        }
        mapper
    }

    /// Translate an upstream identifier into the internal symbol space.
    pub fn map(&self, source: Source, upstream_id: &str) -> Option<Symbol> {
        let table = match source {
            Source::Primary => &self.primary,
            Source::Backup => &self.backup,
        };
        table.get(upstream_id).cloned()
    }

    /// Upstream identifiers for a set of internal symbols.
    ///
    /// Symbols without a mapping for `source` are skipped; the result is
    /// sorted and deduplicated so repeated subscription frames are stable.
    pub fn upstream_ids<'a>(
        &self,
        source: Source,
        symbols: impl IntoIterator<Item = &'a Symbol>,
    ) -> Vec<String> {
        let ids: BTreeSet<String> = symbols
            .into_iter()
            .filter_map(|s| self.reverse.get(s))
            .map(|(primary, backup)| match source {
                Source::Primary => primary.clone(),
                Source::Backup => backup.clone(),
            })
            .collect();
        ids.into_iter().collect()
    }

    /// Every internal symbol known to the mapper.
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        self.reverse.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }
}
