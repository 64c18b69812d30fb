//! Canonical symbol <-> venue market name mapping.

use quorum_core::Symbol;
use std::collections::HashMap;

/// Two-way map between canonical symbols and one venue's market names.
///
/// Venue names are compared case-insensitively on the way back in, since
/// venues are not consistent about echoing the case they were sent.
#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    to_venue: HashMap<Symbol, String>,
    from_venue: HashMap<String, Symbol>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map for `symbols`, taking explicit names from `overrides`
    /// and falling back to `default_name` for the rest.
    pub fn build(
        symbols: &[Symbol],
        overrides: &HashMap<String, String>,
        default_name: impl Fn(&Symbol) -> String,
    ) -> Self {
        let mut map = Self::new();
        for symbol in symbols {
            let name = overrides
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(symbol.as_str()))
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| default_name(symbol));
            map.insert(symbol.clone(), name);
        }
        map
    }

    pub fn insert(&mut self, symbol: Symbol, venue_name: String) {
        self.from_venue
            .insert(venue_name.to_ascii_lowercase(), symbol.clone());
        self.to_venue.insert(symbol, venue_name);
    }

    pub fn venue_name(&self, symbol: &Symbol) -> Option<&str> {
        self.to_venue.get(symbol).map(String::as_str)
    }

    pub fn symbol(&self, venue_name: &str) -> Option<&Symbol> {
        self.from_venue.get(&venue_name.to_ascii_lowercase())
    }

    /// Venue names in the order of `symbols`, skipping unmapped ones.
    pub fn venue_names(&self, symbols: &[Symbol]) -> Vec<String> {
        symbols
            .iter()
            .filter_map(|s| self.to_venue.get(s).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.to_venue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_venue.is_empty()
    }
}
