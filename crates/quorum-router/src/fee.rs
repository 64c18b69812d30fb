//! Per-venue fee schedule.
//!
//! Fees are basis points. Maker fees may be negative (rebates).

use crate::error::{RouterError, RouterResult};
use quorum_core::{Liquidity, VenueId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One venue's fee schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueFee {
    pub venue: VenueId,
    pub maker_fee_bps: Decimal,
    pub taker_fee_bps: Decimal,
}

impl VenueFee {
    pub fn new(venue: VenueId, maker_fee_bps: Decimal, taker_fee_bps: Decimal) -> Self {
        Self {
            venue,
            maker_fee_bps,
            taker_fee_bps,
        }
    }

    /// Fee for the given side of the book.
    pub fn bps(&self, liquidity: Liquidity) -> Decimal {
        match liquidity {
            Liquidity::Taker => self.taker_fee_bps,
            Liquidity::Maker => self.maker_fee_bps,
        }
    }
}

/// Static fee lookup, built once from configuration.
#[derive(Debug, Clone, Default)]
pub struct FeeTable {
    fees: HashMap<VenueId, VenueFee>,
}

impl FeeTable {
    /// Build from configured entries. A venue listed twice is an error.
    pub fn new(entries: impl IntoIterator<Item = VenueFee>) -> RouterResult<Self> {
        let mut fees = HashMap::new();
        for entry in entries {
            if entry.taker_fee_bps.is_sign_negative() {
                return Err(RouterError::ConfigError(format!(
                    "negative taker fee for {}",
                    entry.venue
                )));
            }
            let venue = entry.venue.clone();
            if fees.insert(venue.clone(), entry).is_some() {
                return Err(RouterError::ConfigError(format!(
                    "duplicate fee entry for {venue}"
                )));
            }
        }
        Ok(Self { fees })
    }

    pub fn get(&self, venue: &VenueId) -> Option<&VenueFee> {
        self.fees.get(venue)
    }

    pub fn fee_bps(&self, venue: &VenueId, liquidity: Liquidity) -> Option<Decimal> {
        self.fees.get(venue).map(|f| f.bps(liquidity))
    }

    pub fn contains(&self, venue: &VenueId) -> bool {
        self.fees.contains_key(venue)
    }

    pub fn len(&self) -> usize {
        self.fees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fees.is_empty()
    }
}
