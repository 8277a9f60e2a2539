//! Request-scoped identity.
//!
//! Every ledger call receives the acting party explicitly; nothing reads
//! identity from ambient session state.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::PartyId;

/// Supply-chain tier of a party. Doubles as the owner type of a stock row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyRole {
    Manufacturer,
    Distributor,
    Seller,
}

impl PartyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyRole::Manufacturer => "manufacturer",
            PartyRole::Distributor => "distributor",
            PartyRole::Seller => "seller",
        }
    }
}

impl core::fmt::Display for PartyRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartyRole {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        match s {
            "manufacturer" => Ok(PartyRole::Manufacturer),
            "distributor" => Ok(PartyRole::Distributor),
            "seller" => Ok(PartyRole::Seller),
            other => Err(DomainError::validation(format!("unknown party role '{other}'"))),
        }
    }
}

/// Identity of the caller for a single ledger request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub actor: PartyId,
    pub role: PartyRole,
}

impl RequestContext {
    pub fn new(actor: PartyId, role: PartyRole) -> Self {
        Self { actor, role }
    }

    /// Whether this request acts as the given party in the given role.
    pub fn is(&self, party: PartyId, role: PartyRole) -> bool {
        self.actor == party && self.role == role
    }
}
