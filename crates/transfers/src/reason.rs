use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockroute_core::DomainError;

/// Why a transfer was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Rebalance,
    Stockout,
    CustomerDemand,
    DamageReplacement,
    Seasonal,
    Other,
}

impl ReasonCode {
    pub const ALL: [ReasonCode; 6] = [
        ReasonCode::Rebalance,
        ReasonCode::Stockout,
        ReasonCode::CustomerDemand,
        ReasonCode::DamageReplacement,
        ReasonCode::Seasonal,
        ReasonCode::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::Rebalance => "REBALANCE",
            ReasonCode::Stockout => "STOCKOUT",
            ReasonCode::CustomerDemand => "CUSTOMER_DEMAND",
            ReasonCode::DamageReplacement => "DAMAGE_REPLACEMENT",
            ReasonCode::Seasonal => "SEASONAL",
            ReasonCode::Other => "OTHER",
        }
    }
}

impl core::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|code| code.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DomainError::validation(format!("unknown reason code: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("customer_demand".parse::<ReasonCode>().unwrap(), ReasonCode::CustomerDemand);
        assert!("whim".parse::<ReasonCode>().is_err());
    }
}
