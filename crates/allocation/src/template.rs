use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroute_core::{DomainError, DomainResult, Entity, LocationId, TenantId, UserId, Versioned};

stockroute_core::aggregate_id!(
    /// Saved allocation template identifier.
    TemplateId
);

/// How much of a line a template rule claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateShare {
    /// Share of what is left after fixed rules, in whole percent.
    Percentage(u32),
    /// Fixed unit quantity, applied before any percentage rule.
    Fixed(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRule {
    pub location_id: LocationId,
    pub share: TemplateShare,
}

/// A named, reusable distribution of line quantities over locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTemplate {
    id: TemplateId,
    tenant_id: TenantId,
    name: String,
    description: Option<String>,
    rules: Vec<TemplateRule>,
    created_by: UserId,
    created_at: DateTime<Utc>,
    version: u64,
}

impl AllocationTemplate {
    pub fn new(
        tenant_id: TenantId,
        id: TemplateId,
        name: impl Into<String>,
        description: Option<String>,
        rules: Vec<TemplateRule>,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("template name cannot be empty"));
        }
        validate_rules(&rules)?;
        Ok(Self {
            id,
            tenant_id,
            name,
            description: description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
            rules,
            created_by,
            created_at,
            version: 0,
        })
    }

    pub fn id_typed(&self) -> TemplateId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn rules(&self) -> &[TemplateRule] {
        &self.rules
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Split `unallocated` units over the template's locations.
    ///
    /// Fixed rules are served first in rule order, each capped by what is
    /// left. Percentage rules then take `floor(rest × pct / 100)` of the
    /// quantity remaining after the fixed rules. Zero shares are omitted.
    pub fn distribute(&self, unallocated: i64) -> Vec<(LocationId, i64)> {
        let mut left = unallocated.max(0);
        let mut out = Vec::with_capacity(self.rules.len());

        for rule in &self.rules {
            if let TemplateShare::Fixed(quantity) = rule.share {
                let take = quantity.min(left);
                if take > 0 {
                    out.push((rule.location_id, take));
                    left -= take;
                }
            }
        }

        let base = left;
        for rule in &self.rules {
            if let TemplateShare::Percentage(pct) = rule.share {
                let take = base * i64::from(pct) / 100;
                if take > 0 {
                    out.push((rule.location_id, take));
                }
            }
        }
        out
    }
}

fn validate_rules(rules: &[TemplateRule]) -> DomainResult<()> {
    if rules.is_empty() {
        return Err(DomainError::validation("template needs at least one rule"));
    }
    let mut percent_total: u32 = 0;
    for (i, rule) in rules.iter().enumerate() {
        if rules[..i].iter().any(|r| r.location_id == rule.location_id) {
            return Err(DomainError::validation(format!(
                "location {} appears more than once",
                rule.location_id
            )));
        }
        match rule.share {
            TemplateShare::Percentage(0) | TemplateShare::Fixed(0) => {
                return Err(DomainError::validation("template shares must be positive"));
            }
            TemplateShare::Fixed(q) if q < 0 => {
                return Err(DomainError::validation("template shares must be positive"));
            }
            TemplateShare::Percentage(p) => percent_total = percent_total.saturating_add(p),
            TemplateShare::Fixed(_) => {}
        }
    }
    if percent_total > 100 {
        return Err(DomainError::validation(format!(
            "template percentages sum to {percent_total}, must be at most 100"
        )));
    }
    Ok(())
}

impl Entity for AllocationTemplate {
    type Id = TemplateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Versioned for AllocationTemplate {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
