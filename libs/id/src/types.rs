//! Typed identifiers for marketplace objects.
//!
//! Deployment, group and lease IDs nest: a group ID is a deployment ID plus a
//! group sequence, and a lease ID is a group ID plus an order sequence and the
//! provider address.

use sha2::{Digest, Sha224};

use crate::{impl_string_id, IdError};

// =============================================================================
// Account Address
// =============================================================================

/// An on-chain account address (tenant or provider).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(String);

impl Address {
    /// Parses an address. Addresses are non-empty lowercase alphanumerics.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(IdError::InvalidAddress(s.to_string()));
        }

        Ok(Self(s.to_string()))
    }

    /// Returns the address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl_string_id!(Address);

// =============================================================================
// Deployment / Group / Lease
// =============================================================================

/// Identifies a tenant deployment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeploymentId {
    pub owner: Address,
    pub dseq: u64,
}

/// Identifies one workload group within a deployment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId {
    pub owner: Address,
    pub dseq: u64,
    pub gseq: u32,
}

/// Identifies a lease: one group served by one provider for one order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LeaseId {
    pub owner: Address,
    pub dseq: u64,
    pub gseq: u32,
    pub oseq: u32,
    pub provider: Address,
}

impl DeploymentId {
    pub fn new(owner: Address, dseq: u64) -> Self {
        Self { owner, dseq }
    }

    pub fn parse(s: &str) -> Result<Self, IdError> {
        let parts = split(s, "deployment", 2)?;
        Ok(Self {
            owner: Address::parse(parts[0])?,
            dseq: seq(parts[1], "deployment")?,
        })
    }
}

impl GroupId {
    pub fn new(deployment: DeploymentId, gseq: u32) -> Self {
        Self {
            owner: deployment.owner,
            dseq: deployment.dseq,
            gseq,
        }
    }

    pub fn parse(s: &str) -> Result<Self, IdError> {
        let parts = split(s, "group", 3)?;
        Ok(Self {
            owner: Address::parse(parts[0])?,
            dseq: seq(parts[1], "deployment")?,
            gseq: seq(parts[2], "group")?,
        })
    }

    /// Returns the deployment this group belongs to.
    pub fn deployment_id(&self) -> DeploymentId {
        DeploymentId::new(self.owner.clone(), self.dseq)
    }
}

impl LeaseId {
    pub fn new(group: GroupId, oseq: u32, provider: Address) -> Self {
        Self {
            owner: group.owner,
            dseq: group.dseq,
            gseq: group.gseq,
            oseq,
            provider,
        }
    }

    pub fn parse(s: &str) -> Result<Self, IdError> {
        let parts = split(s, "lease", 5)?;
        Ok(Self {
            owner: Address::parse(parts[0])?,
            dseq: seq(parts[1], "deployment")?,
            gseq: seq(parts[2], "group")?,
            oseq: seq(parts[3], "order")?,
            provider: Address::parse(parts[4])?,
        })
    }

    /// Returns the group this lease serves.
    pub fn group_id(&self) -> GroupId {
        GroupId {
            owner: self.owner.clone(),
            dseq: self.dseq,
            gseq: self.gseq,
        }
    }

    /// Returns the deployment this lease belongs to.
    pub fn deployment_id(&self) -> DeploymentId {
        DeploymentId::new(self.owner.clone(), self.dseq)
    }

    /// Orchestration namespace that holds every object of this lease.
    ///
    /// Lowercase hex of the SHA-224 of the canonical lease string. The result
    /// is 56 characters, a valid DNS-1123 label.
    pub fn namespace(&self) -> String {
        let digest = Sha224::digest(self.to_string().as_bytes());
        hex::encode(digest)
    }
}

impl std::fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.dseq)
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.owner, self.dseq, self.gseq)
    }
}

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.owner, self.dseq, self.gseq, self.oseq, self.provider
        )
    }
}

impl_string_id!(DeploymentId);
impl_string_id!(GroupId);
impl_string_id!(LeaseId);

fn split<'a>(s: &'a str, kind: &'static str, expected: usize) -> Result<Vec<&'a str>, IdError> {
    if s.is_empty() {
        return Err(IdError::Empty);
    }

    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() != expected {
        return Err(IdError::SegmentCount {
            kind,
            expected,
            actual: parts.len(),
        });
    }

    Ok(parts)
}

fn seq<T: std::str::FromStr>(value: &str, field: &'static str) -> Result<T, IdError> {
    value.parse().map_err(|_| IdError::InvalidSequence {
        field,
        value: value.to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
