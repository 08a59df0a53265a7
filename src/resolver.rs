//! Cross-service lookups.
//!
//! Services never reach into each other directly. A service names the
//! siblings it needs, asks the [`Resolver`] for them and gets back a
//! [`ServiceHandle`] exposing read-only queries, or an error naming what is
//! missing.

use crate::error::{BuildError, Result};
use crate::identity::MasterIdentityTable;
use crate::service::Service;

/// Role names whose members are treated as non-production hosts.
pub const NON_PRODUCTION_ROLES: &[&str] = &["dev", "stage", "work"];

/// Lookup of sibling service instances by declared name.
pub trait Resolver {
    /// Find a declared service instance.
    fn lookup(&self, name: &str) -> Option<&dyn Service>;

    /// Resolve a dependency of `requester`, failing if it is not declared.
    fn resolve(&self, requester: &str, name: &str) -> Result<ServiceHandle<'_>> {
        self.lookup(name)
            .map(|service| ServiceHandle { service })
            .ok_or_else(|| BuildError::UnresolvedDependency {
                requester: requester.to_string(),
                name: name.to_string(),
            })
    }

    /// Resolve a sibling that may legitimately be absent.
    fn resolve_optional(&self, name: &str) -> Option<ServiceHandle<'_>> {
        self.lookup(name).map(|service| ServiceHandle { service })
    }
}

/// Read-only view of a resolved sibling service.
#[derive(Clone, Copy)]
pub struct ServiceHandle<'a> {
    service: &'a dyn Service,
}

impl<'a> ServiceHandle<'a> {
    pub fn name(&self) -> &'a str {
        self.service.name()
    }

    /// Hosts that belong to a fleet role. Undeclared roles have no members.
    pub fn members(&self, role: &str) -> Result<&'a [String]> {
        let roles = self.service.roles().ok_or_else(|| BuildError::NotPublished {
            service: self.service.name().to_string(),
            what: "role membership",
        })?;
        Ok(roles.members(role))
    }

    /// Whether `host` is in any of the given roles.
    pub fn in_any_role(&self, roles: &[&str], host: &str) -> Result<bool> {
        for role in roles {
            if self.members(role)?.iter().any(|member| member == host) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Published identity tables.
    pub fn identities(&self) -> Result<&'a MasterIdentityTable> {
        self.service.identities().ok_or_else(|| BuildError::NotPublished {
            service: self.service.name().to_string(),
            what: "identity data",
        })
    }
}

/// Role name to member hosts, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RoleTable {
    roles: Vec<(String, Vec<String>)>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a role with no members yet. Declaring twice is harmless.
    pub fn declare(&mut self, role: impl Into<String>) {
        let role = role.into();
        if !self.is_declared(&role) {
            self.roles.push((role, Vec::new()));
        }
    }

    pub fn is_declared(&self, role: &str) -> bool {
        self.roles.iter().any(|(name, _)| name == role)
    }

    /// Add `host` to a declared role. Returns `false` if the role is unknown.
    pub fn add_member(&mut self, role: &str, host: &str) -> bool {
        match self.roles.iter_mut().find(|(name, _)| name == role) {
            Some((_, members)) => {
                if !members.iter().any(|m| m == host) {
                    members.push(host.to_string());
                }
                true
            }
            None => false,
        }
    }

    pub fn members(&self, role: &str) -> &[String] {
        self.roles
            .iter()
            .find(|(name, _)| name == role)
            .map(|(_, members)| members.as_slice())
            .unwrap_or(&[])
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(|(name, _)| name.as_str())
    }
}
