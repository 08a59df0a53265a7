//! Fleet role membership.
//!
//! Declares the role names of the fleet and lets hosts join them. Other
//! services query membership through the resolver, for example to treat
//! hosts in `dev`, `stage` or `work` as non-production.

use serde::Deserialize;
use tracing::debug;

use super::Service;
use crate::artifact::Assembly;
use crate::error::{BuildError, Result};
use crate::hostvars::{HostVariableMap, TokenList};
use crate::resolver::{Resolver, RoleTable};
use crate::site::{HostArgs, ServiceDecl, ServiceKind, SiteDefinition};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FleetParams {
    #[serde(default)]
    roles: Vec<String>,
}

/// Host directive: put the host in a role.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetDirective {
    pub role: String,
}

pub struct FleetService {
    name: String,
    roles: RoleTable,
    host_args: HostArgs<FleetDirective>,
}

impl FleetService {
    pub fn new(decl: &ServiceDecl, site: &SiteDefinition) -> Result<Self> {
        let params: FleetParams = decl.params()?;
        let host_args: HostArgs<FleetDirective> = site.host_args(decl.name())?;

        let mut roles = RoleTable::new();
        for role in &params.roles {
            roles.declare(role.as_str());
        }
        for (host, directives) in &host_args {
            for directive in directives {
                if !roles.add_member(&directive.role, host) {
                    return Err(BuildError::dangling_on("role", &directive.role, host));
                }
            }
        }
        debug!("{}: {} roles", decl.name(), params.roles.len());

        Ok(Self {
            name: decl.name().to_string(),
            roles,
            host_args,
        })
    }
}

impl Service for FleetService {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ServiceKind {
        ServiceKind::Fleet
    }

    fn assemble(&self, _resolver: &dyn Resolver) -> Result<Assembly> {
        let mut assembly = Assembly::new(&self.name);
        assembly.site_default("roles", "");

        for (host, directives) in &self.host_args {
            let mut roles = TokenList::new();
            for directive in directives {
                roles.push(directive.role.as_str());
            }
            let mut vars = HostVariableMap::new(host.as_str());
            vars.insert("roles", roles.join(" "))?;
            assembly.push_host_vars(vars);
        }
        Ok(assembly)
    }

    fn roles(&self) -> Option<&RoleTable> {
        Some(&self.roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn fleet(text: &str) -> Result<FleetService> {
        let site = SiteDefinition::parse(text, Path::new("site.yaml"), "/")?;
        FleetService::new(&site.services[0], &site)
    }

    #[test]
    fn test_membership_from_directives() {
        let fleet = fleet(
            "services:\n  - kind: fleet\n    roles: [dev, prod]\n\
             hosts:\n  - name: a\n    fleet:\n      - role: dev\n      - role: prod\n\
             \x20 - name: b\n    fleet:\n      - role: prod\n",
        )
        .unwrap();
        let roles = fleet.roles().unwrap();
        assert_eq!(roles.members("dev"), ["a".to_string()]);
        assert_eq!(roles.members("prod"), ["a".to_string(), "b".to_string()]);

        let assembly = fleet.assemble(&NoSiblings).unwrap();
        assert_eq!(assembly.host("a").unwrap().get("roles"), Some("dev prod"));
    }

    #[test]
    fn test_unknown_role_names_host() {
        let err = fleet(
            "services:\n  - kind: fleet\n    roles: [prod]\n\
             hosts:\n  - name: a\n    fleet:\n      - role: qa\n",
        )
        .err()
        .unwrap();
        assert_eq!(err.to_string(), "unknown role: qa (host a)");
    }

    struct NoSiblings;

    impl Resolver for NoSiblings {
        fn lookup(&self, _name: &str) -> Option<&dyn Service> {
            None
        }
    }
}
