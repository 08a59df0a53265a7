//! Package selection for yum and apt hosts.
//!
//! Each host accumulates a `:`-joined `required` list of package tokens.
//! Packages are taken verbatim (a leading `-` asks for removal); yum groups
//! are encoded as `@group`, or `-@group` for removal. The scalar fields
//! `environ` and `reltag` may be set once per host; a host without a
//! `reltag` gets `dev` when it belongs to a non-production fleet role and
//! `prod` otherwise.

use serde::Deserialize;
use tracing::debug;

use super::Service;
use crate::artifact::Assembly;
use crate::error::{BuildError, Result};
use crate::hostvars::{HostVariableMap, TokenList};
use crate::resolver::{Resolver, NON_PRODUCTION_ROLES};
use crate::site::{HostArgs, ServiceDecl, ServiceKind, SiteDefinition};

/// Package manager flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFlavor {
    Yum,
    Apt,
}

impl PackageFlavor {
    pub fn kind(&self) -> ServiceKind {
        match self {
            PackageFlavor::Yum => ServiceKind::Yumpkg,
            PackageFlavor::Apt => ServiceKind::Aptpkg,
        }
    }

    /// Site-wide default for `environ`.
    pub fn default_environ(&self) -> &'static str {
        match self {
            PackageFlavor::Yum => "centos",
            PackageFlavor::Apt => "debian",
        }
    }

    pub fn supports_groups(&self) -> bool {
        matches!(self, PackageFlavor::Yum)
    }

    fn needs_account(&self) -> bool {
        matches!(self, PackageFlavor::Yum)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageParams {
    /// Instance name of the fleet service.
    #[serde(default)]
    fleet: Option<String>,
    /// Instance name of the account service (yum only).
    #[serde(default)]
    account: Option<String>,
}

/// Host directive. Any combination of fields may be given.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageDirective {
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub environ: Option<String>,
    #[serde(default)]
    pub reltag: Option<String>,
}

/// Encode a package group as a requirement token.
///
/// `teamA` and `@teamA` become `@teamA`; `-teamA` and `-@teamA` (any
/// number of dashes) become `-@teamA`.
pub fn encode_group(group: &str) -> String {
    let name = group.trim_start_matches('-');
    let name = name.strip_prefix('@').unwrap_or(name);
    if group.starts_with('-') {
        format!("-@{}", name)
    } else {
        format!("@{}", name)
    }
}

pub struct PackageService {
    name: String,
    flavor: PackageFlavor,
    fleet: String,
    account: Option<String>,
    host_args: HostArgs<PackageDirective>,
}

impl PackageService {
    pub fn new(decl: &ServiceDecl, site: &SiteDefinition, flavor: PackageFlavor) -> Result<Self> {
        let params: PackageParams = decl.params()?;

        let account = if flavor.needs_account() {
            Some(
                params
                    .account
                    .unwrap_or_else(|| ServiceKind::Account.as_str().to_string()),
            )
        } else if params.account.is_some() {
            return Err(BuildError::InvalidParameter {
                service: decl.name().to_string(),
                message: "apt packages do not use an account service".to_string(),
            });
        } else {
            None
        };

        let host_args: HostArgs<PackageDirective> = site.host_args(decl.name())?;
        if !flavor.supports_groups() {
            if let Some((host, _)) = host_args
                .iter()
                .find(|(_, directives)| directives.iter().any(|d| d.group.is_some()))
            {
                return Err(BuildError::InvalidDirective {
                    service: decl.name().to_string(),
                    host: host.clone(),
                    message: "package groups are not supported".to_string(),
                });
            }
        }

        Ok(Self {
            name: decl.name().to_string(),
            flavor,
            fleet: params
                .fleet
                .unwrap_or_else(|| ServiceKind::Fleet.as_str().to_string()),
            account,
            host_args,
        })
    }
}

impl Service for PackageService {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ServiceKind {
        self.flavor.kind()
    }

    fn required_services(&self) -> Vec<&str> {
        let mut required = vec![self.fleet.as_str()];
        required.extend(self.account.as_deref());
        required
    }

    fn assemble(&self, resolver: &dyn Resolver) -> Result<Assembly> {
        let fleet = resolver.resolve(&self.name, &self.fleet)?;

        let mut assembly = Assembly::new(&self.name);
        assembly.site_default("required", "");
        assembly.site_default("reltag", "");
        assembly.site_default("environ", self.flavor.default_environ());
        assembly.copy_tree(self.flavor.kind().as_str());

        for (host, directives) in &self.host_args {
            let mut required = TokenList::new();
            let mut vars = HostVariableMap::new(host.as_str());

            for directive in directives {
                if let Some(package) = &directive.package {
                    required.push(package.as_str());
                }
                if let Some(group) = &directive.group {
                    required.push(encode_group(group));
                }
                if let Some(environ) = &directive.environ {
                    vars.insert("environ", environ.as_str())?;
                }
                if let Some(reltag) = &directive.reltag {
                    vars.insert("reltag", reltag.as_str())?;
                }
            }

            if !vars.contains_key("reltag") {
                let reltag = if fleet.in_any_role(NON_PRODUCTION_ROLES, host)? {
                    "dev"
                } else {
                    "prod"
                };
                vars.insert_default("reltag", reltag);
            }
            vars.insert("required", required.join(":"))?;
            debug!("{}: {} packages for {}", self.name, required.as_slice().len(), host);
            assembly.push_host_vars(vars);
        }

        Ok(assembly)
    }
}
