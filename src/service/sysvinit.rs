//! System V init service.
//!
//! Every daemon declared in the service's parameters gets a control script
//! `<name>.init`. Hosts pick which daemons they run and whether each one is
//! started at boot.

use serde::Deserialize;
use tracing::debug;

use super::Service;
use crate::artifact::Assembly;
use crate::daemon::{self, DaemonParams, DaemonSpec};
use crate::error::{BuildError, Result};
use crate::hostvars::{HostVariableMap, TokenList};
use crate::resolver::Resolver;
use crate::site::{HostArgs, ServiceDecl, ServiceKind, SiteDefinition};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SysvinitParams {
    #[serde(default)]
    services: Vec<DaemonParams>,
    /// Instance name of the account service daemon users are checked against.
    #[serde(default)]
    account: Option<String>,
}

fn autostart_default() -> bool {
    true
}

/// Host directive: run a declared daemon on this host.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonDirective {
    pub service: String,
    #[serde(default = "autostart_default")]
    pub autostart: bool,
}

pub struct SysvinitService {
    name: String,
    daemons: Vec<DaemonSpec>,
    account: String,
    host_args: HostArgs<DaemonDirective>,
}

impl SysvinitService {
    pub fn new(decl: &ServiceDecl, site: &SiteDefinition) -> Result<Self> {
        let params: SysvinitParams = decl.params()?;
        let invalid = |message: String| BuildError::InvalidParameter {
            service: decl.name().to_string(),
            message,
        };

        let mut daemons: Vec<DaemonSpec> = Vec::with_capacity(params.services.len());
        for record in params.services {
            let spec = DaemonSpec::from_params(record).map_err(invalid)?;
            if daemons.iter().any(|d| d.name == spec.name) {
                return Err(invalid(format!("daemon {} is declared more than once", spec.name)));
            }
            daemons.push(spec);
        }

        let host_args: HostArgs<DaemonDirective> = site.host_args(decl.name())?;
        for (host, directives) in &host_args {
            for directive in directives {
                if !daemons.iter().any(|d| d.name == directive.service) {
                    return Err(BuildError::dangling_on("daemon", &directive.service, host));
                }
            }
        }

        Ok(Self {
            name: decl.name().to_string(),
            daemons,
            account: params
                .account
                .unwrap_or_else(|| ServiceKind::Account.as_str().to_string()),
            host_args,
        })
    }

    pub fn daemon(&self, name: &str) -> Option<&DaemonSpec> {
        self.daemons.iter().find(|d| d.name == name)
    }

    /// Daemon users must exist when the site manages accounts.
    fn check_users(&self, resolver: &dyn Resolver) -> Result<()> {
        let Some(account) = resolver.resolve_optional(&self.account) else {
            return Ok(());
        };
        let identities = account.identities()?;
        for spec in self.daemons.iter().filter(|d| !d.is_privileged()) {
            if !identities.has_user(&spec.user) {
                return Err(BuildError::dangling(
                    format!("user for daemon {}", spec.name),
                    spec.user.as_str(),
                ));
            }
        }
        Ok(())
    }
}

impl Service for SysvinitService {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ServiceKind {
        ServiceKind::Sysvinit
    }

    fn assemble(&self, resolver: &dyn Resolver) -> Result<Assembly> {
        self.check_users(resolver)?;

        let mut assembly = Assembly::new(&self.name);
        assembly.site_default("services", "");
        assembly.site_default("services_nostart", "");
        assembly.copy_tree(ServiceKind::Sysvinit.as_str());

        for spec in &self.daemons {
            debug!("{}: rendering {}", self.name, spec.script_name());
            assembly.add_executable(spec.script_name(), daemon::render(spec));
        }

        for (host, directives) in &self.host_args {
            let mut started = TokenList::new();
            let mut not_started = TokenList::new();
            for directive in directives {
                if directive.autostart {
                    started.push(directive.service.as_str());
                } else {
                    not_started.push(directive.service.as_str());
                }
            }

            let mut vars = HostVariableMap::new(host.as_str());
            vars.insert("services", started.join(" "))?;
            vars.insert("services_nostart", not_started.join(" "))?;
            assembly.push_host_vars(vars);
        }

        Ok(assembly)
    }
}
