//! Service engines and the build driver.
//!
//! One engine is instantiated per declared service per build. Construction
//! validates the global parameters (and, for `account`, builds the master
//! identity table) and decodes the service's host directives; assembly then
//! walks hosts in declaration order and produces an [`Assembly`].
//!
//! Engines run strictly one after another. The only thing shared between
//! them is read-only access through the [`Registry`], which doubles as the
//! [`Resolver`].

mod account;
mod fleet;
mod package;
mod sysvinit;

pub use account::{AccountDirective, AccountService};
pub use fleet::{FleetDirective, FleetService};
pub use package::{encode_group, PackageDirective, PackageFlavor, PackageService};
pub use sysvinit::{DaemonDirective, SysvinitService};

use tracing::info;

use crate::artifact::Assembly;
use crate::error::Result;
use crate::identity::MasterIdentityTable;
use crate::resolver::{Resolver, RoleTable};
use crate::site::{ServiceKind, SiteDefinition};

/// A service engine for one build.
pub trait Service {
    /// Declared instance name.
    fn name(&self) -> &str;

    fn kind(&self) -> ServiceKind;

    /// Sibling services that must be declared for assembly to run.
    fn required_services(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Produce this service's artifacts.
    fn assemble(&self, resolver: &dyn Resolver) -> Result<Assembly>;

    /// Fleet role membership, if this service publishes it.
    fn roles(&self) -> Option<&RoleTable> {
        None
    }

    /// Identity tables, if this service publishes them.
    fn identities(&self) -> Option<&MasterIdentityTable> {
        None
    }
}

/// All service engines of one build, in declaration order.
pub struct Registry {
    services: Vec<Box<dyn Service>>,
}

impl Registry {
    /// Instantiate every declared service.
    ///
    /// Fails on the first service whose parameters or directives are
    /// invalid.
    pub fn from_site(site: &SiteDefinition) -> Result<Self> {
        let mut services: Vec<Box<dyn Service>> = Vec::with_capacity(site.services.len());
        for decl in &site.services {
            let service: Box<dyn Service> = match decl.kind {
                ServiceKind::Fleet => Box::new(FleetService::new(decl, site)?),
                ServiceKind::Account => Box::new(AccountService::new(decl, site)?),
                ServiceKind::Yumpkg => {
                    Box::new(PackageService::new(decl, site, PackageFlavor::Yum)?)
                }
                ServiceKind::Aptpkg => {
                    Box::new(PackageService::new(decl, site, PackageFlavor::Apt)?)
                }
                ServiceKind::Sysvinit => Box::new(SysvinitService::new(decl, site)?),
            };
            services.push(service);
        }
        Ok(Self { services })
    }

    pub fn services(&self) -> impl Iterator<Item = &dyn Service> {
        self.services.iter().map(|s| s.as_ref())
    }

    /// Assemble every service. Nothing is returned unless all succeed.
    pub fn assemble_all(&self) -> Result<Vec<Assembly>> {
        let mut assemblies = Vec::with_capacity(self.services.len());
        for service in self.services() {
            for required in service.required_services() {
                self.resolve(service.name(), required)?;
            }

            info!("Assembling {} ({})...", service.name(), service.kind());
            let assembly = service.assemble(self)?;
            info!(
                "  {}: {} files, {} hosts",
                service.name(),
                assembly.files.len(),
                assembly.host_vars.len()
            );
            assemblies.push(assembly);
        }
        Ok(assemblies)
    }
}

impl Resolver for Registry {
    fn lookup(&self, name: &str) -> Option<&dyn Service> {
        self.services().find(|s| s.name() == name)
    }
}

/// Instantiate and assemble every service declared in a site.
pub fn build_site(site: &SiteDefinition) -> Result<Vec<Assembly>> {
    Registry::from_site(site)?.assemble_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    const GROUP: &str = "staff:x:2000:\n";
    const PASSWD: &str = "alice:x:3000:2000:Alice:/home/alice:/bin/sh\n";

    fn site_with_sources(hosts: &str) -> (TempDir, SiteDefinition) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("group.master"), GROUP).unwrap();
        fs::write(dir.path().join("passwd.master"), PASSWD).unwrap();
        let text = format!(
            "services:\n\
             \x20 - kind: account\n\
             \x20   groupfile: group.master\n\
             \x20   passwdfile: passwd.master\n\
             hosts:\n{}",
            hosts
        );
        let site = SiteDefinition::parse(&text, Path::new("site.yaml"), dir.path()).unwrap();
        (dir, site)
    }

    #[test]
    fn test_known_user_lands_in_host_vars() {
        let (_dir, site) = site_with_sources("  - name: web1\n    account:\n      - user: alice\n");
        let assemblies = build_site(&site).unwrap();
        let account = &assemblies[0];
        assert_eq!(account.host("web1").unwrap().get("users"), Some("alice"));
        assert_eq!(account.file("group").unwrap().content, GROUP);
        assert_eq!(account.file("passwd").unwrap().content, PASSWD);
    }

    #[test]
    fn test_unknown_user_fails_build() {
        let (_dir, site) = site_with_sources("  - name: web1\n    account:\n      - user: bob\n");
        let err = build_site(&site).unwrap_err();
        match &err {
            BuildError::DanglingReference { reference, host, .. } => {
                assert_eq!(reference, "bob");
                assert_eq!(host.as_deref(), Some("web1"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("bob"));
    }

    #[test]
    fn test_missing_required_sibling() {
        let site = SiteDefinition::parse(
            "services:\n  - kind: aptpkg\n",
            Path::new("site.yaml"),
            "/nonexistent",
        )
        .unwrap();
        let err = build_site(&site).unwrap_err();
        match err {
            BuildError::UnresolvedDependency { requester, name } => {
                assert_eq!(requester, "aptpkg");
                assert_eq!(name, "fleet");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_full_site() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("group"), GROUP).unwrap();
        fs::write(dir.path().join("passwd"), PASSWD).unwrap();
        let text = "services:\n\
            \x20 - kind: fleet\n\
            \x20   roles: [dev, prod]\n\
            \x20 - kind: account\n\
            \x20   groupfile: group\n\
            \x20   passwdfile: passwd\n\
            \x20 - kind: yumpkg\n\
            \x20 - kind: sysvinit\n\
            \x20   services:\n\
            \x20     - name: httpd\n\
            \x20       server_cmd: /usr/sbin/httpd\n\
            \x20       user: root\n\
            hosts:\n\
            \x20 - name: build1\n\
            \x20   fleet:\n\
            \x20     - role: dev\n\
            \x20   account:\n\
            \x20     - user: +staff\n\
            \x20   yumpkg:\n\
            \x20     - package: httpd\n\
            \x20     - group: -games\n\
            \x20   sysvinit:\n\
            \x20     - service: httpd\n\
            \x20 - name: web1\n\
            \x20   fleet:\n\
            \x20     - role: prod\n\
            \x20   yumpkg:\n\
            \x20     - package: httpd\n\
            \x20       reltag: beta\n";
        let site = SiteDefinition::parse(text, Path::new("site.yaml"), dir.path()).unwrap();
        let assemblies = build_site(&site).unwrap();
        let names: Vec<&str> = assemblies.iter().map(|a| a.service.as_str()).collect();
        assert_eq!(names, ["fleet", "account", "yumpkg", "sysvinit"]);

        let yum = &assemblies[2];
        let build1 = yum.host("build1").unwrap();
        assert_eq!(build1.get("required"), Some("httpd:-@games"));
        assert_eq!(build1.get("reltag"), Some("dev"));
        assert_eq!(yum.host("web1").unwrap().get("reltag"), Some("beta"));

        let init = &assemblies[3];
        assert!(init.file("httpd.init").unwrap().executable);
        assert_eq!(init.host("build1").unwrap().get("services"), Some("httpd"));
    }
}
