//! Site definition loading.
//!
//! A site is a YAML document listing the service instances of one build and
//! the per-host directives contributed to them:
//!
//! ```yaml
//! services:
//!   - kind: fleet
//!     roles: [dev, prod]
//!   - kind: account
//!     groupfile: group.master
//!     passwdfile: passwd.master
//!   - kind: yumpkg
//!
//! hosts:
//!   - name: build1
//!     fleet:
//!       - role: dev
//!     account:
//!       - user: alice
//!     yumpkg:
//!       - package: httpd
//!       - group: -games
//! ```
//!
//! Every service instance gets its global parameters from the keys next to
//! `kind`/`name`, and each host key other than `name` is the instance name
//! whose directives follow. The schema of those records belongs to the
//! service; this module only splits the document up and keeps order.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{BuildError, Result};

/// Service implementations known to the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Fleet,
    Account,
    Yumpkg,
    Aptpkg,
    Sysvinit,
}

impl ServiceKind {
    /// Default instance name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Fleet => "fleet",
            ServiceKind::Account => "account",
            ServiceKind::Yumpkg => "yumpkg",
            ServiceKind::Aptpkg => "aptpkg",
            ServiceKind::Sysvinit => "sysvinit",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared service instance.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceDecl {
    pub kind: ServiceKind,
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    params: BTreeMap<String, serde_yaml::Value>,
}

impl ServiceDecl {
    pub fn new(kind: ServiceKind) -> Self {
        Self {
            kind,
            name: None,
            params: BTreeMap::new(),
        }
    }

    /// Instance name, defaulting to the kind.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.kind.as_str())
    }

    /// Decode the global parameters into the service's typed record.
    pub fn params<P: DeserializeOwned>(&self) -> Result<P> {
        let mapping: serde_yaml::Mapping = self
            .params
            .iter()
            .map(|(k, v)| (serde_yaml::Value::String(k.clone()), v.clone()))
            .collect();
        serde_yaml::from_value(serde_yaml::Value::Mapping(mapping)).map_err(|source| {
            BuildError::ServiceParams {
                service: self.name().to_string(),
                source,
            }
        })
    }
}

/// One host and the raw directive lists it contributes, keyed by service.
#[derive(Debug, Clone, Deserialize)]
pub struct HostEntry {
    pub name: String,
    #[serde(flatten)]
    directives: BTreeMap<String, serde_yaml::Value>,
}

impl HostEntry {
    /// Names of the services this host has directives for.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.directives.keys().map(String::as_str)
    }

    fn raw(&self, service: &str) -> Option<&serde_yaml::Value> {
        self.directives.get(service)
    }
}

/// Directives of one service grouped by host, in host declaration order.
pub type HostArgs<D> = Vec<(String, Vec<D>)>;

/// Host names become file names under the output tree.
fn is_valid_host_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains("..")
}

/// A parsed site definition.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteDefinition {
    #[serde(default)]
    pub services: Vec<ServiceDecl>,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
    /// Directory relative source paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl SiteDefinition {
    /// Load a site definition from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| BuildError::io("failed to read site definition", path, e))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&text, path, base_dir)
    }

    /// Parse a site definition from text. `origin` is only used in errors.
    pub fn parse(text: &str, origin: &Path, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut site: SiteDefinition =
            serde_yaml::from_str(text).map_err(|source| BuildError::SiteParse {
                path: origin.to_path_buf(),
                source,
            })?;
        site.base_dir = base_dir.into();
        site.validate()?;
        Ok(site)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = Vec::new();
        for decl in &self.services {
            if seen.contains(&decl.name()) {
                return Err(BuildError::DuplicateService(decl.name().to_string()));
            }
            seen.push(decl.name());
        }

        for host in &self.hosts {
            if !is_valid_host_name(&host.name) {
                return Err(BuildError::InvalidHostName(host.name.clone()));
            }
            if let Some(service) = host.services().find(|s| !seen.contains(s)) {
                return Err(BuildError::UndeclaredService {
                    host: host.name.clone(),
                    service: service.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Resolve a possibly relative path from the site file.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        self.base_dir.join(path)
    }

    /// Collect and decode the directives addressed to `service`.
    ///
    /// Hosts keep their first-appearance order; a host listed twice has its
    /// directive lists concatenated.
    pub fn host_args<D: DeserializeOwned>(&self, service: &str) -> Result<HostArgs<D>> {
        let mut out: HostArgs<D> = Vec::new();

        for host in &self.hosts {
            let Some(raw) = host.raw(service) else {
                continue;
            };
            let directives: Vec<D> = match raw {
                serde_yaml::Value::Null => Vec::new(),
                value => serde_yaml::from_value(value.clone()).map_err(|e| {
                    BuildError::InvalidDirective {
                        service: service.to_string(),
                        host: host.name.clone(),
                        message: e.to_string(),
                    }
                })?,
            };

            match out.iter_mut().find(|(name, _)| *name == host.name) {
                Some((_, existing)) => existing.extend(directives),
                None => out.push((host.name.clone(), directives)),
            }
        }

        Ok(out)
    }
}
