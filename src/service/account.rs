//! Account service.
//!
//! Builds the master identity table from the configured `group` and
//! `passwd` sources, passes both sources through unchanged, and records
//! which users and groups each host should carry.

use std::fs;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::Service;
use crate::artifact::Assembly;
use crate::error::{BuildError, Result};
use crate::hostvars::{HostVariableMap, TokenList};
use crate::identity::MasterIdentityTable;
use crate::resolver::Resolver;
use crate::site::{HostArgs, ServiceDecl, ServiceKind, SiteDefinition};

static ID_RANGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]+:[0-9]+$").unwrap());

/// Prefix on a `user` directive that selects every member of a group.
const GROUP_SELECTOR: char = '+';

fn default_range() -> String {
    "1000:1999".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AccountParams {
    /// Master passwd source.
    #[serde(default)]
    passwdfile: Option<String>,
    /// Master group source.
    #[serde(default)]
    groupfile: Option<String>,
    /// Ranges used when hosts auto-allocate ids.
    #[serde(default = "default_range")]
    uid_range: String,
    #[serde(default = "default_range")]
    gid_range: String,
    /// Add the group of the same name whenever a user is added.
    #[serde(default)]
    matching_groups: bool,
    /// Space-separated globs of home directories to create.
    #[serde(default)]
    make_homes_matching: String,
    #[serde(default)]
    make_homes_mode: String,
}

/// Host directive: a user (or `+group` for all its members) or a group.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountDirective {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

pub struct AccountService {
    name: String,
    params: AccountParams,
    identities: MasterIdentityTable,
    host_args: HostArgs<AccountDirective>,
}

impl AccountService {
    pub fn new(decl: &ServiceDecl, site: &SiteDefinition) -> Result<Self> {
        let params: AccountParams = decl.params()?;
        check_range("uid_range", &params.uid_range)?;
        check_range("gid_range", &params.gid_range)?;

        let group_source = read_source(site, params.groupfile.as_deref())?;
        let user_source = read_source(site, params.passwdfile.as_deref())?;
        let identities = MasterIdentityTable::build(&group_source, &user_source)?;

        Ok(Self {
            name: decl.name().to_string(),
            params,
            identities,
            host_args: site.host_args(decl.name())?,
        })
    }
}

fn check_range(param: &str, value: &str) -> Result<()> {
    if ID_RANGE.is_match(value) {
        Ok(())
    } else {
        Err(BuildError::InvalidRange {
            param: param.to_string(),
            value: value.to_string(),
        })
    }
}

/// Read an identity source. An unset source is empty.
fn read_source(site: &SiteDefinition, path: Option<&str>) -> Result<String> {
    let Some(path) = path.filter(|p| !p.is_empty()) else {
        return Ok(String::new());
    };
    let path = site.resolve_path(path);
    fs::read_to_string(&path)
        .map_err(|e| BuildError::io("failed to read identity source", &path, e))
}

impl Service for AccountService {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ServiceKind {
        ServiceKind::Account
    }

    fn assemble(&self, _resolver: &dyn Resolver) -> Result<Assembly> {
        let mut assembly = Assembly::new(&self.name);
        assembly.copy_tree(ServiceKind::Account.as_str());
        assembly.add_file("group", self.identities.group_source());
        assembly.add_file("passwd", self.identities.user_source());

        assembly.site_default("users", "");
        assembly.site_default("groups", "");
        assembly.site_default("uid_range", self.params.uid_range.as_str());
        assembly.site_default("gid_range", self.params.gid_range.as_str());
        assembly.site_default(
            "matching_groups",
            if self.params.matching_groups { "1" } else { "0" },
        );
        assembly.site_default(
            "make_homes_matching",
            self.params.make_homes_matching.as_str(),
        );
        assembly.site_default("make_homes_mode", self.params.make_homes_mode.as_str());

        for (host, directives) in &self.host_args {
            let mut users = TokenList::new();
            let mut groups = TokenList::new();

            for directive in directives {
                if let Some(user) = &directive.user {
                    match user.strip_prefix(GROUP_SELECTOR) {
                        Some(group) if !self.identities.has_group(group) => {
                            return Err(BuildError::dangling_on("group", group, host));
                        }
                        None if !self.identities.has_user(user) => {
                            return Err(BuildError::dangling_on("user", user, host));
                        }
                        _ => users.push(user.as_str()),
                    }
                }
                if let Some(group) = &directive.group {
                    if !self.identities.has_group(group) {
                        return Err(BuildError::dangling_on("group", group, host));
                    }
                    groups.push(group.as_str());
                }
            }

            let mut vars = HostVariableMap::new(host.as_str());
            vars.insert("users", users.join(":"))?;
            vars.insert("groups", groups.join(":"))?;
            assembly.push_host_vars(vars);
        }

        Ok(assembly)
    }

    fn identities(&self) -> Option<&MasterIdentityTable> {
        Some(&self.identities)
    }
}
