//! Master identity table builder.
//!
//! Parses the authoritative `group` and `passwd` sources into lookup tables
//! and validates them. The source text itself is kept untouched so that it
//! can be emitted byte-for-byte once validation passes.
//!
//! # Source format
//!
//! One colon-delimited record per line. Blank lines and lines starting with
//! `#` are skipped. Group lines have 4 fields (`name:x:gid:members`), user
//! lines have 7 (`name:x:uid:gid:gecos:home:shell`). A leading `-` on the
//! name marks the account for removal; such records are parsed and counted
//! but never take part in uniqueness or reference checks.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{BuildError, IdentityKind, Result};

const GROUP_FIELDS: usize = 4;
const USER_FIELDS: usize = 7;

/// Marker prefix for accounts that should be removed from every host.
pub const REMOVAL_MARKER: char = '-';

/// One user or group entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub name: String,
    pub id: String,
    /// Primary group (id or name). Only set for users.
    pub group_id: Option<String>,
    pub removed: bool,
}

impl IdentityRecord {
    fn parse(kind: IdentityKind, line: &str) -> Result<Self> {
        let cols: Vec<&str> = line.split(':').collect();
        let (name, removed) = strip_removal_marker(cols[0]);

        let expected = match kind {
            IdentityKind::Group => GROUP_FIELDS,
            IdentityKind::User => USER_FIELDS,
        };
        if cols.len() != expected {
            return Err(BuildError::SchemaViolation {
                kind,
                record: name.to_string(),
                found: cols.len(),
                expected,
            });
        }

        Ok(Self {
            name: name.to_string(),
            id: cols[2].to_string(),
            group_id: match kind {
                IdentityKind::User => Some(cols[3].to_string()),
                IdentityKind::Group => None,
            },
            removed,
        })
    }
}

/// Split a leading removal marker off a name.
pub fn strip_removal_marker(name: &str) -> (&str, bool) {
    match name.strip_prefix(REMOVAL_MARKER) {
        Some(rest) => (rest, true),
        None => (name, false),
    }
}

/// Lookup table for one record kind.
#[derive(Debug, Clone)]
pub struct IdentityTable {
    kind: IdentityKind,
    by_name: BTreeMap<String, IdentityRecord>,
    ids: BTreeSet<String>,
    removed: Vec<IdentityRecord>,
}

impl IdentityTable {
    fn new(kind: IdentityKind) -> Self {
        Self {
            kind,
            by_name: BTreeMap::new(),
            ids: BTreeSet::new(),
            removed: Vec::new(),
        }
    }

    fn insert(&mut self, record: IdentityRecord) -> Result<()> {
        if record.removed {
            self.removed.push(record);
            return Ok(());
        }
        if self.by_name.contains_key(&record.name) {
            return Err(BuildError::DuplicateIdentity {
                kind: self.kind,
                field: "name",
                value: record.name,
            });
        }
        if !self.ids.insert(record.id.clone()) {
            return Err(BuildError::DuplicateIdentity {
                kind: self.kind,
                field: "id",
                value: record.id,
            });
        }
        self.by_name.insert(record.name.clone(), record);
        Ok(())
    }

    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    /// Look up an active (non-removed) record by name.
    pub fn get(&self, name: &str) -> Option<&IdentityRecord> {
        self.by_name.get(name)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Number of active records.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Records carrying the removal marker, in source order.
    pub fn removed(&self) -> &[IdentityRecord] {
        &self.removed
    }
}

/// Validated group and user tables plus their untouched source text.
#[derive(Debug, Clone)]
pub struct MasterIdentityTable {
    groups: IdentityTable,
    users: IdentityTable,
    group_source: String,
    user_source: String,
}

impl MasterIdentityTable {
    /// Parse and validate both sources.
    ///
    /// The group source is processed first; every active user must name a
    /// known group by id or by name.
    pub fn build(group_source: &str, user_source: &str) -> Result<Self> {
        let mut groups = IdentityTable::new(IdentityKind::Group);
        for line in records(group_source) {
            groups.insert(IdentityRecord::parse(IdentityKind::Group, line)?)?;
        }

        let mut users = IdentityTable::new(IdentityKind::User);
        for line in records(user_source) {
            let record = IdentityRecord::parse(IdentityKind::User, line)?;
            if !record.removed {
                let gid = record.group_id.as_deref().unwrap_or_default();
                if !(groups.contains_id(gid) || groups.contains_name(gid)) {
                    return Err(BuildError::dangling(
                        format!("groupid for user {}", record.name),
                        gid,
                    ));
                }
            }
            users.insert(record)?;
        }

        debug!(
            "identity tables: {} groups ({} removed), {} users ({} removed)",
            groups.len(),
            groups.removed().len(),
            users.len(),
            users.removed().len()
        );

        Ok(Self {
            groups,
            users,
            group_source: group_source.to_string(),
            user_source: user_source.to_string(),
        })
    }

    pub fn groups(&self) -> &IdentityTable {
        &self.groups
    }

    pub fn users(&self) -> &IdentityTable {
        &self.users
    }

    pub fn has_user(&self, name: &str) -> bool {
        self.users.contains_name(name)
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.groups.contains_name(name)
    }

    /// Group source exactly as it was read.
    pub fn group_source(&self) -> &str {
        &self.group_source
    }

    /// User source exactly as it was read.
    pub fn user_source(&self) -> &str {
        &self.user_source
    }
}

/// Iterate the meaningful lines of a source, trailing whitespace removed.
fn records(source: &str) -> impl Iterator<Item = &str> {
    source
        .split('\n')
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}
