//! Build errors.
//!
//! Every failure is fatal to the build of the service that raised it. There
//! is no recovery path and no aggregation: the first error wins.

use std::path::PathBuf;
use thiserror::Error;

/// Which identity table a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    User,
    Group,
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityKind::User => write!(f, "user"),
            IdentityKind::Group => write!(f, "group"),
        }
    }
}

fn on_host(host: &Option<String>) -> String {
    match host {
        Some(h) => format!(" (host {})", h),
        None => String::new(),
    }
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("{kind} {record} has {found} fields, should be {expected}")]
    SchemaViolation {
        kind: IdentityKind,
        record: String,
        found: usize,
        expected: usize,
    },

    #[error("duplicate {kind}{field}: {value}")]
    DuplicateIdentity {
        kind: IdentityKind,
        /// `"name"` or `"id"`.
        field: &'static str,
        value: String,
    },

    #[error("unknown {what}: {reference}{}", on_host(.host))]
    DanglingReference {
        what: String,
        reference: String,
        host: Option<String>,
    },

    #[error("attempt to reset {key} for host {host}")]
    WriteConflict { key: String, host: String },

    #[error("bad {param}: {value}")]
    InvalidRange { param: String, value: String },

    #[error("service {requester} requires service {name}, which is not declared")]
    UnresolvedDependency { requester: String, name: String },

    #[error("service {service} does not publish {what}")]
    NotPublished { service: String, what: &'static str },

    #[error("service {service}: {message}")]
    InvalidParameter { service: String, message: String },

    #[error("service {0} is declared more than once")]
    DuplicateService(String),

    #[error("invalid host name: '{0}'")]
    InvalidHostName(String),

    #[error("host {host} has directives for undeclared service {service}")]
    UndeclaredService { host: String, service: String },

    #[error("service {service}: invalid directive for host {host}: {message}")]
    InvalidDirective {
        service: String,
        host: String,
        message: String,
    },

    #[error("failed to parse site definition '{}': {source}", .path.display())]
    SiteParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("service {service}: invalid parameters: {source}")]
    ServiceParams {
        service: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{context} '{}': {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Build a dangling reference error not tied to a particular host.
    pub fn dangling(what: impl Into<String>, reference: impl Into<String>) -> Self {
        BuildError::DanglingReference {
            what: what.into(),
            reference: reference.into(),
            host: None,
        }
    }

    /// Build a dangling reference error raised while processing `host`.
    pub fn dangling_on(
        what: impl Into<String>,
        reference: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        BuildError::DanglingReference {
            what: what.into(),
            reference: reference.into(),
            host: Some(host.into()),
        }
    }

    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_record() {
        let err = BuildError::SchemaViolation {
            kind: IdentityKind::Group,
            record: "staff".into(),
            found: 3,
            expected: 4,
        };
        assert_eq!(err.to_string(), "group staff has 3 fields, should be 4");

        let err = BuildError::DuplicateIdentity {
            kind: IdentityKind::User,
            field: "id",
            value: "3000".into(),
        };
        assert_eq!(err.to_string(), "duplicate userid: 3000");

        let err = BuildError::dangling_on("user", "bob", "web1");
        assert_eq!(err.to_string(), "unknown user: bob (host web1)");

        let err = BuildError::WriteConflict {
            key: "reltag".into(),
            host: "web1".into(),
        };
        assert_eq!(err.to_string(), "attempt to reset reltag for host web1");
    }
}
