//! Artifact emitter.
//!
//! A service's assembly produces an [`Assembly`]: the files it wants written,
//! the support template trees it wants copied, its site-variable defaults and
//! exactly one variable map per host. Nothing touches the disk until every
//! service of the build has assembled successfully; [`persist`] then hands
//! the lot to an [`ArtifactStore`].

mod store;

pub use store::{ArtifactStore, DirStore, MemoryStore};

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::Result;
use crate::hostvars::HostVariableMap;

/// Directory names never copied out of template trees.
pub const TEMPLATE_EXCLUDES: &[&str] = &["CVS", ".svn"];

/// A generated or passed-through file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArtifact {
    /// Path relative to the service's file area.
    pub path: String,
    pub content: String,
    pub executable: bool,
}

/// A static support tree to copy from the template root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateTree {
    /// Directory under the template root.
    pub source: String,
    /// Destination under the service's file area.
    pub dest: String,
    pub exclude: &'static [&'static str],
}

/// Everything one service produced for one build.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub service: String,
    pub files: Vec<FileArtifact>,
    pub templates: Vec<TemplateTree>,
    pub site_vars: BTreeMap<String, String>,
    pub host_vars: Vec<HostVariableMap>,
}

impl Assembly {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            files: Vec::new(),
            templates: Vec::new(),
            site_vars: BTreeMap::new(),
            host_vars: Vec::new(),
        }
    }

    /// Add a regular file.
    pub fn add_file(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.push(FileArtifact {
            path: path.into(),
            content: content.into(),
            executable: false,
        });
    }

    /// Add a file that must be marked executable.
    pub fn add_executable(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.push(FileArtifact {
            path: path.into(),
            content: content.into(),
            executable: true,
        });
    }

    /// Copy a template tree of the same name, skipping VCS metadata.
    pub fn copy_tree(&mut self, name: &str) {
        self.templates.push(TemplateTree {
            source: name.to_string(),
            dest: name.to_string(),
            exclude: TEMPLATE_EXCLUDES,
        });
    }

    /// Declare a site-wide default for a variable.
    pub fn site_default(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.site_vars.insert(key.into(), value.into());
    }

    pub fn push_host_vars(&mut self, vars: HostVariableMap) {
        self.host_vars.push(vars);
    }

    pub fn file(&self, path: &str) -> Option<&FileArtifact> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn host(&self, host: &str) -> Option<&HostVariableMap> {
        self.host_vars.iter().find(|vars| vars.host() == host)
    }
}

/// Write every assembly through the store.
pub fn persist(assemblies: &[Assembly], store: &mut dyn ArtifactStore) -> Result<()> {
    for assembly in assemblies {
        let service = assembly.service.as_str();

        for file in &assembly.files {
            debug!("{}: writing {}", service, file.path);
            store.write_file(service, &file.path, &file.content, file.executable)?;
        }
        for tree in &assembly.templates {
            store.copy_template(service, tree)?;
        }
        store.merge_site_vars(service, &assembly.site_vars)?;
        for vars in &assembly.host_vars {
            store.merge_host_vars(service, vars)?;
        }
    }
    Ok(())
}
