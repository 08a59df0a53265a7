//! Artifact persistence.
//!
//! [`DirStore`] lays a build out on disk:
//!
//! ```text
//! <output>/<service>/files/...            generated files and template trees
//! <output>/<service>/site.vars            site-variable defaults
//! <output>/<service>/hosts/<host>.vars    one variable set per host
//! ```
//!
//! Variable files hold sorted `key=value` lines. Merging reads the existing
//! file first, so variables written by an earlier build and not touched by
//! this one survive.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{FileArtifact, TemplateTree};
use crate::error::{BuildError, Result};
use crate::hostvars::HostVariableMap;

/// Destination for assembled artifacts.
pub trait ArtifactStore {
    fn write_file(&mut self, service: &str, path: &str, content: &str, executable: bool)
        -> Result<()>;

    fn copy_template(&mut self, service: &str, tree: &TemplateTree) -> Result<()>;

    fn merge_site_vars(&mut self, service: &str, vars: &BTreeMap<String, String>) -> Result<()>;

    fn merge_host_vars(&mut self, service: &str, vars: &HostVariableMap) -> Result<()>;
}

/// Filesystem-backed store rooted at an output directory.
pub struct DirStore {
    output: PathBuf,
    templates: Option<PathBuf>,
}

impl DirStore {
    /// Create a store. `templates` is the root support trees are copied from.
    pub fn new(output: impl Into<PathBuf>, templates: Option<PathBuf>) -> Self {
        Self {
            output: output.into(),
            templates,
        }
    }

    fn files_dir(&self, service: &str) -> PathBuf {
        self.output.join(service).join("files")
    }

    pub fn host_vars_path(&self, service: &str, host: &str) -> PathBuf {
        self.output
            .join(service)
            .join("hosts")
            .join(format!("{}.vars", host))
    }

    pub fn site_vars_path(&self, service: &str) -> PathBuf {
        self.output.join(service).join("site.vars")
    }
}

impl ArtifactStore for DirStore {
    fn write_file(
        &mut self,
        service: &str,
        path: &str,
        content: &str,
        executable: bool,
    ) -> Result<()> {
        let full_path = self.files_dir(service).join(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BuildError::io("failed to create directory", parent, e))?;
        }
        fs::write(&full_path, content)
            .map_err(|e| BuildError::io("failed to write artifact", &full_path, e))?;
        if executable {
            fs::set_permissions(&full_path, fs::Permissions::from_mode(0o755))
                .map_err(|e| BuildError::io("failed to mark executable", &full_path, e))?;
        }
        Ok(())
    }

    fn copy_template(&mut self, service: &str, tree: &TemplateTree) -> Result<()> {
        let Some(root) = &self.templates else {
            debug!("{}: no template root, skipping {}", service, tree.source);
            return Ok(());
        };
        let src = root.join(&tree.source);
        if !src.exists() {
            // Support trees are optional per installation.
            warn!("{}: template tree not found: {}", service, src.display());
            return Ok(());
        }
        let dst = self.files_dir(service).join(&tree.dest);
        copy_tree(&src, &dst, tree.exclude)
            .map_err(|e| BuildError::io("failed to copy template tree", &src, e))
    }

    fn merge_site_vars(&mut self, service: &str, vars: &BTreeMap<String, String>) -> Result<()> {
        let path = self.site_vars_path(service);
        merge_vars_file(&path, vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    fn merge_host_vars(&mut self, service: &str, vars: &HostVariableMap) -> Result<()> {
        let path = self.host_vars_path(service, vars.host());
        merge_vars_file(&path, vars.iter())
    }
}

/// Parse a `key=value` file. Missing files read as empty.
pub fn read_vars_file(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = fs::read_to_string(path)
        .map_err(|e| BuildError::io("failed to read variables", path, e))?;
    Ok(content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
}

fn merge_vars_file<'a>(path: &Path, vars: impl Iterator<Item = (&'a str, &'a str)>) -> Result<()> {
    let mut merged = read_vars_file(path)?;
    for (key, value) in vars {
        merged.insert(key.to_string(), value.to_string());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BuildError::io("failed to create directory", parent, e))?;
    }
    let mut content = String::new();
    for (key, value) in &merged {
        content.push_str(key);
        content.push('=');
        content.push_str(value);
        content.push('\n');
    }
    fs::write(path, content).map_err(|e| BuildError::io("failed to write variables", path, e))
}

/// Copy a directory tree recursively, skipping excluded entry names.
fn copy_tree(src: &Path, dst: &Path, exclude: &[&str]) -> std::io::Result<()> {
    if src.is_file() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
        return Ok(());
    }

    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        if exclude.iter().any(|name| entry.file_name() == **name) {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_symlink() {
            let target = fs::read_link(&src_path)?;
            if dst_path.exists() || dst_path.is_symlink() {
                fs::remove_file(&dst_path)?;
            }
            std::os::unix::fs::symlink(&target, &dst_path)?;
        } else if src_path.is_dir() {
            copy_tree(&src_path, &dst_path, exclude)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}

/// In-memory store, used by `check` runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub files: Vec<(String, FileArtifact)>,
    pub templates: Vec<(String, TemplateTree)>,
    pub site_vars: BTreeMap<String, BTreeMap<String, String>>,
    pub host_vars: BTreeMap<(String, String), BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn file(&self, service: &str, path: &str) -> Option<&FileArtifact> {
        self.files
            .iter()
            .find(|(s, f)| s == service && f.path == path)
            .map(|(_, f)| f)
    }

    pub fn host_var(&self, service: &str, host: &str, key: &str) -> Option<&str> {
        self.host_vars
            .get(&(service.to_string(), host.to_string()))
            .and_then(|vars| vars.get(key))
            .map(String::as_str)
    }

    pub fn site_var(&self, service: &str, key: &str) -> Option<&str> {
        self.site_vars
            .get(service)
            .and_then(|vars| vars.get(key))
            .map(String::as_str)
    }
}

impl ArtifactStore for MemoryStore {
    fn write_file(
        &mut self,
        service: &str,
        path: &str,
        content: &str,
        executable: bool,
    ) -> Result<()> {
        self.files.push((
            service.to_string(),
            FileArtifact {
                path: path.to_string(),
                content: content.to_string(),
                executable,
            },
        ));
        Ok(())
    }

    fn copy_template(&mut self, service: &str, tree: &TemplateTree) -> Result<()> {
        self.templates.push((service.to_string(), tree.clone()));
        Ok(())
    }

    fn merge_site_vars(&mut self, service: &str, vars: &BTreeMap<String, String>) -> Result<()> {
        self.site_vars
            .entry(service.to_string())
            .or_default()
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn merge_host_vars(&mut self, service: &str, vars: &HostVariableMap) -> Result<()> {
        self.host_vars
            .entry((service.to_string(), vars.host().to_string()))
            .or_default()
            .extend(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        Ok(())
    }
}
