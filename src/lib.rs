//! Host fleet configuration compiler.
//!
//! Reads a site definition, runs one engine per declared service and emits
//! the artifacts hosts pull at configure time: master `group`/`passwd`
//! files, sysvinit control scripts, and per-host variable sets.
//!
//! ```no_run
//! use fleetcf::artifact::{persist, DirStore};
//! use fleetcf::service::build_site;
//! use fleetcf::site::SiteDefinition;
//! use std::path::Path;
//!
//! # fn main() -> fleetcf::error::Result<()> {
//! let site = SiteDefinition::load(Path::new("site.yaml"))?;
//! let assemblies = build_site(&site)?;
//! persist(&assemblies, &mut DirStore::new("out", None))?;
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod daemon;
pub mod error;
pub mod hostvars;
pub mod identity;
pub mod resolver;
pub mod service;
pub mod site;

pub use error::{BuildError, Result};
