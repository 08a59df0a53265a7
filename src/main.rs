//! fleetcf CLI
//!
//! Compiles a site definition into per-service artifacts.
//!
//! # Usage
//!
//! ```bash
//! # Assemble every service and write the results
//! fleetcf build site.yaml --output out --templates templates
//!
//! # Validate a site without writing anything
//! fleetcf check site.yaml
//!
//! # Print the control script of one daemon
//! fleetcf script site.yaml httpd
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use fleetcf::artifact::{persist, DirStore, MemoryStore};
use fleetcf::daemon;
use fleetcf::service::{build_site, SysvinitService};
use fleetcf::site::{ServiceKind, SiteDefinition};

#[derive(Parser)]
#[command(name = "fleetcf")]
#[command(author, version, about = "Host fleet configuration compiler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble every declared service and persist the artifacts
    Build {
        /// Site definition (YAML)
        site: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Root of the support template trees
        #[arg(short, long)]
        templates: Option<PathBuf>,
    },

    /// Assemble everything but write nothing
    Check {
        /// Site definition (YAML)
        site: PathBuf,
    },

    /// Print the control script for one daemon
    Script {
        /// Site definition (YAML)
        site: PathBuf,

        /// Daemon name
        daemon: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Build {
            site,
            output,
            templates,
        } => cmd_build(site, output, templates),
        Commands::Check { site } => cmd_check(site),
        Commands::Script { site, daemon } => cmd_script(site, &daemon),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_site(path: &Path) -> Result<SiteDefinition> {
    SiteDefinition::load(path)
        .with_context(|| format!("Failed to load site definition {}", path.display()))
}

fn cmd_build(site_path: PathBuf, output: PathBuf, templates: Option<PathBuf>) -> Result<()> {
    let start = Instant::now();
    let site = load_site(&site_path)?;

    println!("=== Building {} ===\n", site_path.display());
    let assemblies = build_site(&site).context("Build failed, nothing written")?;

    let mut store = DirStore::new(&output, templates);
    persist(&assemblies, &mut store)
        .with_context(|| format!("Failed to write artifacts to {}", output.display()))?;

    println!(
        "\n=== Build Complete ({:.1}s) ===",
        start.elapsed().as_secs_f64()
    );
    for assembly in &assemblies {
        println!(
            "  {:<12} {} files, {} hosts",
            assembly.service,
            assembly.files.len(),
            assembly.host_vars.len()
        );
    }
    println!("  Output: {}", output.display());
    Ok(())
}

fn cmd_check(site_path: PathBuf) -> Result<()> {
    let site = load_site(&site_path)?;
    let assemblies = build_site(&site).context("Check failed")?;

    let mut store = MemoryStore::default();
    persist(&assemblies, &mut store)?;

    println!("Site:      {}", site_path.display());
    println!("Services:  {}", assemblies.len());
    println!("Hosts:     {}", site.hosts.len());
    println!("Files:     {}", store.files.len());
    println!("Host vars: {}", store.host_vars.len());
    println!("\nOK");
    Ok(())
}

fn cmd_script(site_path: PathBuf, name: &str) -> Result<()> {
    let site = load_site(&site_path)?;

    for decl in site.services.iter().filter(|d| d.kind == ServiceKind::Sysvinit) {
        let service = SysvinitService::new(decl, &site)?;
        if let Some(spec) = service.daemon(name) {
            print!("{}", daemon::render(spec));
            return Ok(());
        }
    }

    bail!(
        "Daemon '{}' is not declared by any sysvinit service in {}",
        name,
        site_path.display()
    )
}
