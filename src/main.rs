// src/main.rs

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use debasm::assembler::installed_size;
use debasm::filesystem::VfsTree;
use debasm::process::{SystemRunner, require_tools};
use debasm::{
    ArchTable, AssemblyConfig, AssemblyPlan, BuildContext, PackageAssembler, PackageInput,
};
use tracing::info;

/// Tools every assembly needs
const BASE_TOOLS: [&str; 2] = ["dpkg-gencontrol", "perl"];

/// Tools needed for debug extraction
const STRIP_TOOLS: [&str; 4] = ["file", "dwz", "objcopy", "strip"];

#[derive(Parser)]
#[command(name = "debasm")]
#[command(author, version, about = "Assemble staged Debian binary packages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble the packages of a plan into package roots
    Assemble {
        /// Assembly plan (TOML)
        #[arg(short, long)]
        plan: PathBuf,
        /// Assembly configuration (TOML); defaults match the debian/ layout
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the Installed-Size (KiB) of directory trees
    InstalledSize {
        /// Directories counted together
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Assemble { plan, config } => cmd_assemble(&plan, config.as_deref()),
        Commands::InstalledSize { dirs } => cmd_installed_size(&dirs),
    }
}

fn cmd_assemble(plan_path: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = match config_path {
        Some(path) => AssemblyConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AssemblyConfig::new(),
    }
    .with_env_build_options();
    let plan = AssemblyPlan::load(plan_path)
        .with_context(|| format!("loading plan {}", plan_path.display()))?;

    require_tools(&BASE_TOOLS)?;
    if !config.build_options.nostrip {
        require_tools(&STRIP_TOOLS)?;
    }

    let runner = SystemRunner::new();
    let arch_table = if std::env::var_os("DEB_HOST_ARCH").is_some() {
        ArchTable::from_env()
    } else {
        ArchTable::load(&runner).context("querying dpkg-architecture")?
    };

    let ctx = BuildContext::load(&runner, config).context("reading debian/ metadata")?;
    let inputs = plan
        .packages
        .iter()
        .map(|package| {
            PackageInput::from_plan(package, ctx.control(), &arch_table)
                .with_context(|| format!("preparing {}", package.name))
        })
        .collect::<Result<Vec<_>>>()?;

    info!("Assembling {} package(s)", inputs.len());
    let assembled = PackageAssembler::new(ctx).assemble(inputs)?;
    for package in &assembled {
        println!("{}\t{}", package.name, package.root.display());
        if let Some(dbgsym_root) = &package.dbgsym_root {
            println!("{}-dbgsym\t{}", package.name, dbgsym_root.display());
        }
    }
    Ok(())
}

fn cmd_installed_size(dirs: &[PathBuf]) -> Result<()> {
    let trees = dirs
        .iter()
        .map(|dir| VfsTree::from_dir(dir).with_context(|| format!("reading {}", dir.display())))
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&VfsTree> = trees.iter().collect();
    println!("{}", installed_size(&refs)?);
    Ok(())
}
