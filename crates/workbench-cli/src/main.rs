//! Workbench CLI
//!
//! Reads one JSON command per line on stdin and writes one JSON reply per
//! line on stdout. Logs go to stderr so they never mix with the protocol.
//!
//! Usage:
//!   workbench --project-dir ./repo
//!   PROJECT_DIR=./repo workbench --protect '.git/**' --disable python

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use workbench::{Workbench, WorkbenchConfig};

#[derive(Debug, Parser)]
#[command(name = "workbench", version, about = "Stateful environments over line-delimited JSON")]
struct Args {
    /// Project directory the environments work in
    #[arg(long, env = "PROJECT_DIR")]
    project_dir: Option<PathBuf>,

    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum number of live editor views
    #[arg(long)]
    max_views: Option<usize>,

    /// Glob (relative to the project) the editor may not write; repeatable
    #[arg(long = "protect", value_name = "GLOB")]
    protected: Vec<String>,

    /// Built-in environment to leave out; repeatable
    #[arg(long = "disable", value_name = "ENV")]
    disabled: Vec<String>,

    /// Do not load extension manifests from <project>/env
    #[arg(long)]
    no_extensions: bool,
}

impl Args {
    fn into_config(self) -> Result<WorkbenchConfig> {
        let mut config = match &self.config {
            Some(path) => WorkbenchConfig::from_file(path)?,
            None => WorkbenchConfig::default(),
        };

        if let Some(project_dir) = self.project_dir {
            config.project_dir = project_dir;
        }
        config.project_dir = config.project_dir.canonicalize().with_context(|| {
            format!(
                "project directory {} is not usable",
                config.project_dir.display()
            )
        })?;
        anyhow::ensure!(
            config.project_dir.is_dir(),
            "project directory {} is not a directory",
            config.project_dir.display()
        );

        if let Some(max_views) = self.max_views {
            config.editor.max_views = max_views;
        }
        config.protected.extend(self.protected);
        config.disabled.extend(self.disabled);
        if self.no_extensions {
            config.discover_extensions = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Args::parse().into_config()?;
    tracing::info!(project_dir = %config.project_dir.display(), "starting workbench");

    let (mut workbench, report) =
        Workbench::from_config(&config).context("failed to load environments")?;
    tracing::info!(
        loaded = report.loaded.len(),
        rejected = report.rejected.len(),
        "environments ready"
    );

    workbench
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;

    tracing::info!("workbench shutting down");
    Ok(())
}
