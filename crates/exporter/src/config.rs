//! Exporter configuration

use anyhow::{Context, Result};
use clap::Parser;
use config::{
    builder::DefaultState, Config, ConfigBuilder, Environment, File, FileFormat, FileSourceFile,
    Source,
};
use exporter_lib::{LabelPolicy, TimeoutHeaderPolicy, DEFAULT_MAX_CONCURRENT_SCRAPES};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9779";

/// Command-line flags. Every flag that is set overrides the same key from
/// the config file and `EXPORTER_*` environment variables.
#[derive(Debug, Default, Parser)]
#[command(
    name = "kube-summary-exporter",
    version,
    about = "Exports kubelet /stats/summary filesystem usage as Prometheus metrics"
)]
pub struct Cli {
    /// Config file (TOML, YAML or JSON, by extension)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address to listen on for HTTP requests
    #[arg(long, value_name = "ADDR")]
    pub listen_address: Option<String>,

    /// Path to a single kubeconfig file. When unset the client is inferred
    /// from `KUBECONFIG` (which may list several files), `~/.kube/config`
    /// or the in-cluster service account.
    #[arg(long, value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Maximum node fetches in flight per /nodes request (0 = unbounded)
    #[arg(long, value_name = "N")]
    pub max_concurrent_scrapes: Option<u64>,

    /// Add the pod uid label to container and pod metrics
    #[arg(long)]
    pub include_pod_uid: bool,

    /// Fail requests whose scrape timeout header cannot be parsed
    #[arg(long)]
    pub strict_timeout_header: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExporterConfig {
    pub listen_address: SocketAddr,

    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    pub max_concurrent_scrapes: usize,

    pub include_pod_uid: bool,

    pub strict_timeout_header: bool,
}

impl ExporterConfig {
    /// Load configuration: defaults, then `--config`, then `EXPORTER_*`
    /// environment variables, then flags
    pub fn load(cli: &Cli) -> Result<Self> {
        let file: Option<File<FileSourceFile, FileFormat>> = cli.config.as_deref().map(File::from);
        Self::layered(cli, file)
    }

    fn layered<S>(cli: &Cli, file: Option<S>) -> Result<Self>
    where
        S: Source + Send + Sync + 'static,
    {
        let mut builder = defaults()?;

        if let Some(file) = file {
            builder = builder.add_source(file);
        }

        let config = builder
            .add_source(Environment::with_prefix("EXPORTER").try_parsing(true))
            .set_override_option("listen_address", cli.listen_address.clone())?
            .set_override_option(
                "kubeconfig",
                cli.kubeconfig.as_ref().map(|p| p.display().to_string()),
            )?
            .set_override_option("max_concurrent_scrapes", cli.max_concurrent_scrapes)?
            .set_override_option("include_pod_uid", cli.include_pod_uid.then_some(true))?
            .set_override_option(
                "strict_timeout_header",
                cli.strict_timeout_header.then_some(true),
            )?
            .build()
            .context("Failed to assemble configuration")?;

        config
            .try_deserialize()
            .context("Invalid exporter configuration")
    }

    pub fn label_policy(&self) -> LabelPolicy {
        LabelPolicy {
            include_pod_uid: self.include_pod_uid,
        }
    }

    pub fn timeout_policy(&self) -> TimeoutHeaderPolicy {
        if self.strict_timeout_header {
            TimeoutHeaderPolicy::Strict
        } else {
            TimeoutHeaderPolicy::Lenient
        }
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    Ok(Config::builder()
        .set_default("listen_address", DEFAULT_LISTEN_ADDRESS)?
        .set_default(
            "max_concurrent_scrapes",
            DEFAULT_MAX_CONCURRENT_SCRAPES as u64,
        )?
        .set_default("include_pod_uid", false)?
        .set_default("strict_timeout_header", false)?)
}
