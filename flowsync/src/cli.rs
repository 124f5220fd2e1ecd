///
/// This module implements the flowsync CLI: argument parsing, wiring the
/// concrete collaborators (HTTP client, YAML loader, credential file) into a
/// [`ReconcileSession`], and printing results.
///
/// All reconciliation logic lives in the [`flowsync-core`] crate; this module
/// is strictly CLI glue.
///
/// ## How To Use
/// - For command-line users: use the installed `flowsync` binary with `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`],
///   or [`execute`] with your own [`SessionClient`] and output sink.
///
/// [`flowsync-core`]: ../../flowsync-core/
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use flowsync_core::contract::{RenderConfig, SessionClient};
use flowsync_core::{Address, ApplyOptions, ApplyReport, DeleteOptions, ReconcileSession};

use crate::client::HttpSessionClient;
use crate::credentials::FileCredentialProvider;
use crate::export::write_tree;
use crate::load_config::{client_config, load_config};
use crate::loader::YamlTreeLoader;

/// CLI for flowsync: keep remote pipelines in sync with YAML definitions.
#[derive(Parser, Debug)]
#[clap(
    name = "flowsync",
    version,
    about = "Apply, delete, list and export remote pipeline resources from YAML definitions"
)]
pub struct Cli {
    /// API host (or base URL)
    #[clap(short = 'H', long, env = "FLOWSYNC_HOST", global = true)]
    pub host: Option<String>,

    /// YAML file with template values available as `config.*`
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Credentials file (default ~/.flowsync/component-credentials.yaml)
    #[clap(long, global = true)]
    pub credentials: Option<PathBuf>,

    /// Verbose logging
    #[clap(long, global = true)]
    pub debug: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export a resource as a YAML definition
    Get {
        resource: String,
        /// Include nested resources
        #[clap(short, long)]
        recursive: bool,
        /// Write a directory tree instead of one document
        #[clap(short, long, requires = "output")]
        directory: bool,
        /// Output file, or directory with --directory
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Create or update resources from YAML definitions
    Apply {
        resource: String,
        #[clap(short, long)]
        recursive: bool,
        /// Definition file or directory
        #[clap(short, long)]
        input: PathBuf,
        /// Delete remote resources under RESOURCE that are not defined (needs --recursive)
        #[clap(long)]
        delete: bool,
        #[clap(long)]
        dry_run: bool,
    },
    /// Delete a resource
    Delete {
        resource: String,
        #[clap(short, long)]
        recursive: bool,
        #[clap(long)]
        dry_run: bool,
    },
    /// List resources below an address
    List {
        #[clap(default_value = ".")]
        resource: String,
        #[clap(short, long)]
        recursive: bool,
    },
    /// Print records of a readable component as JSON lines
    Records {
        resource: String,
        #[clap(long, default_value_t = 0)]
        offset: u64,
        /// 0 means no limit
        #[clap(long, default_value_t = 0)]
        limit: u64,
    },
}

fn print_apply_report(out: &mut dyn Write, report: &ApplyReport) -> Result<()> {
    let sections = [
        ("created", &report.created),
        ("updated", &report.updated),
        ("would apply", &report.skipped),
        ("subscribed", &report.subscriptions),
        ("group", &report.groups),
        ("deleted", &report.deleted),
    ];
    for (label, addresses) in sections {
        for address in addresses {
            writeln!(out, "{label} {address}")?;
        }
    }
    Ok(())
}

fn render_values(cli: &Cli) -> Result<Value> {
    match &cli.config {
        Some(path) => load_config(path),
        None => Ok(Value::Object(Default::default())),
    }
}

/// Runs one command against `client`, writing user-facing output to `out`.
pub async fn execute<C>(cli: Cli, client: &C, out: &mut dyn Write) -> Result<()>
where
    C: SessionClient + ?Sized,
{
    let mut session = ReconcileSession::new(client);
    match &cli.command {
        Commands::Get {
            resource,
            recursive,
            directory,
            output,
        } => {
            tracing::info!(command = "get", resource = %resource, "Exporting");
            let address = Address::parse(resource)?;
            let document = session
                .get(&address, *recursive)
                .await
                .with_context(|| format!("get {resource}"))?;
            match (output, directory) {
                (Some(dir), true) => {
                    for path in write_tree(dir, &document)? {
                        writeln!(out, "wrote {}", path.display())?;
                    }
                }
                (Some(file), false) => {
                    let yaml = serde_yaml::to_string(&document)?;
                    std::fs::write(file, yaml)
                        .with_context(|| format!("Failed to write {file:?}"))?;
                }
                (None, _) => write!(out, "{}", serde_yaml::to_string(&document)?)?,
            }
        }
        Commands::Apply {
            resource,
            recursive,
            input,
            delete,
            dry_run,
        } => {
            tracing::info!(command = "apply", resource = %resource, dry_run, "Applying");
            let address = Address::parse(resource)?;
            let loader = YamlTreeLoader::new()?;
            let credentials = FileCredentialProvider::load(cli.credentials.as_deref())?;
            let options = ApplyOptions {
                recursive: *recursive,
                delete: *delete,
                dry_run: *dry_run,
                render: RenderConfig {
                    input: input.clone(),
                    recursive: *recursive,
                    values: render_values(&cli)?,
                },
            };
            let mut session = session.with_loader(&loader).with_credentials(&credentials);
            let report = session
                .apply(&address, &options)
                .await
                .with_context(|| format!("apply {resource}"))?;
            tracing::info!(command = "apply", ?report, "Apply complete");
            print_apply_report(out, &report)?;
        }
        Commands::Delete {
            resource,
            recursive,
            dry_run,
        } => {
            tracing::info!(command = "delete", resource = %resource, dry_run, "Deleting");
            let address = Address::parse(resource)?;
            let options = DeleteOptions {
                recursive: *recursive,
                dry_run: *dry_run,
            };
            let report = session
                .delete(&address, &options)
                .await
                .with_context(|| format!("delete {resource}"))?;
            let label = if report.dry_run { "would delete" } else { "deleted" };
            for address in &report.deleted {
                writeln!(out, "{label} {address}")?;
            }
        }
        Commands::List {
            resource,
            recursive,
        } => {
            let address = Address::parse(resource)?;
            let entries = session
                .list(&address, *recursive)
                .await
                .with_context(|| format!("list {resource}"))?;
            for entry in entries {
                writeln!(out, "{entry}")?;
            }
        }
        Commands::Records {
            resource,
            offset,
            limit,
        } => {
            let address = Address::parse(resource)?;
            let rows = session
                .records(&address, *offset, *limit)
                .await
                .with_context(|| format!("records {resource}"))?;
            for row in rows {
                writeln!(out, "{}", serde_json::to_string(&row)?)?;
            }
        }
    }
    Ok(())
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    let config = client_config(cli.host.clone())?;
    let client = HttpSessionClient::new(&config)?;
    let mut out = std::io::stdout();
    let result = execute(cli, &client, &mut out).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Command failed");
    }
    result
}
