//! Deploy Client - Main entry point
//!
//! Uploads web application archives, sending only what the hosting service
//! does not already have.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deploy_client::{
    api::ApiClient,
    archive::ArchiveKind,
    catalog::StaticCatalogSource,
    config::Config,
    delta::{DeltaOrchestrator, DeltaSettings},
    deploy::{deploy_archive, DeployRequest},
    transfer::format_bytes,
    utils,
};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy an archive to an application
    Deploy {
        #[arg(short, long)]
        app_id: String,

        #[arg(short = 'f', long, value_name = "FILE")]
        archive: PathBuf,

        /// Archive kind (default: from the file extension)
        #[arg(short, long)]
        kind: Option<ArchiveKind>,

        #[arg(short, long)]
        environment: Option<String>,

        /// Deployment description
        #[arg(short, long)]
        message: Option<String>,

        /// Source archive to upload alongside
        #[arg(long, value_name = "FILE")]
        src: Option<PathBuf>,

        /// Always upload the full archive
        #[arg(long)]
        no_delta: bool,

        /// Create the application if it does not exist
        #[arg(long)]
        create: bool,

        /// Application parameter (key=value)
        #[arg(short = 'P', value_parser = parse_key_value)]
        parameter: Vec<(String, String)>,

        /// Runtime variable (key=value)
        #[arg(short = 'V', value_parser = parse_key_value)]
        variable: Vec<(String, String)>,
    },

    /// Print the checksums the server holds for an application
    Checksums {
        #[arg(short, long)]
        app_id: String,
    },

    /// Build a delta archive offline against catalog files
    Diff {
        #[arg(short = 'f', long, value_name = "FILE")]
        archive: PathBuf,

        /// JSON object of entry path to CRC-32
        #[arg(long, value_name = "FILE")]
        checksums: PathBuf,

        /// JSON object of "jar/entry" to SHA-256
        #[arg(long, value_name = "FILE")]
        jar_hashes: Option<PathBuf>,

        /// Output directory (default: next to the archive)
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!("deploy-client v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Deploy {
            app_id,
            archive,
            kind,
            environment,
            message,
            src,
            no_delta,
            create,
            parameter,
            variable,
        } => {
            let mut request = DeployRequest::new(app_id, archive);
            if let Some(kind) = kind {
                request.kind = kind;
            }
            request.environment = environment;
            request.description = message;
            request.src_archive = src;
            request.delta = config.deploy.delta && !no_delta;
            request.create = config.deploy.create || create;
            request.parameters = parameter.into_iter().collect::<BTreeMap<_, _>>();
            request.variables = variable.into_iter().collect::<BTreeMap<_, _>>();

            let client = ApiClient::new(config.server.clone())?;
            let report = deploy_archive(&client, &request, &config.deploy.delta_settings()).await?;

            println!("application - {}", report.response.id);
            println!("url - {}", report.response.url);
            println!(
                "uploaded {} of {}{}",
                format_bytes(report.uploaded_bytes),
                format_bytes(report.archive_bytes),
                if report.delta { " (delta)" } else { "" }
            );
        }

        Command::Checksums { app_id } => {
            let client = ApiClient::new(config.server.clone())?;
            let catalog = client.application_check_sums(&app_id).await?;
            println!("{}", serde_json::to_string_pretty(&catalog)?);
        }

        Command::Diff {
            archive,
            checksums,
            jar_hashes,
            out,
        } => {
            let source = StaticCatalogSource::from_files(&checksums, jar_hashes.as_deref())?;
            let settings = DeltaSettings {
                delta_kinds: vec![ArchiveKind::War, ArchiveKind::Ear],
                work_dir: out.or_else(|| config.deploy.work_dir.clone()),
            };

            let prepared = DeltaOrchestrator::new(&source, &settings)
                .prepare_payload(&archive, "offline", true, ArchiveKind::from_path(&archive))
                .await?;

            if prepared.payload.is_delta() {
                println!("{}", prepared.payload.path().display());
                prepared.cleanup.keep();
            } else {
                println!("no delta: upload {} as is", archive.display());
            }
        }
    }

    Ok(())
}
