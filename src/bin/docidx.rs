use anyhow::Context;
use clap::{Parser, Subcommand};
use doc_variant_resolver::{Config, DocumentService, PresentOptions};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "docidx")]
#[command(about = "Browse parsed tender documents on a WebDAV store", long_about = None)]
struct Cli {
    /// TOML configuration file; DOCIDX_WEBDAV_* variables override it
    #[arg(long, global = true, env = "DOCIDX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory with parser status
    Ls {
        #[arg(default_value = "/")]
        path: String,
        /// Include hidden entries
        #[arg(long)]
        all: bool,
    },
    /// Print the rendered markdown of a document
    Resolve {
        path: String,
        /// Previously selected variant label
        #[arg(long)]
        label: Option<String>,
        /// Print candidates and attempts instead of content
        #[arg(long)]
        explain: bool,
    },
    /// Make the parser behind a variant label the document's default
    SetDefault { path: String, label: String },
    /// Show the metadata sidecar of a path
    Meta { path: String },
    /// Replace the metadata sidecar of a path with a JSON object
    MetaSet { path: String, json: String },
    /// Create a collection
    Mkdir { path: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doc_variant_resolver=info,docidx=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => Config::default(),
    }
    .apply_env();

    let service = DocumentService::connect(&config)?;

    match cli.command {
        Commands::Ls { path, all } => {
            let options = PresentOptions::from_config(&config.index, all);
            for item in service.list_directory_with(&path, &options).await? {
                let marker = if item.entry.is_dir() { "d" } else { "-" };
                let parsers = item.parsers().join(",");
                println!(
                    "{} {:>10} {:<40} {:<20} {}",
                    marker,
                    item.entry.size.map(|s| s.to_string()).unwrap_or_default(),
                    item.entry.name,
                    parsers,
                    item.default_parser().unwrap_or("")
                );
            }
        }
        Commands::Resolve {
            path,
            label,
            explain,
        } => {
            let resolved = service.resolve_document(&path, label.as_deref()).await?;
            if explain {
                for candidate in &resolved.candidates {
                    let active = if candidate.label == resolved.active_label { "*" } else { " " };
                    println!("{} {:<28} {}", active, candidate.label, candidate.path);
                }
                println!("tried: {}", resolved.attempted.join(" -> "));
            } else {
                print!("{}", resolved.content);
            }
        }
        Commands::SetDefault { path, label } => {
            service.set_default_variant(&path, &label).await?;
            println!("default for {} set to {}", path, label);
        }
        Commands::Meta { path } => match service.load_metadata(&path).await? {
            Some(meta) => println!("{}", serde_json::to_string_pretty(&meta)?),
            None => println!("no metadata for {}", path),
        },
        Commands::MetaSet { path, json } => {
            let meta: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(&json).context("metadata must be a JSON object")?;
            let saved = service.save_metadata(&path, meta).await?;
            println!("{}", serde_json::to_string_pretty(&saved)?);
        }
        Commands::Mkdir { path } => {
            service.create_directory(&path).await?;
        }
    }

    Ok(())
}
