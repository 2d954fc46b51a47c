//! Depot CLI - Admin Command Line Interface
//!
//! This binary provides administrative commands for a Depot registry:
//! registering artifacts, querying closures, garbage collection,
//! verification and key management.

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use clap::{Parser, Subcommand};
use depot_common::{ArtifactId, RegistryConfig, Signature};
use depot_registry::{Manifest, Registry};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "depot")]
#[command(about = "Depot Registry Admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/depot/registry.toml")]
    config: String,

    /// Registry database path (overrides the configuration file)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register one artifact from a manifest and its content
    Register {
        /// Manifest file describing the artifact
        manifest: PathBuf,
        /// Canonical serialized content (checked against NarHash)
        nar: PathBuf,
        /// Compressed transport representation (checked against FileHash)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Show the stored record for an artifact
    Info {
        /// Artifact id
        id: String,
    },
    /// List all registered artifacts
    List,
    /// Compute the closure of one or more artifacts
    Closure {
        /// Artifact ids forming the query set
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Export the closure of one or more artifacts as manifests
    Export {
        /// Artifact ids forming the query set
        #[arg(required = true)]
        ids: Vec<String>,
        /// Write one `<id>.manifest` per member into this directory
        /// instead of printing to stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Delete every artifact unreachable from the given roots
    Collect {
        /// Root artifact ids to keep
        roots: Vec<String>,
    },
    /// Re-check integrity and provenance of a stored record
    Verify {
        /// Artifact id
        id: String,
    },
    /// Attach a signature to a stored record
    Sign {
        /// Artifact id
        id: String,
        /// Signature in `<key-name>:<base64>` form
        signature: String,
    },
    /// Generate a new ed25519 signing key pair
    Keygen {
        /// Key name embedded in signatures and the public key
        name: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Keygen needs no registry
    if let Commands::Keygen { name } = &args.command {
        return keygen(name);
    }

    let config = load_config(&args)?;
    let registry = Registry::open(&config)
        .with_context(|| format!("opening registry at {}", config.database_path.display()))?;

    match args.command {
        Commands::Register { manifest, nar, file } => register(&registry, &manifest, &nar, file.as_deref()),
        Commands::Info { id } => info(&registry, &id),
        Commands::List => list(&registry),
        Commands::Closure { ids } => closure(&registry, &ids),
        Commands::Export { ids, out } => export(&registry, &ids, out.as_deref()),
        Commands::Collect { roots } => collect(&registry, &roots),
        Commands::Verify { id } => verify(&registry, &id),
        Commands::Sign { id, signature } => sign(&registry, &id, &signature),
        Commands::Keygen { .. } => unreachable!("handled above"),
    }
}

fn load_config(args: &Args) -> Result<RegistryConfig> {
    let defaults = RegistryConfig::default();
    let mut config: RegistryConfig = config::Config::builder()
        .add_source(config::Config::try_from(&defaults)?)
        .add_source(config::File::with_name(&args.config).required(false))
        .build()
        .with_context(|| format!("loading configuration from {}", args.config))?
        .try_deserialize()?;

    if let Some(database) = &args.database {
        config.database_path.clone_from(database);
    }
    Ok(config)
}

fn parse_ids(ids: &[String]) -> Result<BTreeSet<ArtifactId>> {
    ids.iter()
        .map(|id| ArtifactId::new(id).map_err(Into::into))
        .collect()
}

fn register(registry: &Registry, manifest: &Path, nar: &Path, file: Option<&Path>) -> Result<()> {
    let text = std::fs::read_to_string(manifest)
        .with_context(|| format!("reading manifest {}", manifest.display()))?;
    let manifest: Manifest = text.parse()?;
    let nar_bytes =
        std::fs::read(nar).with_context(|| format!("reading content {}", nar.display()))?;
    let file_bytes = file
        .map(|p| std::fs::read(p).with_context(|| format!("reading file {}", p.display())))
        .transpose()?;

    let id = manifest.id.clone();
    let outcome = registry.register(manifest.into_candidate(nar_bytes, file_bytes))?;
    println!("{id}: {outcome:?}");
    Ok(())
}

fn info(registry: &Registry, id: &str) -> Result<()> {
    let record = registry.info(&ArtifactId::new(id)?)?;
    print!("{}", Manifest::from(record));
    Ok(())
}

fn list(registry: &Registry) -> Result<()> {
    let mut records = registry.list()?;
    records.sort_by(|a, b| a.id.cmp(&b.id));
    for record in records {
        println!("{}\t{}\t{}", record.id, record.nar_size, record.path);
    }
    Ok(())
}

fn closure(registry: &Registry, ids: &[String]) -> Result<()> {
    for id in registry.query_closure(&parse_ids(ids)?)? {
        println!("{id}");
    }
    Ok(())
}

fn export(registry: &Registry, ids: &[String], out: Option<&Path>) -> Result<()> {
    let manifests = registry.export_closure(&parse_ids(ids)?)?;
    match out {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
            for manifest in &manifests {
                let path = dir.join(format!("{}.manifest", manifest.id));
                std::fs::write(&path, manifest.to_string())
                    .with_context(|| format!("writing {}", path.display()))?;
            }
            println!("exported {} manifest(s) to {}", manifests.len(), dir.display());
        }
        None => {
            for manifest in &manifests {
                println!("{manifest}");
            }
        }
    }
    Ok(())
}

fn collect(registry: &Registry, roots: &[String]) -> Result<()> {
    let report = registry.collect(&parse_ids(roots)?)?;
    for id in &report.deleted {
        println!("deleted {id}");
    }
    println!(
        "{} deleted, {} failed, {} skipped, {} bytes reclaimed",
        report.deleted.len(),
        report.failed.len(),
        report.skipped.len(),
        report.reclaimed_bytes
    );
    if !report.failed.is_empty() {
        bail!("{} record(s) could not be deleted", report.failed.len());
    }
    Ok(())
}

fn verify(registry: &Registry, id: &str) -> Result<()> {
    registry.verify(&ArtifactId::new(id)?)?;
    println!("{id}: ok");
    Ok(())
}

fn sign(registry: &Registry, id: &str, signature: &str) -> Result<()> {
    let signature: Signature = signature.parse()?;
    let appended = registry.add_signature(&ArtifactId::new(id)?, signature)?;
    if appended {
        println!("{id}: signature added");
    } else {
        println!("{id}: signature already present");
    }
    Ok(())
}

fn keygen(name: &str) -> Result<()> {
    let signing = SigningKey::generate(&mut OsRng);
    println!("secret: {name}:{}", BASE64.encode(signing.to_bytes()));
    println!("public: {name}:{}", BASE64.encode(signing.verifying_key().as_bytes()));
    Ok(())
}
