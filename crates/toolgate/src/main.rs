//! # Toolgate CLI (`toolgate`)
//!
//! ## Usage
//!
//! ```bash
//! toolgate --config ./config/toolgate.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `toolgate init` | Create the SQLite database and run schema migrations |
//! | `toolgate access load <file>` | Register backends and grants from a TOML manifest |
//! | `toolgate access show --user u1 --role Admin` | Print the resolved access of an identity |
//! | `toolgate ingest --corpus demo --model stub-256 --user u1 <file>` | Chunk, embed, and store a document |
//! | `toolgate query --user u1 --corpus demo "<text>"` | Multi-corpus retrieval |
//! | `toolgate tools --user u1` | List the aggregated tool catalogue |
//! | `toolgate call --user u1 hr.get_policy --args '{"country":"DE"}'` | Call one tool |
//! | `toolgate serve` | Start the HTTP server |
//! | `toolgate mcp --user u1` | Serve one identity's catalogue over MCP stdio |
//! | `toolgate corpus list` / `corpus delete <id>` | Manage corpora |
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); command output goes to
//! stdout as JSON.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use toolgate::access_store::AccessManifest;
use toolgate::config;
use toolgate::gateway::{Gateway, QueryRequest};
use toolgate::retrieval::IngestRequest;
use toolgate_core::models::{Acl, Identity};

/// Toolgate: access-resolved MCP tool aggregation and multi-corpus retrieval.
#[derive(Parser)]
#[command(name = "toolgate", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/toolgate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// The identity a command acts as.
#[derive(Args, Clone)]
struct IdentityArgs {
    #[arg(long)]
    user: String,

    /// Role held by the user. Repeatable.
    #[arg(long = "role")]
    roles: Vec<String>,
}

impl IdentityArgs {
    fn identity(&self) -> Identity {
        Identity::new(&self.user, self.roles.iter().cloned())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Manage backends and grants.
    Access {
        #[command(subcommand)]
        action: AccessAction,
    },

    /// Chunk, embed, and store a text file in a corpus.
    ///
    /// Creates the corpus on first use with the given model and chunking
    /// parameters. Later uploads must use the same parameters.
    Ingest {
        #[arg(long)]
        corpus: String,

        #[arg(long)]
        model: String,

        /// Uploading user.
        #[arg(long)]
        user: String,

        /// Source name stored with every chunk. Defaults to the file path.
        #[arg(long)]
        source: Option<String>,

        #[arg(long, default_value = "")]
        source_type: String,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// User granted on a newly created corpus. Repeatable.
        #[arg(long = "acl-user")]
        acl_users: Vec<String>,

        /// Role granted on a newly created corpus. Repeatable.
        #[arg(long = "acl-role")]
        acl_roles: Vec<String>,

        file: PathBuf,
    },

    /// Search one or more corpora.
    Query {
        #[command(flatten)]
        who: IdentityArgs,

        /// Corpus to search. Repeatable.
        #[arg(long = "corpus", required = true)]
        corpora: Vec<String>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        k: Option<usize>,

        /// Print the rendered LLM context block instead of JSON.
        #[arg(long)]
        context: bool,

        query: String,
    },

    /// List the tools a user's session would see.
    Tools {
        #[command(flatten)]
        who: IdentityArgs,
    },

    /// Call one `<backend>.<tool>` as a user.
    Call {
        #[command(flatten)]
        who: IdentityArgs,

        name: String,

        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Start the HTTP server.
    Serve,

    /// Serve a user's aggregated tools as an MCP server over stdio.
    Mcp {
        #[command(flatten)]
        who: IdentityArgs,
    },

    /// Manage corpora.
    Corpus {
        #[command(subcommand)]
        action: CorpusAction,
    },
}

#[derive(Subcommand)]
enum AccessAction {
    /// Register backends and grants from a TOML manifest.
    Load { manifest: PathBuf },

    /// Print the resolved backends and corpora of an identity.
    Show {
        #[command(flatten)]
        who: IdentityArgs,
    },
}

#[derive(Subcommand)]
enum CorpusAction {
    List,

    /// Delete a corpus, its grants, and its vector collection.
    Delete { id: String },
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let gateway = Gateway::open(cfg).await?;

    match cli.command {
        Commands::Init => {
            println!(
                "Database initialized at {}",
                gateway.config().db.path.display()
            );
        }
        Commands::Access { action } => match action {
            AccessAction::Load { manifest } => {
                let manifest = AccessManifest::load(&manifest)?;
                gateway.access_store().apply_manifest(&manifest).await?;
                println!(
                    "Loaded {} backend(s) and {} grant(s)",
                    manifest.backends.len(),
                    manifest.grants.len()
                );
            }
            AccessAction::Show { who } => {
                let identity = who.identity();
                let resolved = gateway.resolve(&identity).await?;
                let effective = gateway.access_store().effective_resources(&identity).await?;
                print_json(&serde_json::json!({
                    "identity": identity,
                    "resolved": resolved,
                    "grants": effective,
                }))?;
            }
        },
        Commands::Ingest {
            corpus,
            model,
            user,
            source,
            source_type,
            chunk_size,
            chunk_overlap,
            acl_users,
            acl_roles,
            file,
        } => {
            let text = std::fs::read_to_string(&file)?;
            let report = gateway
                .engine()
                .ingest_document(IngestRequest {
                    corpus_id: corpus,
                    embedding_model_id: model,
                    chunk_size,
                    chunk_overlap,
                    source: source.unwrap_or_else(|| file.display().to_string()),
                    source_type,
                    text,
                    uploaded_by: user,
                    acl: Acl {
                        users: acl_users.into_iter().collect(),
                        roles: acl_roles.into_iter().collect(),
                    },
                })
                .await?;
            print_json(&report)?;
        }
        Commands::Query {
            who,
            corpora,
            model,
            k,
            context,
            query,
        } => {
            let request = QueryRequest {
                corpus_ids: corpora,
                query_text: query,
                embedding_model_id: model,
                k,
            };
            let outcome = gateway.query(&who.identity(), &request).await?;
            if context {
                println!("{}", gateway.engine().build_context(&outcome.results));
            } else {
                print_json(&outcome)?;
            }
        }
        Commands::Tools { who } => {
            let session = gateway.open_session(who.identity()).await?;
            print_json(&serde_json::json!({
                "tools": session.registry.list_tools(),
                "failures": session.registry.failures(),
            }))?;
            session.registry.shutdown().await;
        }
        Commands::Call { who, name, args } => {
            let args: serde_json::Value = serde_json::from_str(&args)?;
            let session = gateway.open_session(who.identity()).await?;
            let result = session.registry.call(&name, args).await;
            session.registry.shutdown().await;
            print_json(&result?)?;
        }
        Commands::Serve => {
            toolgate::server::run_server(gateway).await?;
        }
        Commands::Mcp { who } => {
            let session = gateway.open_session(who.identity()).await?;
            toolgate::mcp::serve_stdio(Arc::new(session)).await?;
        }
        Commands::Corpus { action } => match action {
            CorpusAction::List => {
                print_json(&gateway.corpora().list().await?)?;
            }
            CorpusAction::Delete { id } => {
                if gateway
                    .corpora()
                    .delete(&id, gateway.engine().store().as_ref())
                    .await?
                {
                    println!("Deleted corpus '{}'", id);
                } else {
                    anyhow::bail!("no corpus with id '{}'", id);
                }
            }
        },
    }

    Ok(())
}
