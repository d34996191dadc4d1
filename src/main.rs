use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use credgate::clock::{Clock, SystemClock};
use credgate::gate::{HEADER_ACCESS_KEY, HEADER_CONTENT, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use credgate::manager::{AuthConfig, CacheBackend, CredentialManager, DurableBackend};
use credgate::model::{PermissionLevel, User};
use credgate::{signature, util};

#[derive(Parser)]
#[command(name = "credgate")]
#[command(about = "Session tokens and access-key credentials", long_about = None)]
struct Cli {
    /// Durable backend: memory | sled:<path>
    #[arg(long, env = "CREDGATE_STORE", global = true)]
    backend: Option<String>,

    /// Cache backend: memory | redis://host/
    #[arg(long, global = true)]
    cache: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage access-key / secret-key pairs
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Print the signing headers for a request body
    Sign {
        #[arg(long)]
        access_key: String,
        #[arg(long)]
        secret_key: String,
        /// Content the signature covers
        #[arg(long)]
        content: String,
        /// Unix seconds (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,
    },

    /// Issue or verify session tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Generate a new key pair for an owner (secret shown once)
    Generate {
        #[arg(long)]
        owner: u64,
        /// Lifetime in seconds; 0 never expires
        #[arg(long, default_value_t = 0)]
        ttl: u64,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// List key pairs of an owner
    List {
        #[arg(long)]
        owner: u64,
    },

    /// Change description and lifetime of a key pair
    Update {
        id: u64,
        #[arg(long, default_value_t = 0)]
        ttl: u64,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Delete a key pair
    Delete { id: u64 },

    /// Resolve the secret of an access key
    Lookup { access_key: String },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Issue a session token
    Issue {
        #[arg(long)]
        uid: u64,
        #[arg(long, default_value = "")]
        uname: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "")]
        avatar: String,
        #[arg(long)]
        admin: bool,
    },

    /// Verify a session token and print its claims
    Verify { token: String },
}

fn main() -> Result<()> {
    util::init_tracing();
    let cli = Cli::parse();

    if let Commands::Sign {
        access_key,
        secret_key,
        content,
        timestamp,
    } = &cli.command
    {
        let ts = match timestamp {
            Some(ts) => *ts,
            None => SystemClock.now_secs(),
        };
        println!("{}: {}", HEADER_ACCESS_KEY, access_key);
        println!("{}: {}", HEADER_SIGNATURE, signature::sign(secret_key, content));
        println!("{}: {}", HEADER_TIMESTAMP, ts);
        println!("{}: {}", HEADER_CONTENT, content);
        return Ok(());
    }

    let mut config = AuthConfig::from_env();
    if let Some(spec) = cli.backend.as_deref() {
        config.durable = DurableBackend::from_spec(spec)
            .ok_or_else(|| anyhow!("unsupported backend spec: {spec}"))?;
    }
    if let Some(spec) = cli.cache.as_deref() {
        config.cache = CacheBackend::from_spec(spec)
            .ok_or_else(|| anyhow!("unsupported cache spec: {spec}"))?;
    }
    let manager =
        CredentialManager::from_config(&config).context("failed to open credential stores")?;

    match cli.command {
        Commands::Keys { command } => run_keys(&manager, command),
        Commands::Token { command } => run_token(&manager, command),
        Commands::Sign { .. } => Ok(()),
    }
}

fn run_keys(manager: &CredentialManager, command: KeyCommands) -> Result<()> {
    let registry = manager.registry();
    match command {
        KeyCommands::Generate {
            owner,
            ttl,
            description,
        } => {
            let cred = registry.generate(owner, Duration::from_secs(ttl), &description)?;
            println!("{}", serde_json::to_string_pretty(&cred)?);
        }
        KeyCommands::List { owner } => {
            let creds = registry.list_for_owner(owner)?;
            // secrets stay out of listings
            let rows: Vec<_> = creds
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "access_key": c.access_key,
                        "owner_id": c.owner_id,
                        "expire_at": c.expire_at,
                        "description": c.description,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        KeyCommands::Update {
            id,
            ttl,
            description,
        } => {
            let expire_at = registry.update(id, &description, Duration::from_secs(ttl))?;
            println!("updated {id}, expire_at={expire_at}");
        }
        KeyCommands::Delete { id } => {
            if registry.delete(id)? {
                println!("deleted {id}");
            } else {
                println!("no key pair with id {id}");
            }
        }
        KeyCommands::Lookup { access_key } => {
            println!("{}", registry.lookup_secret(&access_key)?);
        }
    }
    Ok(())
}

fn run_token(manager: &CredentialManager, command: TokenCommands) -> Result<()> {
    let codec = manager.codec();
    match command {
        TokenCommands::Issue {
            uid,
            uname,
            email,
            avatar,
            admin,
        } => {
            let level = if admin {
                PermissionLevel::Admin
            } else {
                PermissionLevel::Normal
            };
            let user = User {
                uid,
                level,
                uname,
                email,
                avatar,
                activated: true,
            };
            println!("{}", codec.issue(&user)?);
        }
        TokenCommands::Verify { token } => {
            let claims = codec.verify(&token)?;
            println!("{}", serde_json::to_string_pretty(&claims)?);
        }
    }
    Ok(())
}
