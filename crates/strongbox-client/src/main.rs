use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use strongbox_client::{CardDetails, Credentials, SessionInfo, VaultClient};
use strongbox_shared::crypto::parse_key_hex;
use strongbox_shared::RecordKind;

/// Command-line client for a Strongbox vault
#[derive(Debug, Parser)]
#[command(name = "strongbox", version)]
struct Cli {
    /// Server base URL
    #[arg(long, env = "STRONGBOX_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// PEM file with a CA certificate to trust
    #[arg(long, env = "STRONGBOX_CA_CERT")]
    ca_cert: Option<PathBuf>,

    /// Hex-encoded 32-byte key for password and card records
    #[arg(long, env = "STRONGBOX_ENCRYPTION_KEY", hide_env_values = true)]
    key: Option<String>,

    /// User id from a previous login
    #[arg(long, env = "STRONGBOX_USER_UID")]
    user_uid: Option<String>,

    /// Session token from a previous login
    #[arg(long, env = "STRONGBOX_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create an account and print its session
    Register {
        #[arg(short, long)]
        login: String,
        #[arg(short, long)]
        password: String,
    },

    /// Log in and print the session
    Login {
        #[arg(short, long)]
        login: String,
        #[arg(short, long)]
        password: String,
    },

    /// List stored records
    List,

    /// Print a record, or write it to a file
    Get {
        id: String,
        /// Write the content here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Store a text note
    PutText {
        #[arg(short, long)]
        name: String,
        text: String,
    },

    /// Store a login for another service (sealed)
    PutPassword {
        #[arg(short, long)]
        name: String,
        #[arg(long)]
        login: String,
        #[arg(long)]
        password: String,
    },

    /// Store payment card details (sealed)
    PutCard {
        #[arg(short, long)]
        name: String,
        #[command(flatten)]
        card: CardArgs,
    },

    /// Upload a file
    PutFile {
        #[arg(short, long)]
        name: String,
        path: PathBuf,
    },

    /// Replace a text note
    UpdateText { id: String, text: String },

    /// Replace a stored login
    UpdatePassword {
        id: String,
        #[arg(long)]
        login: String,
        #[arg(long)]
        password: String,
    },

    /// Replace stored card details
    UpdateCard {
        id: String,
        #[command(flatten)]
        card: CardArgs,
    },

    /// Replace a record's content with a file
    UpdateFile { id: String, path: PathBuf },

    /// Delete a record
    Delete { id: String },
}

#[derive(Debug, clap::Args)]
struct CardArgs {
    #[arg(long)]
    number: String,
    #[arg(long)]
    holder: String,
    /// MM/YY
    #[arg(long)]
    expiry: String,
    #[arg(long)]
    cvc: String,
}

impl From<CardArgs> for CardDetails {
    fn from(args: CardArgs) -> Self {
        Self {
            number: args.number,
            holder: args.holder,
            expiry: args.expiry,
            cvc: args.cvc,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let ca_pem = match &cli.ca_cert {
        Some(path) => Some(
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?,
        ),
        None => None,
    };
    let mut client = VaultClient::new(&cli.server, ca_pem.as_deref())?;
    if let Some(hex_key) = &cli.key {
        client = client.with_key(parse_key_hex(hex_key).context("invalid encryption key")?);
    }
    if let (Some(user_uid), Some(token)) = (cli.user_uid.clone(), cli.token.clone()) {
        client = client.with_session(SessionInfo { user_uid, token });
    }

    match cli.command {
        Commands::Register { login, password } => {
            let session = client.register(&login, &password).await?;
            print_session(&session);
        }
        Commands::Login { login, password } => {
            let session = client.login(&login, &password).await?;
            print_session(&session);
        }
        Commands::List => {
            for item in client.list().await? {
                println!("{}\t{}\t{}", item.id, item.kind, item.name);
            }
        }
        Commands::Get { id, output } => match output {
            Some(path) => {
                let kind = client.download_to(&id, &path).await?;
                eprintln!("saved {kind} record to {}", path.display());
            }
            None => {
                let record = client.get(&id).await?;
                match (&record.kind, record.as_text()) {
                    (RecordKind::Password, _) | (RecordKind::Card, _) => {
                        println!("{}", serde_json::to_string_pretty(&pretty(&record)?)?)
                    }
                    (_, Some(text)) => println!("{text}"),
                    (_, None) => {
                        use std::io::Write;
                        std::io::stdout().write_all(record.as_bytes())?;
                    }
                }
            }
        },
        Commands::PutText { name, text } => client.put_text(&name, &text).await?,
        Commands::PutPassword {
            name,
            login,
            password,
        } => {
            client
                .put_password(&name, &Credentials { login, password })
                .await?
        }
        Commands::PutCard { name, card } => client.put_card(&name, &card.into()).await?,
        Commands::PutFile { name, path } => client.put_file(&name, &path).await?,
        Commands::UpdateText { id, text } => client.update_text(&id, &text).await?,
        Commands::UpdatePassword {
            id,
            login,
            password,
        } => {
            client
                .update_password(&id, &Credentials { login, password })
                .await?
        }
        Commands::UpdateCard { id, card } => client.update_card(&id, &card.into()).await?,
        Commands::UpdateFile { id, path } => client.update_file(&id, &path).await?,
        Commands::Delete { id } => client.delete(&id).await?,
    }

    Ok(())
}

/// Shell-friendly output so a session can be reused via the environment.
fn print_session(session: &SessionInfo) {
    println!("STRONGBOX_USER_UID={}", session.user_uid);
    println!("STRONGBOX_TOKEN={}", session.token);
}

fn pretty(record: &strongbox_client::Retrieved) -> anyhow::Result<serde_json::Value> {
    let text = record.as_text().context("record is not text")?;
    Ok(serde_json::from_str(text)?)
}
