pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::{chat::ChatArgs, owner::OwnerArgs, CommandResult};

#[derive(Debug, Parser)]
#[command(
    name = "aide",
    about = "Aide operator CLI",
    long_about = "Operate the email and CRM assistant: migrations, owners, one-off turns, ingestion, CRM sync and indexing.",
    after_help = "Examples:\n  aide doctor --json\n  aide owner --id u1 --address me@corp.com --mailbox-token $TOKEN\n  aide chat --owner u1 \"Did Jane reply?\"\n  aide ingest"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, integrations and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Register an owner or update its address and credentials")]
    Owner {
        #[arg(long)]
        id: String,
        #[arg(long)]
        address: String,
        #[arg(long, help = "Mailbox access token; kept when omitted")]
        mailbox_token: Option<String>,
        #[arg(long, help = "CRM access token; kept when omitted")]
        crm_token: Option<String>,
    },
    #[command(about = "Send one message to the assistant and print its answer")]
    Chat {
        #[arg(long)]
        owner: String,
        #[arg(long, help = "Conversation id; the owner's default conversation when omitted")]
        conversation: Option<String>,
        message: String,
    },
    #[command(about = "Run one mailbox ingestion cycle")]
    Ingest,
    #[command(about = "Import CRM contacts and notes, then embed anything new")]
    Sync,
    #[command(about = "Compute missing embeddings for stored emails, contacts and notes")]
    Index {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, default_value_t = commands::index::DEFAULT_BATCH)]
        batch: usize,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => CommandResult { exit_code: 0, output: commands::config::run() },
        Command::Doctor { json } => {
            CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Owner { id, address, mailbox_token, crm_token } => {
            commands::owner::run(OwnerArgs { id, address, mailbox_token, crm_token })
        }
        Command::Chat { owner, conversation, message } => {
            commands::chat::run(ChatArgs { owner, conversation, message })
        }
        Command::Ingest => commands::ingest::run(),
        Command::Sync => commands::sync::run(),
        Command::Index { owner, batch } => commands::index::run(owner, batch),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
