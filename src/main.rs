#![allow(clippy::print_stderr, clippy::print_stdout)]

//! CLI entrypoint for `secretfriend`.
//!
//! The pairing and relay logic lives in the `secretfriend` library crate
//! (`src/resolver.rs`, `src/relay.rs`, etc).

use anyhow::Context;
use clap::{Parser, Subcommand};
use secretfriend::relay::{self, RelayConfig};
use secretfriend::sendmail::{Sendmail, DEFAULT_SENDMAIL};
use secretfriend::{resolve, Resolution};
use serde::Serialize;
use std::io::{Read, Write};
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "secretfriend",
    version,
    about = "Secret friend pairing and anonymous mail relay",
    long_about = "Secret friend pairing and anonymous mail relay.\n\n\
`secretfriend relay` is meant to run as a mail delivery filter: every incoming message \
registers its sender, pairs them with the next newcomer, and forwards later messages to \
the partner with the relay address standing in for the real sender.\n\
Pairs are kept in a shared CSV store guarded by advisory file locks, so concurrent \
deliveries are safe.",
    after_long_help = r"Exit codes (relay):
  0    message processed (welcome/match sent, or forwarded successfully)
  111  sender has no partner yet; the MTA should retry later
  N    exit status of sendmail when forwarding failed
  1    any other error

Logging goes to stderr; set RUST_LOG (e.g. RUST_LOG=debug) to change verbosity."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one incoming message.
    Relay {
        /// Address of the relay (should match the incoming address).
        addr: String,
        /// Pairing store file.
        #[arg(long, env = "SECRETFRIEND_STORE", default_value = "friends.csv")]
        store: PathBuf,
        /// File to read the message from (default: stdin).
        #[arg(short, long)]
        read: Option<PathBuf>,
        /// CSV log of received messages.
        #[arg(short, long, env = "SECRETFRIEND_LOG", default_value = "messages.log")]
        log: PathBuf,
        /// Welcome mail template.
        #[arg(long, env = "SECRETFRIEND_WELCOME", default_value = "welcome.eml")]
        welcome: PathBuf,
        /// Match mail template.
        #[arg(long = "match", env = "SECRETFRIEND_MATCH", default_value = "match.eml")]
        match_template: PathBuf,
        /// Sendmail-compatible delivery program.
        #[arg(long, env = "SECRETFRIEND_SENDMAIL", default_value = DEFAULT_SENDMAIL)]
        sendmail: PathBuf,
    },
    /// Resolve a participant's partner, registering them if new.
    Resolve {
        participant: String,
        /// Pairing store file.
        #[arg(long, env = "SECRETFRIEND_STORE", default_value = "friends.csv")]
        store: PathBuf,
        /// Print the outcome as a JSON object.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:?}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Relay {
            addr,
            store,
            read,
            log,
            welcome,
            match_template,
            sendmail,
        } => {
            let raw = match read {
                Some(p) => std::fs::read_to_string(&p)
                    .with_context(|| format!("read message file {}", p.display()))?,
                None => read_stdin_to_string().context("read message from stdin")?,
            };
            let cfg = RelayConfig {
                relay_addr: addr,
                store,
                message_log: log,
                welcome,
                match_template,
                hostname: relay::local_hostname(),
            };
            let outcome = relay::relay_message(
                &cfg,
                &raw,
                &Sendmail::new(sendmail),
                OffsetDateTime::now_utc(),
            )?;
            Ok(outcome.exit_code())
        }

        Commands::Resolve {
            participant,
            store,
            json,
        } => {
            relay::validate_participant(&participant)?;
            let resolution = resolve(&store, &participant)
                .with_context(|| format!("resolve {participant} in {}", store.display()))?;
            if json {
                write_json(&resolution)?;
            } else {
                println!("{}", describe(&resolution));
            }
            Ok(match resolution {
                Resolution::UnmatchedUser => relay::EXIT_DEFER,
                _ => 0,
            })
        }
    }
}

fn describe(resolution: &Resolution) -> String {
    match resolution {
        Resolution::ExistingPartner(p) => format!("existing {p}"),
        Resolution::NewPairFormed(p) => format!("matched {p}"),
        Resolution::PendingCreated => "pending".to_string(),
        Resolution::UnmatchedUser => "unmatched".to_string(),
    }
}

fn read_stdin_to_string() -> anyhow::Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("read stdin")?;
    Ok(buf)
}

fn write_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    let raw = serde_json::to_string_pretty(value).context("serialize JSON")?;
    stdout.write_all(raw.as_bytes()).context("write stdout")?;
    stdout.write_all(b"\n").context("write stdout newline")?;
    stdout.flush().context("flush stdout")?;
    Ok(())
}
