//! Per-message relay pipeline.
//!
//! One incoming mail is parsed, logged, its sender resolved against the
//! pairing store, and then either answered with notifications, deferred, or
//! forwarded to the sender's partner with the relay address rewritten.

use crate::mail::{self, Message};
use crate::notify::{self, Template};
use crate::record::DELIMITER;
use crate::resolver::{self, Resolution};
use crate::sendmail::Transport;
use anyhow::{bail, Context};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing::{info, warn};

/// Exit status telling the MTA to retry delivery later.
pub const EXIT_DEFER: i32 = 111;

#[derive(Debug, Clone)]
/// Everything the relay needs besides the message itself.
pub struct RelayConfig {
    /// Address the relay sends and receives as; hidden senders appear as this.
    pub relay_addr: String,
    /// Pairing store file.
    pub store: PathBuf,
    /// CSV log of received messages.
    pub message_log: PathBuf,
    /// Template sent to newly registered participants.
    pub welcome: PathBuf,
    /// Template sent to both participants of a new pair.
    pub match_template: PathBuf,
    /// Host name recorded in the `Received` header.
    pub hostname: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What happened to one incoming message.
pub enum RelayOutcome {
    /// Sender registered; welcome sent.
    Welcomed,
    /// Sender registered and paired; welcome and match mails sent.
    Matched {
        /// The sender's new partner.
        partner: String,
    },
    /// Sender has no partner yet; the MTA should redeliver later.
    Deferred,
    /// Message forwarded to the partner.
    Forwarded {
        /// Recipient of the forwarded message.
        partner: String,
        /// Transport exit status.
        status: i32,
    },
}

impl RelayOutcome {
    /// Process exit status for this outcome.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Welcomed | Self::Matched { .. } => 0,
            Self::Deferred => EXIT_DEFER,
            Self::Forwarded { status, .. } => *status,
        }
    }
}

/// Reject identifiers that cannot be stored in a store line.
///
/// # Errors
/// Returns an error for empty identifiers or ones containing the field
/// delimiter or a line break.
pub fn validate_participant(participant: &str) -> anyhow::Result<()> {
    if participant.is_empty() {
        bail!("participant address is empty");
    }
    if participant.contains([DELIMITER, '\r', '\n']) {
        bail!("participant address {participant:?} contains a reserved character");
    }
    Ok(())
}

/// Best-effort local host name for `Received` headers.
#[must_use]
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| fs::read_to_string("/proc/sys/kernel/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Handle one raw incoming message.
///
/// # Errors
/// Fails if the message has no usable sender, the log or templates cannot be
/// accessed, the store rejects the resolve, or the transport cannot be run.
pub fn relay_message(
    cfg: &RelayConfig,
    raw: &str,
    transport: &dyn Transport,
    now: OffsetDateTime,
) -> anyhow::Result<RelayOutcome> {
    let mut msg = Message::parse(raw).context("parse incoming message")?;

    let sender = msg
        .get("From")
        .map(|from| mail::parse_address(&from).addr)
        .unwrap_or_default();
    validate_participant(&sender).context("invalid sender")?;
    msg.set_header("From", notify::relay_from(&cfg.relay_addr));

    let message_id = msg.get("Message-Id");
    append_message_log(cfg, msg.get("Date").as_deref(), &sender, message_id.as_deref())?;
    info!(
        message_id = message_id.as_deref().unwrap_or(""),
        sender = %sender,
        "received message"
    );

    let resolution = resolver::resolve(&cfg.store, &sender)
        .with_context(|| format!("resolve partner of {sender}"))?;

    match resolution {
        Resolution::PendingCreated => {
            info!(sender = %sender, "new participant, sending welcome mail");
            notify_one(cfg, &cfg.welcome, &sender, message_id.as_deref(), transport, now)?;
            Ok(RelayOutcome::Welcomed)
        }
        Resolution::NewPairFormed(partner) => {
            info!(sender = %sender, "new participant, sending welcome mail");
            notify_one(cfg, &cfg.welcome, &sender, message_id.as_deref(), transport, now)?;
            info!(sender = %sender, partner = %partner, "new match, sending match mails");
            for recipient in [sender.as_str(), partner.as_str()] {
                notify_one(
                    cfg,
                    &cfg.match_template,
                    recipient,
                    message_id.as_deref(),
                    transport,
                    now,
                )?;
            }
            Ok(RelayOutcome::Matched { partner })
        }
        Resolution::UnmatchedUser => {
            info!(sender = %sender, "no partner yet, deferring message");
            Ok(RelayOutcome::Deferred)
        }
        Resolution::ExistingPartner(partner) => {
            info!(sender = %sender, partner = %partner, "looked up partner");
            for header in ["To", "Cc"] {
                let values = msg.get_all(header);
                if !values.is_empty() {
                    msg.set_header(
                        header,
                        mail::replace_address(&values, &cfg.relay_addr, &partner),
                    );
                }
            }
            msg.add_header(
                "Received",
                format!(
                    "(secretfriend on {}); {}",
                    cfg.hostname,
                    notify::format_date(now)?
                ),
            );
            let status = transport.send(&msg).context("forward message")?;
            if status != 0 {
                warn!(status, partner = %partner, "transport rejected forwarded message");
            }
            Ok(RelayOutcome::Forwarded { partner, status })
        }
    }
}

fn notify_one(
    cfg: &RelayConfig,
    template: &std::path::Path,
    to: &str,
    in_reply_to: Option<&str>,
    transport: &dyn Transport,
    now: OffsetDateTime,
) -> anyhow::Result<()> {
    let template = Template::load(template)?;
    info!(
        template = %template.path().display(),
        to,
        reply_to = in_reply_to.unwrap_or(""),
        "sending notification"
    );
    let msg = template.render(&cfg.relay_addr, to, in_reply_to, now)?;
    let status = transport
        .send(&msg)
        .with_context(|| format!("send {} to {to}", template.path().display()))?;
    if status != 0 {
        warn!(status, to, "transport rejected notification");
    }
    Ok(())
}

fn append_message_log(
    cfg: &RelayConfig,
    date: Option<&str>,
    sender: &str,
    message_id: Option<&str>,
) -> anyhow::Result<()> {
    let row = [date.unwrap_or(""), sender, message_id.unwrap_or("")]
        .iter()
        .map(|field| csv_field(field))
        .collect::<Vec<_>>()
        .join(",")
        + "\n";
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cfg.message_log)
        .with_context(|| format!("open message log {}", cfg.message_log.display()))?;
    log.write_all(row.as_bytes())
        .with_context(|| format!("append to message log {}", cfg.message_log.display()))
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
