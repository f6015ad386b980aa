//! Welcome and match notifications built from message templates.

use crate::id;
use crate::mail::{Address, Message};
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

/// Display name used for every mail the relay sends.
pub const RELAY_DISPLAY_NAME: &str = "Secret Friend";

/// A stored `.eml` template: headers such as `Subject` plus a body.
#[derive(Debug, Clone)]
pub struct Template {
    path: PathBuf,
    message: Message,
}

impl Template {
    /// Read and parse the template at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid message.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read template {}", path.display()))?;
        let message =
            Message::parse(&raw).with_context(|| format!("parse template {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Template file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fill in the envelope headers for one recipient.
    ///
    /// `in_reply_to` is the `Message-Id` of the mail that triggered the
    /// notification, when it had one.
    ///
    /// # Errors
    /// Returns an error if the date cannot be formatted or no id can be generated.
    pub fn render(
        &self,
        relay_addr: &str,
        to: &str,
        in_reply_to: Option<&str>,
        now: OffsetDateTime,
    ) -> anyhow::Result<Message> {
        let mut msg = self.message.clone();
        msg.add_header("To", to);
        msg.add_header("From", relay_from(relay_addr));
        msg.add_header("Date", format_date(now)?);
        msg.add_header("Message-Id", id::message_id(relay_addr)?);
        if let Some(reply) = in_reply_to {
            msg.add_header("References", reply);
            msg.add_header("In-Reply-To", reply);
        }
        Ok(msg)
    }
}

/// `From` value that hides the sender behind the relay.
#[must_use]
pub fn relay_from(relay_addr: &str) -> String {
    Address::new(RELAY_DISPLAY_NAME, relay_addr).to_string()
}

/// RFC 2822 date, as used in `Date` and `Received` headers.
///
/// # Errors
/// Returns an error if `now` is outside the RFC 2822 year range.
pub fn format_date(now: OffsetDateTime) -> anyhow::Result<String> {
    now.format(&Rfc2822).context("format RFC 2822 date")
}
