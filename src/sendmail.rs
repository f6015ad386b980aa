//! Hand-off of finished messages to the local mail transfer agent.

use crate::mail::Message;
use anyhow::Context;
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Default MTA entry point.
pub const DEFAULT_SENDMAIL: &str = "/usr/sbin/sendmail";

/// Something that can deliver a message and report an exit status.
pub trait Transport {
    /// Deliver `msg`, returning the delivery agent's exit status (0 on success).
    ///
    /// # Errors
    /// Returns an error if the agent cannot be started or fed.
    fn send(&self, msg: &Message) -> anyhow::Result<i32>;
}

/// `sendmail -t -oi`: recipients come from the headers, a lone `.` does not end
/// the message.
#[derive(Debug, Clone)]
pub struct Sendmail {
    program: PathBuf,
    args: Vec<OsString>,
}

impl Sendmail {
    /// Use `program` with the standard `-t -oi` flags.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["-t".into(), "-oi".into()],
        }
    }

    /// Replace the argument list.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for Sendmail {
    fn default() -> Self {
        Self::new(DEFAULT_SENDMAIL)
    }
}

impl Transport for Sendmail {
    fn send(&self, msg: &Message) -> anyhow::Result<i32> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {}", self.program.display()))?;

        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(msg.to_string().as_bytes()),
            None => Err(std::io::Error::other("sendmail stdin was not captured")),
        };

        // Reap the child even when feeding it failed.
        let status = child.wait().context("wait for sendmail")?;
        written.with_context(|| format!("write message to sendmail ({status})"))?;
        debug!(program = %self.program.display(), %status, "sendmail finished");
        Ok(status.code().unwrap_or_else(|| {
            warn!(%status, "sendmail terminated by signal");
            1
        }))
    }
}
