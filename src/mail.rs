//! Minimal RFC 5322 message model: a header list plus an opaque body.
//!
//! Only what the relay needs is supported: header lookup and rewriting,
//! address-list parsing and formatting. MIME bodies are passed through
//! untouched.

use anyhow::bail;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Header {
    name: String,
    /// Raw value as it appeared, folded continuation lines included.
    value: String,
}

/// A parsed mail message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    headers: Vec<Header>,
    body: String,
}

impl Message {
    /// Parse headers up to the first empty line; the remainder is the body.
    ///
    /// A leading mbox envelope line (`From sender date`) is dropped: it is not
    /// a header and carries the real sender.
    ///
    /// # Errors
    /// Returns an error if a header line has no `:` or a continuation line has
    /// nothing to continue.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut headers: Vec<Header> = Vec::new();
        let mut rest = strip_envelope(raw);

        loop {
            let (line, next) = rest.split_once('\n').unwrap_or((rest, ""));
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                rest = next;
                break;
            }
            if line.starts_with([' ', '\t']) {
                let Some(last) = headers.last_mut() else {
                    bail!("continuation line before any header: {line:?}");
                };
                last.value.push('\n');
                last.value.push_str(line);
            } else {
                let Some((name, value)) = line.split_once(':') else {
                    bail!("malformed header line: {line:?}");
                };
                headers.push(Header {
                    name: name.trim_end().to_string(),
                    value: value.trim_start().to_string(),
                });
            }
            rest = next;
            if rest.is_empty() {
                break;
            }
        }

        Ok(Self {
            headers,
            body: rest.to_string(),
        })
    }

    /// First value of header `name` (case-insensitive), unfolded.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| unfold(&h.value))
    }

    /// Every value of header `name`, unfolded, in order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| unfold(&h.value))
            .collect()
    }

    /// Replace the first `name` header in place and drop any further ones, or
    /// append it when absent.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter()
            .position(|h| h.name.eq_ignore_ascii_case(name))
        {
            Some(pos) => {
                let mut seen = 0_usize;
                self.headers.retain(|h| {
                    if h.name.eq_ignore_ascii_case(name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
                if let Some(header) = self.headers.get_mut(pos) {
                    header.value = value;
                }
            }
            None => self.add_header(name, value),
        }
    }

    /// Append a header after the existing ones.
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.push(Header {
            name: name.to_string(),
            value: value.into(),
        });
    }

    /// Message body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for h in &self.headers {
            writeln!(f, "{}: {}", h.name, h.value)?;
        }
        writeln!(f)?;
        f.write_str(&self.body)
    }
}

fn strip_envelope(raw: &str) -> &str {
    if raw.starts_with("From ") {
        raw.split_once('\n').map_or("", |(_, rest)| rest)
    } else {
        raw
    }
}

fn unfold(value: &str) -> String {
    value
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect::<Vec<_>>()
        .join("")
}

/// Characters that force a display name to be quoted.
const SPECIALS: &str = "()<>[]@,:;.\"\\";

/// A mailbox: optional display name plus address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    /// Display name, possibly empty.
    pub name: String,
    /// Bare `local@domain` address.
    pub addr: String,
}

impl Address {
    /// Mailbox with a display name.
    #[must_use]
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            return f.write_str(&self.addr);
        }
        let needs_quotes = self.name.chars().any(|c| SPECIALS.contains(c));
        if needs_quotes {
            let escaped = self.name.replace('\\', "\\\\").replace('"', "\\\"");
            write!(f, "\"{escaped}\" <{}>", self.addr)
        } else {
            write!(f, "{} <{}>", self.name, self.addr)
        }
    }
}

/// Parse a single mailbox such as `Alice <alice@x>`, `alice@x (Alice)` or
/// `alice@x`.
#[must_use]
pub fn parse_address(raw: &str) -> Address {
    let raw = raw.trim();
    if let Some((name, after)) = raw.split_once('<') {
        let addr = after.split_once('>').map_or(after, |(addr, _)| addr);
        return Address::new(unquote(name.trim()), addr.trim());
    }
    if let Some((addr, comment)) = raw.split_once('(') {
        if let Some((name, _)) = comment.rsplit_once(')') {
            return Address::new(name.trim(), addr.trim());
        }
    }
    Address::new("", raw)
}

fn unquote(name: &str) -> String {
    let Some(inner) = name.strip_prefix('"').and_then(|n| n.strip_suffix('"')) else {
        return name.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse every mailbox in one or more address-list header values.
#[must_use]
pub fn parse_address_list(values: &[String]) -> Vec<Address> {
    values
        .iter()
        .flat_map(|v| split_top_level(v))
        .filter(|part| !part.trim().is_empty())
        .map(|part| parse_address(&part))
        .collect()
}

fn split_top_level(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let (mut quoted, mut escaped) = (false, false);
    let (mut angle, mut paren) = (0_u32, 0_u32);

    for c in value.chars() {
        if escaped {
            escaped = false;
            current.push(c);
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            '<' if !quoted => angle += 1,
            '>' if !quoted => angle = angle.saturating_sub(1),
            '(' if !quoted => paren += 1,
            ')' if !quoted => paren = paren.saturating_sub(1),
            ',' if !quoted && angle == 0 && paren == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current);
    parts
}

/// Re-render an address list, substituting `new` (without display name) for
/// every mailbox whose address is exactly `old`.
#[must_use]
pub fn replace_address(values: &[String], old: &str, new: &str) -> String {
    parse_address_list(values)
        .into_iter()
        .map(|a| {
            if a.addr == old {
                Address::new("", new)
            } else {
                a
            }
        })
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::ensure;

    const RAW: &str = "From: Alice <alice@x>\r\n\
To: Secret Friend <santa@x>,\r\n\tcarol@x\r\n\
Subject: hi\r\n\
\r\n\
Body line\r\n";

    #[test]
    fn parses_folded_headers_and_body() -> anyhow::Result<()> {
        let msg = Message::parse(RAW)?;
        ensure!(msg.get("from").as_deref() == Some("Alice <alice@x>"));
        ensure!(msg.get("To").as_deref() == Some("Secret Friend <santa@x>,\tcarol@x"));
        ensure!(msg.get("Cc").is_none());
        ensure!(msg.body() == "Body line\r\n");
        Ok(())
    }

    #[test]
    fn drops_mbox_envelope_line() -> anyhow::Result<()> {
        let msg = Message::parse(
            "From alice@x Mon Nov 30 10:00:00 2026\nFrom: Alice <alice@x>\nSubject: hi\n\nbody\n",
        )?;
        ensure!(msg.get_all("From") == vec!["Alice <alice@x>".to_string()]);
        ensure!(msg.to_string() == "From: Alice <alice@x>\nSubject: hi\n\nbody\n");
        Ok(())
    }

    #[test]
    fn rejects_garbage_header() {
        assert!(Message::parse("not a header\n\nbody").is_err());
        assert!(Message::parse(" leading continuation\n\n").is_err());
    }

    #[test]
    fn set_header_replaces_first_and_drops_duplicates() -> anyhow::Result<()> {
        let mut msg = Message::parse("To: a@x\nSubject: s\nTo: b@x\n\nbody")?;
        msg.set_header("to", "c@x");
        msg.set_header("Date", "now");
        ensure!(msg.get_all("To") == vec!["c@x".to_string()]);
        ensure!(msg.to_string() == "To: c@x\nSubject: s\nDate: now\n\nbody");
        Ok(())
    }

    #[test]
    fn parses_mailbox_forms() {
        assert_eq!(
            parse_address("\"Doe, Jane\" <jane@x>"),
            Address::new("Doe, Jane", "jane@x")
        );
        assert_eq!(parse_address("jane@x (Jane)"), Address::new("Jane", "jane@x"));
        assert_eq!(parse_address(" jane@x "), Address::new("", "jane@x"));
    }

    #[test]
    fn formats_with_quotes_only_when_needed() {
        assert_eq!(
            Address::new("Secret Friend", "santa@x").to_string(),
            "Secret Friend <santa@x>"
        );
        assert_eq!(
            Address::new("Doe, J.", "j@x").to_string(),
            "\"Doe, J.\" <j@x>"
        );
        assert_eq!(Address::new("", "j@x").to_string(), "j@x");
    }

    #[test]
    fn replace_address_swaps_only_the_relay_address() {
        let values = vec![
            "Secret Friend <santa@x>, \"Doe, Jane\" <jane@x>".to_string(),
            "other@x".to_string(),
        ];
        assert_eq!(
            replace_address(&values, "santa@x", "bob@y"),
            "bob@y, \"Doe, Jane\" <jane@x>, other@x"
        );
    }
}
