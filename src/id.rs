use anyhow::Context;
use rand::RngCore;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Lowercase hex string of `bytes` random bytes from the OS RNG.
///
/// # Errors
/// Returns an error if the OS RNG is unavailable.
pub fn random_hex(bytes: usize) -> anyhow::Result<String> {
    let mut raw = vec![0_u8; bytes];
    rand::rngs::OsRng
        .try_fill_bytes(&mut raw)
        .context("read OS randomness")?;

    let mut out = String::with_capacity(bytes.saturating_mul(2));
    for b in raw {
        for nibble in [b >> 4, b & 0x0f] {
            let digit = HEX_DIGITS.get(usize::from(nibble)).copied().unwrap_or(b'0');
            out.push(char::from(digit));
        }
    }
    Ok(out)
}

/// Fresh `Message-Id` value (`<hex@domain>`) for mail sent from `sender`.
///
/// The domain is taken from `sender`; `localhost` is used if it has none.
///
/// # Errors
/// Returns an error if the OS RNG is unavailable.
pub fn message_id(sender: &str) -> anyhow::Result<String> {
    let domain = sender
        .rsplit_once('@')
        .map(|(_, d)| d)
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    Ok(format!("<{}@{domain}>", random_hex(16)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::ensure;

    #[test]
    fn random_hex_is_lower_hex_of_requested_length() -> anyhow::Result<()> {
        let id = random_hex(4)?;
        ensure!(id.len() == 8);
        ensure!(id.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        ensure!(random_hex(16)? != random_hex(16)?);
        Ok(())
    }

    #[test]
    fn message_id_uses_sender_domain() -> anyhow::Result<()> {
        let id = message_id("santa@example.org")?;
        ensure!(id.starts_with('<'));
        ensure!(id.ends_with("@example.org>"));
        ensure!(id.len() == "<@example.org>".len() + 32);

        ensure!(message_id("santa")?.ends_with("@localhost>"));
        Ok(())
    }
}
