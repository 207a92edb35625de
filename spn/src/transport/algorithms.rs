//! Per-connection algorithm negotiation.
//!
//! Older network gear only speaks SHA-1 key exchange, CBC ciphers and
//! `ssh-rsa` host keys. Legacy mode puts those first in the client's
//! preference lists for this one connection and keeps the modern defaults
//! after them, so a capable server still negotiates something current.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::keys::Algorithm;
use russh::{Preferred, cipher, compression, kex};

use super::config::SessionConfig;

/// Keepalive interval applied in legacy mode.
pub const LEGACY_KEEPALIVE: Duration = Duration::from_secs(30);

const LEGACY_KEX: &[kex::Name] = &[
    kex::DH_G1_SHA1,
    kex::DH_G14_SHA1,
    kex::DH_GEX_SHA1,
    kex::DH_GEX_SHA256,
];

const LEGACY_CIPHERS: &[cipher::Name] = &[
    cipher::AES_128_CBC,
    cipher::AES_256_CBC,
    cipher::AES_192_CBC,
];

/// Algorithm preferences for one connection.
pub fn preferred(legacy: bool) -> Preferred {
    let defaults = Preferred::default();
    if !legacy {
        return defaults;
    }

    Preferred {
        kex: Cow::Owned(prepend(LEGACY_KEX, &defaults.kex)),
        cipher: Cow::Owned(prepend(LEGACY_CIPHERS, &defaults.cipher)),
        key: Cow::Owned(prepend(&[Algorithm::Rsa { hash: None }], &defaults.key)),
        compression: Cow::Borrowed(&[compression::NONE]),
        ..defaults
    }
}

/// Build the russh client configuration for a session.
pub fn client_config(config: &SessionConfig) -> Arc<client::Config> {
    let mut ssh_config = client::Config {
        inactivity_timeout: Some(config.timeout),
        preferred: preferred(config.legacy_mode),
        ..Default::default()
    };
    if config.legacy_mode {
        ssh_config.keepalive_interval = Some(LEGACY_KEEPALIVE);
    }
    Arc::new(ssh_config)
}

/// `first` followed by whatever in `rest` is not already listed.
fn prepend<T: Clone + PartialEq>(first: &[T], rest: &[T]) -> Vec<T> {
    let mut out = first.to_vec();
    for item in rest {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modern_is_library_default() {
        let modern = preferred(false);
        let defaults = Preferred::default();
        assert_eq!(modern.kex, defaults.kex);
        assert_eq!(modern.cipher, defaults.cipher);
    }

    #[test]
    fn test_legacy_puts_old_algorithms_first() {
        let legacy = preferred(true);
        assert_eq!(&legacy.kex[..LEGACY_KEX.len()], LEGACY_KEX);
        assert_eq!(&legacy.cipher[..LEGACY_CIPHERS.len()], LEGACY_CIPHERS);
        assert_eq!(legacy.key[0], Algorithm::Rsa { hash: None });
        assert_eq!(&legacy.compression[..], &[compression::NONE]);
    }

    #[test]
    fn test_legacy_keeps_modern_fallbacks() {
        let legacy = preferred(true);
        for name in Preferred::default().kex.iter() {
            assert!(legacy.kex.contains(name));
        }
        for name in Preferred::default().cipher.iter() {
            assert!(legacy.cipher.contains(name));
        }
    }

    #[test]
    fn test_prepend_deduplicates() {
        assert_eq!(prepend(&[3, 1], &[1, 2, 3, 4]), vec![3, 1, 2, 4]);
    }
}
