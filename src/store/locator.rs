//! Time-limited retrieval links for stored images.
//!
//! Search results carry a link per hit so callers can fetch the image
//! without store credentials. [`SignedUrlResolver`] issues links of the form
//!
//! ```text
//! <base_url>/<key>?expires=<unix seconds>&signature=<hex HMAC-SHA256(secret, "key|expires")>
//! ```
//!
//! and whatever serves `base_url` checks them with
//! [`SignedUrlResolver::verify`].

use crate::store::StoreError;
use chrono::{DateTime, TimeDelta, Utc};
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

/// A retrieval link and the instant it stops working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Resolves object keys to time-limited retrieval links.
pub trait LocatorResolver: Send + Sync {
    fn locate(&self, key: &str, ttl: Duration) -> Result<Locator, StoreError>;
}

/// Issues and verifies HMAC-SHA256 signed URLs under a base URL.
#[derive(Debug, Clone)]
pub struct SignedUrlResolver {
    base: Url,
    secret: String,
}

impl SignedUrlResolver {
    /// # Errors
    /// Fails if `base_url` does not parse or cannot carry a path.
    pub fn new(base_url: &str, secret: impl Into<String>) -> Result<Self, StoreError> {
        let base = Url::parse(base_url)
            .map_err(|e| StoreError::Backend(format!("invalid base URL '{base_url}': {e}")))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::Backend(format!(
                "base URL '{base_url}' cannot hold object paths"
            )));
        }
        Ok(Self {
            base,
            secret: secret.into(),
        })
    }

    /// Builds the link for `key` expiring at `expires_at`.
    pub fn locate_until(&self, key: &str, expires_at: DateTime<Utc>) -> Result<Locator, StoreError> {
        let expires = expires_at.timestamp();
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| StoreError::Backend("base URL cannot hold object paths".to_string()))?
            .pop_if_empty()
            .extend(key.split('/'));
        url.query_pairs_mut()
            .clear()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &self.sign(key, expires));

        Ok(Locator {
            url: url.into(),
            expires_at,
        })
    }

    /// Checks a link issued by this resolver, returning its object key.
    ///
    /// Returns `None` for links under another base, with a bad signature, or
    /// expired as of `now`.
    #[must_use]
    pub fn verify(&self, link: &str, now: DateTime<Utc>) -> Option<String> {
        let url = Url::parse(link).ok()?;
        if url.origin() != self.base.origin() {
            return None;
        }

        let base_segments: Vec<&str> = self
            .base
            .path_segments()?
            .filter(|s| !s.is_empty())
            .collect();
        let segments: Vec<&str> = url.path_segments()?.collect();
        if segments.len() <= base_segments.len()
            || segments[..base_segments.len()] != base_segments[..]
        {
            return None;
        }

        let key = segments[base_segments.len()..]
            .iter()
            .map(|s| percent_decode(s))
            .collect::<Option<Vec<_>>>()?
            .join("/");

        let mut expires = None;
        let mut signature = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "expires" => expires = value.parse::<i64>().ok(),
                "signature" => signature = Some(value.into_owned()),
                _ => {}
            }
        }
        let (expires, signature) = (expires?, decode_hex32(&signature?)?);

        if !ct_eq(&signature, &self.mac(&key, expires)) || now.timestamp() > expires {
            return None;
        }
        Some(key)
    }

    fn mac(&self, key: &str, expires: i64) -> [u8; 32] {
        hmac_sha256(self.secret.as_bytes(), format!("{key}|{expires}").as_bytes())
    }

    fn sign(&self, key: &str, expires: i64) -> String {
        self.mac(key, expires)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

const HMAC_BLOCK_SIZE: usize = 64;

/// HMAC-SHA256 (RFC 2104).
fn hmac_sha256(secret: &[u8], message: &[u8]) -> [u8; 32] {
    // Keys longer than a block are hashed first
    let mut block = [0u8; HMAC_BLOCK_SIZE];
    if secret.len() > HMAC_BLOCK_SIZE {
        block[..32].copy_from_slice(&Sha256::digest(secret));
    } else {
        block[..secret.len()].copy_from_slice(secret);
    }

    let mut inner = Sha256::new();
    inner.update(block.map(|b| b ^ 0x36));
    inner.update(message);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(block.map(|b| b ^ 0x5c));
    outer.update(inner_hash);
    outer.finalize().into()
}

/// Compares digests without an early exit on the first differing byte.
fn ct_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

fn decode_hex32(hex: &str) -> Option<[u8; 32]> {
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(hex.get(2 * i..2 * i + 2)?, 16).ok()?;
    }
    Some(out)
}

impl LocatorResolver for SignedUrlResolver {
    fn locate(&self, key: &str, ttl: Duration) -> Result<Locator, StoreError> {
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|e| StoreError::Backend(format!("link lifetime out of range: {e}")))?;
        self.locate_until(key, Utc::now() + ttl)
    }
}

fn percent_decode(segment: &str) -> Option<String> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = segment.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
