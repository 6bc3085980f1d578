//! Digest access authentication over SHA-256.
//!
//! The authenticator holds the credentials table for one realm and verifies
//! `Authorization: Digest` headers with `qop=auth`. Nonces are the issue time
//! in hex seconds, so freshness can be checked without server-side state.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sha2::{Digest as _, Sha256};
use thiserror::Error;

use super::credentials::AuthEntry;
use super::header::DigestParams;

/// Reasons an `Authorization` header was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// No `Authorization` header, or one using another scheme.
    #[error("no digest authorization header")]
    MissingHeader,
    /// A required digest parameter was absent; carries its name.
    #[error("authorization header is missing '{0}'")]
    MissingField(&'static str),
    /// The nonce is not hex, is older than the TTL, or is dated in the future.
    #[error("nonce is stale or unreadable")]
    StaleNonce,
    /// The header's `uri` differs from the request line.
    #[error("authorization uri does not match the request target")]
    UriMismatch,
    /// No credentials entry for the user in this realm.
    #[error("unknown user '{0}'")]
    UnknownUser(String),
    /// The response hash does not match the stored credentials.
    #[error("digest response does not match")]
    BadResponse,
}

/// Fields every accepted header must carry.
const REQUIRED_FIELDS: [&str; 7] = ["username", "nonce", "uri", "response", "qop", "nc", "cnonce"];

/// Verifies digest credentials for a single realm.
#[derive(Debug, Clone)]
pub struct DigestAuthenticator {
    realm: String,
    entries: Vec<AuthEntry>,
    nonce_ttl: Duration,
}

impl DigestAuthenticator {
    /// Builds an authenticator from entries already filtered to `realm`.
    #[must_use]
    pub fn new(realm: impl Into<String>, entries: Vec<AuthEntry>, nonce_ttl: Duration) -> Self {
        Self {
            realm: realm.into(),
            entries,
            nonce_ttl,
        }
    }

    /// Realm presented in challenges.
    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Computes the stored hash for a password, as written to the table.
    #[must_use]
    pub fn hash_password(username: &str, realm: &str, password: &str) -> String {
        sha256_hex(&format!("{username}:{realm}:{password}"))
    }

    /// `WWW-Authenticate` value carrying a nonce issued now.
    #[must_use]
    pub fn challenge(&self) -> String {
        self.challenge_at(SystemTime::now())
    }

    /// `WWW-Authenticate` value carrying a nonce issued at `now`.
    #[must_use]
    pub fn challenge_at(&self, now: SystemTime) -> String {
        format!(
            "Digest qop=\"auth\", realm=\"{}\", algorithm=SHA-256, nonce=\"{}\"",
            self.realm,
            issue_nonce(now)
        )
    }

    /// Checks a request's `Authorization` header against the table.
    ///
    /// Returns the authenticated username on success.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthFailure`] describing why the header was rejected.
    pub fn authenticate(
        &self,
        method: &str,
        request_uri: &str,
        header: Option<&str>,
    ) -> Result<String, AuthFailure> {
        self.authenticate_at(method, request_uri, header, SystemTime::now())
    }

    /// [`DigestAuthenticator::authenticate`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthFailure`] describing why the header was rejected.
    pub fn authenticate_at(
        &self,
        method: &str,
        request_uri: &str,
        header: Option<&str>,
        now: SystemTime,
    ) -> Result<String, AuthFailure> {
        let params = header
            .and_then(DigestParams::parse)
            .ok_or(AuthFailure::MissingHeader)?;
        for field in REQUIRED_FIELDS {
            if params.get(field).is_none() {
                return Err(AuthFailure::MissingField(field));
            }
        }
        let field = |name: &'static str| params.get(name).ok_or(AuthFailure::MissingField(name));

        let nonce = field("nonce")?;
        if !self.nonce_is_fresh(nonce, now) {
            return Err(AuthFailure::StaleNonce);
        }
        if field("uri")? != request_uri {
            return Err(AuthFailure::UriMismatch);
        }
        let username = field("username")?;
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.username == username && entry.realm == self.realm)
            .ok_or_else(|| AuthFailure::UnknownUser(username.to_owned()))?;

        let ha2 = sha256_hex(&format!("{method}:{request_uri}"));
        let expected = sha256_hex(&format!(
            "{}:{nonce}:{}:{}:{}:{ha2}",
            entry.hash,
            field("nc")?,
            field("cnonce")?,
            field("qop")?,
        ));
        if expected.eq_ignore_ascii_case(field("response")?) {
            Ok(username.to_owned())
        } else {
            Err(AuthFailure::BadResponse)
        }
    }

    fn nonce_is_fresh(&self, nonce: &str, now: SystemTime) -> bool {
        let Ok(issued) = u64::from_str_radix(nonce, 16) else {
            return false;
        };
        // Nonces dated after `now` were not issued by this clock.
        unix_seconds(now)
            .checked_sub(issued)
            .is_some_and(|age| age <= self.nonce_ttl.as_secs())
    }
}

/// Computes a client response the way a conforming user agent would.
#[must_use]
pub fn client_response(
    ha1: &str,
    method: &str,
    uri: &str,
    nonce: &str,
    nc: &str,
    cnonce: &str,
) -> String {
    let ha2 = sha256_hex(&format!("{method}:{uri}"));
    sha256_hex(&format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}"))
}

/// Nonce for a challenge issued at `now`.
#[must_use]
pub fn issue_nonce(now: SystemTime) -> String {
    format!("{:x}", unix_seconds(now))
}

fn unix_seconds(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
