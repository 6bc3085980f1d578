//! Loading of the `user:realm:hash` credentials table.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// One row of the credentials table.
///
/// `hash` is the lowercase hex SHA-256 of `username:realm:password`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEntry {
    pub username: String,
    pub realm: String,
    pub hash: String,
}

impl AuthEntry {
    /// Builds an entry from its parts.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        realm: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            realm: realm.into(),
            hash: hash.into(),
        }
    }
}

/// Errors raised while reading the credentials table.
#[derive(Debug, Error)]
pub enum CredentialsError {
    /// Passwords are enabled but no table was configured.
    #[error("passwords are enabled but no password file is configured")]
    Missing,
    /// The table could not be read.
    #[error("failed to read password file {path}: {source}")]
    Read {
        /// Path of the credentials table.
        path: Utf8PathBuf,
        /// Underlying read failure.
        #[source]
        source: io::Error,
    },
    /// A line is not in `user:realm:hash` form.
    #[error("password file {path} line {line} is malformed")]
    Malformed {
        /// Path of the credentials table.
        path: Utf8PathBuf,
        /// One-based line number.
        line: usize,
    },
    /// The table holds no entries for the configured realm.
    #[error("password file {path} has no entries for realm '{realm}'")]
    EmptyRealm {
        /// Path of the credentials table.
        path: Utf8PathBuf,
        /// Realm that was searched for.
        realm: String,
    },
}

/// Reads every entry for `realm` from the file at `path`.
///
/// Blank lines and lines starting with `#` are skipped. Entries for other
/// realms are parsed but dropped.
///
/// # Errors
///
/// Fails when the file cannot be read, a line does not have three
/// colon-separated fields, or no entry matches `realm`.
pub fn load_credentials(path: &Utf8Path, realm: &str) -> Result<Vec<AuthEntry>, CredentialsError> {
    let contents = fs::read_to_string(path).map_err(|source| CredentialsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let entries = parse_credentials(&contents, realm).map_err(|line| {
        CredentialsError::Malformed {
            path: path.to_path_buf(),
            line,
        }
    })?;
    if entries.is_empty() {
        return Err(CredentialsError::EmptyRealm {
            path: path.to_path_buf(),
            realm: realm.to_owned(),
        });
    }
    Ok(entries)
}

/// Parses credentials text, returning the 1-based number of the first bad
/// line on failure.
fn parse_credentials(contents: &str, realm: &str) -> Result<Vec<AuthEntry>, usize> {
    let mut entries = Vec::new();
    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.splitn(3, ':');
        let (Some(username), Some(entry_realm), Some(hash)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(index + 1);
        };
        if username.is_empty() || hash.is_empty() {
            return Err(index + 1);
        }
        if entry_realm == realm {
            entries.push(AuthEntry::new(username, entry_realm, hash.to_ascii_lowercase()));
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[rstest]
    fn keeps_only_entries_for_the_realm() {
        let text = "# users\nalice:lab:ABCD\n\nbob:other:1234\ncarol:lab:ef01\n";
        let entries = parse_credentials(text, "lab").expect("valid table");
        assert_eq!(
            entries,
            vec![
                AuthEntry::new("alice", "lab", "abcd"),
                AuthEntry::new("carol", "lab", "ef01"),
            ]
        );
    }

    #[rstest]
    #[case("alice:lab\n")]
    #[case(":lab:abcd\n")]
    #[case("alice:lab:\n")]
    fn malformed_lines_report_their_number(#[case] text: &str) {
        assert_eq!(parse_credentials(text, "lab"), Err(1));
    }

    #[rstest]
    fn empty_realm_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "alice:other:abcd").expect("write entry");
        let path = Utf8Path::from_path(file.path()).expect("utf-8 path");
        let error = load_credentials(path, "lab").expect_err("no lab entries");
        assert!(matches!(error, CredentialsError::EmptyRealm { .. }));
    }

    #[rstest]
    fn unreadable_file_is_reported() {
        let error = load_credentials(Utf8Path::new("/nonexistent/gatehouse.passwd"), "lab")
            .expect_err("missing file");
        assert!(matches!(error, CredentialsError::Read { .. }));
    }
}
