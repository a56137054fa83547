//! Credential list parsing
//!
//! The list holds one `login:password` pair per line. Blank lines and lines
//! starting with `#` are ignored; everything after the first `:` is the
//! password, so passwords may contain colons.

use super::normalize_name;

/// One parsed credential line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub login: String,
    pub password: String,
}

impl Credential {
    /// Case-insensitive account key for this login
    pub fn key(&self) -> String {
        normalize_name(&self.login)
    }
}

/// Parse a credential list, skipping malformed lines with a warning.
pub fn parse_credentials(text: &str) -> Vec<Credential> {
    let mut credentials = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match line.split_once(':') {
            Some((login, password)) if !login.trim().is_empty() && !password.is_empty() => {
                credentials.push(Credential {
                    login: login.trim().to_string(),
                    password: password.to_string(),
                });
            }
            _ => {
                tracing::warn!(line = index + 1, "Skipping malformed credential line");
            }
        }
    }

    credentials
}
