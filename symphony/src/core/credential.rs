//! Token embedding for authenticated remote URLs.
//!
//! The resolved URL is a secret: anything that may reach a log line or an error
//! message must go through [`CredentialedUrl::redact`] first.

use std::fmt;

const HTTPS_SCHEME: &str = "https://";
const REDACTED: &str = "***";

/// Rewrite `https://host/...` into `https://oauth2:<token>@host/...`.
///
/// Only the leading scheme is rewritten. Input without an `https://` scheme is
/// returned unchanged, so malformed input yields a malformed (unauthenticated)
/// URL rather than an error.
pub fn resolve(url: &str, token: &str) -> String {
    match url.strip_prefix(HTTPS_SCHEME) {
        Some(rest) => format!("{HTTPS_SCHEME}oauth2:{token}@{rest}"),
        None => url.to_string(),
    }
}

/// A remote URL with an embedded credential.
///
/// `Display` and `Debug` never print the token.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialedUrl {
    url: String,
    token: String,
}

impl CredentialedUrl {
    pub fn new(repo_url: &str, token: &str) -> Self {
        Self {
            url: resolve(repo_url, token),
            token: token.to_string(),
        }
    }

    /// The authenticated URL, for handing to git only.
    pub fn expose(&self) -> &str {
        &self.url
    }

    /// Mask every occurrence of the token in `text`.
    pub fn redact(&self, text: &str) -> String {
        if self.token.is_empty() {
            return text.to_string();
        }
        text.replace(&self.token, REDACTED)
    }
}

impl fmt::Display for CredentialedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redact(&self.url))
    }
}

impl fmt::Debug for CredentialedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CredentialedUrl")
            .field(&self.redact(&self.url))
            .finish()
    }
}
