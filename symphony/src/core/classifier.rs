//! Deterministic classification of network failures as transient or terminal.
//!
//! - Git push: transient when stderr matches a known connection/timeout
//!   signature. Auth failures, rejected refs and missing repositories are
//!   terminal.
//! - Hosting API: transient for HTTP 429, any 5xx, and 403 responses that
//!   carry a rate-limit message.

use std::sync::LazyLock;

use regex::Regex;

/// Retry class of a failed network operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Terminal,
}

static TRANSIENT_GIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        could\ not\ resolve\ host
        | connection\ (?:timed\ out|refused|reset)
        | operation\ timed\ out
        | timed\ out
        | network\ is\ unreachable
        | remote\ end\ hung\ up\ unexpectedly
        | early\ eof
        | rpc\ failed
        | gnutls_handshake\(\)\ failed
        | ssl_(?:read|connect|error)
        | http\ 5\d\d
        | the\ requested\ url\ returned\ error:\ 5\d\d
        ",
    )
    .expect("transient git pattern is valid")
});

static TERMINAL_GIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        authentication\ failed
        | permission\ denied
        | repository\ not\ found
        | \[rejected\]
        | \[remote\ rejected\]
        | the\ requested\ url\ returned\ error:\ 4\d\d
        ",
    )
    .expect("terminal git pattern is valid")
});

static RATE_LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)rate\s*limit").expect("rate limit pattern is valid"));

/// Classify a failed `git push` from its stderr.
///
/// Terminal signatures win over transient ones, and unknown failures are
/// terminal: retrying an unexplained rejection only delays the report.
pub fn classify_git_failure(stderr: &str) -> FailureClass {
    if TERMINAL_GIT_RE.is_match(stderr) {
        FailureClass::Terminal
    } else if TRANSIENT_GIT_RE.is_match(stderr) {
        FailureClass::Transient
    } else {
        FailureClass::Terminal
    }
}

/// Classify a non-success HTTP response from the hosting API.
pub fn classify_http_status(status: u16, body: &str) -> FailureClass {
    match status {
        429 => FailureClass::Transient,
        500..=599 => FailureClass::Transient,
        403 if RATE_LIMIT_RE.is_match(body) => FailureClass::Transient,
        _ => FailureClass::Terminal,
    }
}
