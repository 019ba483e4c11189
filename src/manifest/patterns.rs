use serde::Serialize;

use crate::error::{CoreError, CoreResult};

const SCHEMES: [&str; 2] = ["https://", "http://"];

/// HTTP and HTTPS origins for a portal host, plus their wildcard patterns.
/// Both are always injected together.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UrlPatterns {
    pub http_origin: String,
    pub https_origin: String,
}

impl UrlPatterns {
    pub fn http_pattern(&self) -> String {
        format!("{}/*", self.http_origin)
    }

    pub fn https_pattern(&self) -> String {
        format!("{}/*", self.https_origin)
    }

    pub fn patterns(&self) -> [String; 2] {
        [self.http_pattern(), self.https_pattern()]
    }
}

/// Turn whatever the user typed into origin patterns.
///
/// One leading `http://` or `https://` (any case) and all trailing slashes
/// are removed; the rest is taken verbatim as the host.
pub fn normalize_url(input: &str) -> CoreResult<UrlPatterns> {
    let trimmed = input.trim();
    let host = strip_scheme(trimmed).trim_end_matches('/');
    if host.is_empty() {
        return Err(CoreError::EmptyInput {
            field: "portal URL",
        });
    }
    Ok(UrlPatterns {
        http_origin: format!("http://{host}"),
        https_origin: format!("https://{host}"),
    })
}

fn strip_scheme(input: &str) -> &str {
    for scheme in SCHEMES {
        if let Some(prefix) = input.get(..scheme.len())
            && prefix.eq_ignore_ascii_case(scheme)
        {
            return &input[scheme.len()..];
        }
    }
    input
}
