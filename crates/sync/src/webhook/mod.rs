//! Push-webhook payload parsing and validation.
//!
//! Each supported code host signs or authenticates its deliveries
//! differently; the parsers here verify that first, then reduce the payload to
//! a [`PushEvent`]. Anything that is not a push to a tag or branch parses to
//! `None`.

mod github;
mod gitlab;

pub use self::github::parse_push as parse_github_push;
pub use self::gitlab::parse_push as parse_gitlab_push;

use comreg_config::ProviderKind;
use std::collections::HashMap;

use crate::GitRef;
use crate::error::{ErrorKind, Result};

/// An incoming webhook delivery: request headers plus the raw body.
///
/// Header names are matched case-insensitively. A header holds a single
/// value: setting it again replaces the previous one, so for multi-valued
/// headers only the last value is kept.
#[derive(Debug, Clone, Default)]
pub struct Webhook {
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl Webhook {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self { headers: HashMap::new(), body: body.into() }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// A validated push to a single ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    /// Repository identity as the host names it, e.g. `acme/widget`.
    pub repository: String,
    pub git_ref: GitRef,
    /// The commit the ref now points at. Meaningless when `deleted`.
    pub commit: String,
    pub deleted: bool,
}

/// Parse a delivery in the format of `kind`, checking it against `secret`
/// (an empty secret disables the check).
///
/// Only code hosts send push deliveries. Custom packages arrive as uploads
/// through [`CustomProvider`](crate::CustomProvider) instead.
pub fn parse_push(kind: ProviderKind, webhook: &Webhook, secret: &str) -> Result<Option<PushEvent>> {
    match kind {
        ProviderKind::Github => parse_github_push(webhook, secret),
        ProviderKind::Gitlab => parse_gitlab_push(webhook, secret),
        ProviderKind::Shopware | ProviderKind::Custom => exn::bail!(ErrorKind::UnsupportedProvider(kind.to_string())),
    }
}

fn required_header<'a>(webhook: &'a Webhook, name: &'static str) -> Result<&'a str> {
    match webhook.header(name) {
        Some(value) => Ok(value),
        None => exn::bail!(ErrorKind::MissingHeader(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_case_insensitive() {
        let webhook = Webhook::new("{}").with_header("X-GitHub-Event", "push");
        assert_eq!(webhook.header("x-github-event"), Some("push"));
        assert_eq!(webhook.header("X-GITHUB-EVENT"), Some("push"));
        assert_eq!(webhook.header("x-gitlab-event"), None);
    }

    #[test]
    fn test_repeated_header_keeps_last_value() {
        let webhook = Webhook::new("{}").with_header("X-Gitlab-Token", "first").with_header("x-gitlab-token", "second");
        assert_eq!(webhook.header("X-Gitlab-Token"), Some("second"));
    }

    #[test]
    fn test_unsupported_kinds() {
        let err = parse_push(ProviderKind::Shopware, &Webhook::new("{}"), "").unwrap_err();
        assert_eq!(*err, ErrorKind::UnsupportedProvider("shopware".to_string()));
    }
}
