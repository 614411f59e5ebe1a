//! Bearer-token users and their package visibility rules.

use serde::{Deserialize, Serialize};

use crate::Config;

/// A client allowed to read the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub token: String,
    /// Packages the user may see. Empty means everything.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "type")]
    pub kind: RuleKind,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    BeginsWith,
    EndsWith,
    Contains,
    Equals,
}

impl Rule {
    pub fn matches(&self, package: &str) -> bool {
        match self.kind {
            RuleKind::BeginsWith => package.starts_with(&self.value),
            RuleKind::EndsWith => package.ends_with(&self.value),
            RuleKind::Contains => package.contains(&self.value),
            RuleKind::Equals => package == self.value,
        }
    }
}

impl User {
    /// The user every request is treated as when no users are configured.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Whether any rule admits `package`; a user without rules sees all.
    pub fn can_access(&self, package: &str) -> bool {
        self.rules.is_empty() || self.rules.iter().any(|rule| rule.matches(package))
    }
}

impl Config {
    /// Resolve the user behind an `Authorization` header value.
    ///
    /// With no configured users access is open and [`User::anonymous`] is
    /// returned for any header, including none. Otherwise the bearer token
    /// must equal a configured token; tokens are compared through their
    /// BLAKE3 digests, whose equality is constant-time.
    pub fn authenticate(&self, authorization: Option<&str>) -> Option<User> {
        if self.users.is_empty() {
            return Some(User::anonymous());
        }
        let header = authorization?;
        let token = header.strip_prefix("Bearer ").or_else(|| header.strip_prefix("bearer ")).unwrap_or(header);
        let presented = blake3::hash(token.as_bytes());
        let user = self.users.iter().find(|user| blake3::hash(user.token.as_bytes()) == presented);
        if user.is_none() {
            tracing::debug!("bearer token did not match any configured user");
        }
        user.cloned()
    }
}
