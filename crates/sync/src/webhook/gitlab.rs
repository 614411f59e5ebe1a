use exn::ResultExt;
use serde::Deserialize;

use super::{PushEvent, Webhook, required_header};
use crate::GitRef;
use crate::error::{ErrorKind, Result};

const EVENT_HEADER: &str = "X-Gitlab-Event";
const TOKEN_HEADER: &str = "X-Gitlab-Token";
const PUSH_EVENTS: [&str; 2] = ["Push Hook", "Tag Push Hook"];

#[derive(Deserialize)]
struct Payload {
    #[serde(rename = "ref")]
    reference: String,
    after: String,
    #[serde(default)]
    checkout_sha: Option<String>,
    project: Project,
}

#[derive(Deserialize)]
struct Project {
    path_with_namespace: String,
}

/// Parse a GitLab delivery.
///
/// With a non-empty `secret` the `X-Gitlab-Token` header must equal it.
/// GitLab has no explicit deletion flag: a push whose `after` commit is all
/// zeros removed the ref.
pub fn parse_push(webhook: &Webhook, secret: &str) -> Result<Option<PushEvent>> {
    if !secret.is_empty() {
        let token = required_header(webhook, TOKEN_HEADER)?;
        // Digest equality is constant-time.
        if blake3::hash(token.as_bytes()) != blake3::hash(secret.as_bytes()) {
            exn::bail!(ErrorKind::InvalidSignature);
        }
    }
    let event = required_header(webhook, EVENT_HEADER)?;
    if !PUSH_EVENTS.contains(&event) {
        tracing::debug!(event, "ignoring non-push GitLab event");
        return Ok(None);
    }
    let payload: Payload = serde_json::from_slice(webhook.body()).or_raise(|| ErrorKind::MalformedPayload)?;
    let Some(git_ref) = GitRef::parse(&payload.reference) else {
        tracing::debug!(reference = %payload.reference, "ignoring push to a non-version ref");
        return Ok(None);
    };
    let deleted = is_null_commit(&payload.after);
    let commit = match payload.checkout_sha {
        Some(sha) if !deleted && !sha.is_empty() => sha,
        _ => payload.after,
    };
    Ok(Some(PushEvent { repository: payload.project.path_with_namespace, git_ref, commit, deleted }))
}

fn is_null_commit(sha: &str) -> bool {
    !sha.is_empty() && sha.bytes().all(|b| b == b'0')
}
