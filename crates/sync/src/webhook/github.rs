use exn::{OptionExt, ResultExt};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::{PushEvent, Webhook, required_header};
use crate::GitRef;
use crate::error::{ErrorKind, Result};

type HmacSha256 = Hmac<Sha256>;

const EVENT_HEADER: &str = "X-GitHub-Event";
const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Deserialize)]
struct Payload {
    #[serde(rename = "ref")]
    reference: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    repository: Repository,
}

#[derive(Deserialize)]
struct Repository {
    full_name: String,
}

/// Parse a GitHub delivery.
///
/// With a non-empty `secret` the `X-Hub-Signature-256` header must carry the
/// HMAC-SHA256 of the body. Events other than `push` (`ping` included) parse
/// to `None`.
pub fn parse_push(webhook: &Webhook, secret: &str) -> Result<Option<PushEvent>> {
    if !secret.is_empty() {
        verify_signature(webhook, secret)?;
    }
    let event = required_header(webhook, EVENT_HEADER)?;
    if event != "push" {
        tracing::debug!(event, "ignoring non-push GitHub event");
        return Ok(None);
    }
    let payload: Payload = serde_json::from_slice(webhook.body()).or_raise(|| ErrorKind::MalformedPayload)?;
    let Some(git_ref) = GitRef::parse(&payload.reference) else {
        tracing::debug!(reference = %payload.reference, "ignoring push to a non-version ref");
        return Ok(None);
    };
    Ok(Some(PushEvent {
        repository: payload.repository.full_name,
        git_ref,
        commit: payload.after,
        deleted: payload.deleted,
    }))
}

fn verify_signature(webhook: &Webhook, secret: &str) -> Result<()> {
    let header = required_header(webhook, SIGNATURE_HEADER)?;
    let signature = header
        .strip_prefix(SIGNATURE_PREFIX)
        .and_then(|digest| hex::decode(digest).ok())
        .ok_or_raise(|| ErrorKind::InvalidSignature)?;
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok().ok_or_raise(|| ErrorKind::InvalidSignature)?;
    mac.update(webhook.body());
    // Constant-time comparison
    mac.verify_slice(&signature).ok().ok_or_raise(|| ErrorKind::InvalidSignature)
}

#[cfg(test)]
pub(crate) fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}
