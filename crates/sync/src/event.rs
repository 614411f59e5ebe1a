use comreg_manifest::{DEV_PREFIX, SyncKey};
use derive_more::Display;

const TAG_PREFIX: &str = "refs/tags/";
const BRANCH_PREFIX: &str = "refs/heads/";

/// A normalized instruction for the version index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Store the manifest found at a ref.
    Upsert {
        /// Raw `composer.json` bytes, not yet validated.
        manifest: Vec<u8>,
        version: String,
        dist_url: String,
        sync_key: SyncKey,
    },
    /// Forget whatever the ref behind this key produced.
    Remove(SyncKey),
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    #[display("tag")]
    Tag,
    #[display("branch")]
    Branch,
}

impl RefKind {
    pub const ALL: [RefKind; 2] = [RefKind::Tag, RefKind::Branch];
}

/// A tag or branch, by its short name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GitRef {
    pub kind: RefKind,
    pub name: String,
}

impl GitRef {
    pub fn tag(name: impl Into<String>) -> Self {
        Self { kind: RefKind::Tag, name: name.into() }
    }

    pub fn branch(name: impl Into<String>) -> Self {
        Self { kind: RefKind::Branch, name: name.into() }
    }

    /// Parse a fully qualified ref (`refs/tags/…` or `refs/heads/…`).
    ///
    /// Anything else (notes, pull request refs) is not a version source.
    pub fn parse(qualified: &str) -> Option<Self> {
        if let Some(name) = qualified.strip_prefix(TAG_PREFIX) {
            return (!name.is_empty()).then(|| Self::tag(name));
        }
        if let Some(name) = qualified.strip_prefix(BRANCH_PREFIX) {
            return (!name.is_empty()).then(|| Self::branch(name));
        }
        None
    }

    pub fn qualified(&self) -> String {
        match self.kind {
            RefKind::Tag => format!("{TAG_PREFIX}{}", self.name),
            RefKind::Branch => format!("{BRANCH_PREFIX}{}", self.name),
        }
    }

    /// The version label clients see: tags as-is, branches as `dev-{name}`,
    /// both lowercased.
    pub fn version_label(&self) -> String {
        match self.kind {
            RefKind::Tag => self.name.to_lowercase(),
            RefKind::Branch => format!("{DEV_PREFIX}{}", self.name.to_lowercase()),
        }
    }

    /// The stable identity of this ref in `repository`.
    ///
    /// Built from the repository and the qualified ref name, never from the
    /// version label, so renaming a ref upstream deletes one key and creates
    /// another. Repository names are case-insensitive on every supported
    /// host and are lowercased.
    pub fn sync_key(&self, repository: &str) -> SyncKey {
        SyncKey::new(format!("{}@{}", repository.to_lowercase(), self.qualified()))
    }
}
