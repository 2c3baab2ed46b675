//! Content store: opaque handles for text that is too large to inline.
//!
//! Every blob gets a `handle:<n>` with `n` drawn from a per-store counter
//! that only ever moves forward. Blobs are immutable, so a handle resolves
//! to the same text for the lifetime of the store. Models may also bind
//! their own labels (`ref:<label>`) to stored content.
//!
//! A store belongs to exactly one process. Fork and spawn copy entries into
//! the child's store; after the copy the two stores evolve independently.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ContentError;

/// Opaque identifier of a stored blob, rendered as `handle:<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHandle(u64);

impl ContentHandle {
    pub const PREFIX: &'static str = "handle:";

    pub fn sequence(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

impl FromStr for ContentHandle {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        raw.strip_prefix(Self::PREFIX)
            .and_then(|n| n.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .map(ContentHandle)
            .ok_or_else(|| ContentError::InvalidArgument(format!("'{raw}' is not a valid handle")))
    }
}

impl TryFrom<String> for ContentHandle {
    type Error = ContentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHandle> for String {
    fn from(handle: ContentHandle) -> Self {
        handle.to_string()
    }
}

/// Anything a tool argument may use to point at stored content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentRef {
    /// `handle:<n>`
    Handle(ContentHandle),
    /// `ref:<label>`
    Label(String),
}

impl ContentRef {
    pub const LABEL_PREFIX: &'static str = "ref:";
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(h) => write!(f, "{h}"),
            Self::Label(l) => write!(f, "{}{l}", Self::LABEL_PREFIX),
        }
    }
}

impl FromStr for ContentRef {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if let Some(label) = raw.strip_prefix(Self::LABEL_PREFIX) {
            validate_label(label)?;
            return Ok(Self::Label(label.to_string()));
        }
        raw.parse().map(Self::Handle)
    }
}

/// Labels are restricted to `[A-Za-z0-9_.-]`, 1 to 64 characters.
pub fn validate_label(label: &str) -> Result<(), ContentError> {
    let valid = !label.is_empty()
        && label.len() <= 64
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ContentError::InvalidArgument(format!(
            "'{label}' is not a valid reference label"
        )))
    }
}

/// In-memory handle → blob registry.
#[derive(Debug, Clone)]
pub struct ContentStore {
    /// Sequence number the next `put` will use
    next: u64,
    blobs: BTreeMap<ContentHandle, Arc<str>>,
    labels: BTreeMap<String, ContentHandle>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self {
            next: 1,
            blobs: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    /// Store a blob under a fresh handle.
    pub fn put(&mut self, blob: impl Into<String>) -> ContentHandle {
        let handle = ContentHandle(self.next);
        self.next += 1;
        let blob: String = blob.into();
        debug!(%handle, chars = blob.chars().count(), "Stored content");
        self.blobs.insert(handle, Arc::from(blob));
        handle
    }

    /// Look up a blob by handle.
    pub fn get(&self, handle: ContentHandle) -> Result<&str, ContentError> {
        self.blobs
            .get(&handle)
            .map(|b| b.as_ref())
            .ok_or_else(|| ContentError::NotFound(handle.to_string()))
    }

    pub fn contains(&self, handle: ContentHandle) -> bool {
        self.blobs.contains_key(&handle)
    }

    /// Resolve a parsed reference to its handle and content.
    pub fn resolve_ref(&self, reference: &ContentRef) -> Result<(ContentHandle, &str), ContentError> {
        let handle = match reference {
            ContentRef::Handle(h) => *h,
            ContentRef::Label(label) => *self
                .labels
                .get(label)
                .ok_or_else(|| ContentError::NotFound(reference.to_string()))?,
        };
        Ok((handle, self.get(handle)?))
    }

    /// Parse and resolve `handle:<n>` or `ref:<label>`.
    pub fn resolve(&self, reference: &str) -> Result<(ContentHandle, &str), ContentError> {
        self.resolve_ref(&reference.parse()?)
    }

    /// Store a blob and bind `ref:<label>` to it.
    ///
    /// Rebinding an existing label points it at the new handle; the handle it
    /// previously named keeps resolving to its original content.
    pub fn label(&mut self, label: &str, blob: impl Into<String>) -> Result<ContentHandle, ContentError> {
        validate_label(label)?;
        let handle = self.put(blob);
        if let Some(previous) = self.labels.insert(label.to_string(), handle) {
            debug!(label, %previous, %handle, "Rebound reference label");
        }
        Ok(handle)
    }

    /// Labels currently bound, in lexical order.
    pub fn labels(&self) -> impl Iterator<Item = (&str, ContentHandle)> {
        self.labels.iter().map(|(l, h)| (l.as_str(), *h))
    }

    /// Drop a blob. Its handle is never issued again.
    pub fn remove(&mut self, handle: ContentHandle) -> bool {
        let removed = self.blobs.remove(&handle).is_some();
        if removed {
            self.labels.retain(|_, h| *h != handle);
        }
        removed
    }

    /// All live handles in ascending order.
    pub fn handles(&self) -> Vec<ContentHandle> {
        self.blobs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Copy every entry (and label) into `other`, keeping handle values.
    ///
    /// `other`'s counter is advanced past the highest handle ever issued here,
    /// so later `put`s on either side can never collide. A handle that already
    /// names different content in `other` is left untouched there.
    pub fn copy_into(&self, other: &mut ContentStore) {
        for (handle, blob) in &self.blobs {
            other.insert_copied(*handle, blob);
        }
        for (label, handle) in &self.labels {
            if other.blobs.contains_key(handle) {
                other.labels.insert(label.clone(), *handle);
            }
        }
        other.next = other.next.max(self.next);
    }

    /// Copy only the referenced entries into `other`, keeping handle values.
    ///
    /// Every reference is resolved before anything is copied, so a missing
    /// reference leaves `other` unchanged.
    pub fn copy_refs_into(&self, refs: &[ContentRef], other: &mut ContentStore) -> Result<(), ContentError> {
        let resolved = refs
            .iter()
            .map(|r| self.resolve_ref(r).map(|(h, _)| (r, h)))
            .collect::<Result<Vec<_>, _>>()?;

        for (reference, handle) in resolved {
            if let Some(blob) = self.blobs.get(&handle) {
                other.insert_copied(handle, blob);
            }
            if let ContentRef::Label(label) = reference {
                other.labels.insert(label.clone(), handle);
            }
            other.next = other.next.max(handle.0 + 1);
        }
        Ok(())
    }

    fn insert_copied(&mut self, handle: ContentHandle, blob: &Arc<str>) {
        match self.blobs.get(&handle) {
            Some(existing) if existing.as_ref() != blob.as_ref() => {
                warn!(%handle, "Destination already holds different content, keeping it");
            }
            Some(_) => {}
            None => {
                self.blobs.insert(handle, Arc::clone(blob));
            }
        }
    }
}

impl Default for ContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_sequential_and_render() {
        let mut store = ContentStore::new();
        let a = store.put("alpha");
        let b = store.put("beta");
        assert_eq!(a.to_string(), "handle:1");
        assert_eq!(b.to_string(), "handle:2");
        assert_eq!(store.get(a).unwrap(), "alpha");
        assert_eq!(store.get(b).unwrap(), "beta");
    }

    #[test]
    fn unknown_handle_is_not_found() {
        let store = ContentStore::new();
        let err = store.resolve("handle:3").unwrap_err();
        assert_eq!(err, ContentError::NotFound("handle:3".into()));
    }

    #[test]
    fn removed_handles_are_never_reissued() {
        let mut store = ContentStore::new();
        let a = store.put("one");
        assert!(store.remove(a));
        let b = store.put("two");
        assert_ne!(a, b);
        assert!(store.get(a).is_err());
        assert_eq!(store.get(b).unwrap(), "two");
    }

    #[test]
    fn handle_stability_across_many_puts() {
        let mut store = ContentStore::new();
        let first = store.put("stable");
        let mut seen = vec![first];
        for i in 0..100 {
            let h = store.put(format!("blob {i}"));
            assert!(!seen.contains(&h));
            seen.push(h);
        }
        assert_eq!(store.get(first).unwrap(), "stable");
    }

    #[test]
    fn parse_references() {
        assert_eq!(
            "handle:12".parse::<ContentRef>().unwrap(),
            ContentRef::Handle(ContentHandle(12))
        );
        assert_eq!(
            " ref:summary_v2 ".parse::<ContentRef>().unwrap(),
            ContentRef::Label("summary_v2".into())
        );
        assert!("handle:0".parse::<ContentRef>().is_err());
        assert!("handle:x".parse::<ContentRef>().is_err());
        assert!("ref:".parse::<ContentRef>().is_err());
        assert!("ref:has space".parse::<ContentRef>().is_err());
        assert!("fd:1".parse::<ContentRef>().is_err());
    }

    #[test]
    fn labels_resolve_and_rebind() {
        let mut store = ContentStore::new();
        let first = store.label("draft", "v1").unwrap();
        assert_eq!(store.resolve("ref:draft").unwrap(), (first, "v1"));

        let second = store.label("draft", "v2").unwrap();
        assert_ne!(first, second);
        assert_eq!(store.resolve("ref:draft").unwrap().1, "v2");
        assert_eq!(store.get(first).unwrap(), "v1");
    }

    #[test]
    fn copy_into_preserves_handles_and_advances_counter() {
        let mut parent = ContentStore::new();
        let a = parent.put("a");
        let b = parent.put("b");
        parent.remove(b);
        parent.label("note", "n").unwrap();

        let mut child = ContentStore::new();
        parent.copy_into(&mut child);

        assert_eq!(child.get(a).unwrap(), "a");
        assert_eq!(child.resolve("ref:note").unwrap().1, "n");
        let fresh = child.put("child only");
        assert_eq!(fresh.sequence(), 4);
        assert!(parent.get(fresh).is_err());
    }

    #[test]
    fn copies_are_independent() {
        let mut parent = ContentStore::new();
        parent.put("shared");
        let mut child = ContentStore::new();
        parent.copy_into(&mut child);

        let p = parent.put("parent later");
        let c = child.put("child later");
        assert_eq!(p, c);
        assert_eq!(parent.get(p).unwrap(), "parent later");
        assert_eq!(child.get(c).unwrap(), "child later");
    }

    #[test]
    fn copy_refs_into_is_all_or_nothing() {
        let mut parent = ContentStore::new();
        let a = parent.put("a");
        parent.put("b");
        let c = parent.put("c");

        let mut child = ContentStore::new();
        let missing = vec![ContentRef::Handle(a), "handle:99".parse().unwrap()];
        assert!(parent.copy_refs_into(&missing, &mut child).is_err());
        assert!(child.is_empty());

        parent
            .copy_refs_into(&[ContentRef::Handle(c)], &mut child)
            .unwrap();
        assert_eq!(child.len(), 1);
        assert_eq!(child.get(c).unwrap(), "c");
        assert_eq!(child.put("next").sequence(), 4);
    }

    #[test]
    fn conflicting_copy_keeps_destination_content() {
        let mut parent = ContentStore::new();
        parent.put("parent");
        let mut other = ContentStore::new();
        let h = other.put("other");
        parent.copy_into(&mut other);
        assert_eq!(other.get(h).unwrap(), "other");
    }

    #[test]
    fn handle_serde_uses_string_form() {
        let json = serde_json::to_string(&ContentHandle(5)).unwrap();
        assert_eq!(json, "\"handle:5\"");
        let back: ContentHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sequence(), 5);
    }
}
