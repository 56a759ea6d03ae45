//! Interned tag sets.
//!
//! This module provides:
//! - [`TagSet`] — an immutable, canonicalized set of string tags
//! - [`TagRegistry`] — a session-owned interning registry
//!
//! The registry is an explicit component: it is created by whoever owns the
//! session (a reconstruction session, a collector) and passed to the codec
//! wherever tags are decoded. Registering the same tags twice yields handles
//! that share one allocation, so tag-heavy streams do not balloon memory.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Serialize, Serializer};

#[derive(Debug)]
struct TagSetInner {
    tags: Vec<String>,
    canonical: String,
}

/// An immutable, interned set of string tags.
///
/// The canonical form — tags trimmed, deduplicated, sorted, and joined with
/// `", "` — is the wire representation. Two `TagSet`s compare equal iff their
/// canonical forms are equal.
#[derive(Debug, Clone)]
pub struct TagSet(Arc<TagSetInner>);

impl TagSet {
    /// Returns the tags in canonical (sorted) order.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.0.tags
    }

    /// Returns the canonical string form used on the wire.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.0.canonical
    }

    /// Returns the number of tags in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.tags.len()
    }

    /// Returns true if the set contains no tags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.tags.is_empty()
    }

    /// Returns true if the set contains the given tag.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.0.tags.iter().any(|t| t == tag)
    }
}

impl PartialEq for TagSet {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.canonical == other.0.canonical
    }
}

impl Eq for TagSet {}

impl std::hash::Hash for TagSet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.canonical.hash(state);
    }
}

impl std::fmt::Display for TagSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.canonical)
    }
}

impl Serialize for TagSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.canonical)
    }
}

/// Interning registry for [`TagSet`]s.
///
/// Owned by the session; cheap to share behind an `Arc` when the codec runs
/// on another thread.
#[derive(Debug, Default)]
pub struct TagRegistry {
    sets: RwLock<HashMap<String, TagSet>>,
}

impl TagRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a comma-separated tag list, returning the interned set.
    ///
    /// The input is canonicalized first (trim, drop empties, sort, dedup), so
    /// `"b, a"`, `"a,b"` and `"a, b, b"` all resolve to the same set.
    pub fn register(&self, spec: &str) -> TagSet {
        let tags = Self::canonicalize(spec);
        let canonical = tags.join(", ");

        if let Some(existing) = self.sets.read().get(&canonical) {
            return existing.clone();
        }

        let set = TagSet(Arc::new(TagSetInner {
            tags,
            canonical: canonical.clone(),
        }));
        self.sets
            .write()
            .entry(canonical)
            .or_insert_with(|| set.clone())
            .clone()
    }

    /// Returns the number of distinct sets interned so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.read().len()
    }

    /// Returns true if nothing has been interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.read().is_empty()
    }

    fn canonicalize(spec: &str) -> Vec<String> {
        let mut tags: Vec<String> = spec
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_canonicalizes() {
        let registry = TagRegistry::new();
        let set = registry.register("  beta, alpha ,beta,");
        assert_eq!(set.tags(), ["alpha", "beta"]);
        assert_eq!(set.canonical(), "alpha, beta");
    }

    #[test]
    fn register_dedups_structurally() {
        let registry = TagRegistry::new();
        let a = registry.register("net, io");
        let b = registry.register("io,net");
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_spec_yields_empty_set() {
        let registry = TagRegistry::new();
        let set = registry.register("");
        assert!(set.is_empty());
        assert_eq!(set.canonical(), "");
    }

    #[test]
    fn contains_checks_exact_tag() {
        let registry = TagRegistry::new();
        let set = registry.register("alpha, beta");
        assert!(set.contains("alpha"));
        assert!(!set.contains("alph"));
    }

    #[test]
    fn separate_registries_do_not_share() {
        let a = TagRegistry::new().register("x");
        let b = TagRegistry::new().register("x");
        // Equal by value even though interned independently.
        assert_eq!(a, b);
        assert!(!Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn tag_set_serializes_as_canonical_string() {
        let registry = TagRegistry::new();
        let set = registry.register("b, a");
        let json = serde_json::to_string(&set).expect("serialize");
        assert_eq!(json, "\"a, b\"");
    }

    #[test]
    fn tag_set_display_matches_canonical() {
        let registry = TagRegistry::new();
        let set = registry.register("one, two");
        assert_eq!(set.to_string(), set.canonical());
    }

    #[test]
    fn tag_set_hash_by_canonical() {
        use std::collections::HashSet;
        let registry = TagRegistry::new();
        let mut seen = HashSet::new();
        seen.insert(registry.register("a, b"));
        seen.insert(registry.register("b, a"));
        assert_eq!(seen.len(), 1);
    }
}
