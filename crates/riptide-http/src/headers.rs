//! Case-insensitive header storage and the cookie jar.
//!
//! Header keys are normalized to lowercase on insert, and lookups fold the
//! key before comparison, so `Content-Type`, `content-type`, and
//! `CONTENT-TYPE` all address the same entry. Cookies are case-sensitive.
//!
//! Lookups that miss return a reference to a shared empty string instead of
//! allocating or forcing an `Option` on every call site.

use std::collections::HashMap;

/// Shared empty value returned by missing-key lookups.
const EMPTY: &str = "";

/// Fold a header key to its canonical lowercase form.
fn fold(key: &str) -> String {
    key.to_ascii_lowercase()
}

/// Case-insensitive header map.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: HashMap<String, String>,
}

impl HeaderMap {
    /// Create an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a header. The key is lowercased first.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries.insert(fold(key.as_ref()), value.into());
    }

    /// Insert a header whose key is already lowercase.
    ///
    /// Skips the case-folding allocation for callers (the parsing layer)
    /// that hold canonical keys. Debug builds assert the precondition.
    pub fn insert_lower(&mut self, lower_key: String, value: impl Into<String>) {
        debug_assert!(lower_key.chars().all(|c| !c.is_ascii_uppercase()));
        self.entries.insert(lower_key, value.into());
    }

    /// Look up a header by any-cased key; empty string when absent.
    #[must_use]
    pub fn get(&self, key: &str) -> &str {
        self.get_lower(&fold(key))
    }

    /// Look up a header by an already-lowercased key.
    ///
    /// Callers that hold canonical keys (the parsing layer) can skip the
    /// case-folding allocation.
    #[must_use]
    pub fn get_lower(&self, lower_key: &str) -> &str {
        self.entries.get(lower_key).map_or(EMPTY, String::as_str)
    }

    /// Remove a header by any-cased key.
    pub fn remove(&mut self, key: &str) {
        self.entries.remove(&fold(key));
    }

    /// Whether a header is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&fold(key))
    }

    /// Number of stored headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(lowercase key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Remove all headers.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Case-sensitive cookie map, populated from the `Cookie` header.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    entries: HashMap<String, String>,
}

impl CookieJar {
    /// Create an empty cookie jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a cookie.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Look up a cookie; empty string when absent.
    #[must_use]
    pub fn get(&self, key: &str) -> &str {
        self.entries.get(key).map_or(EMPTY, String::as_str)
    }

    /// Number of stored cookies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the jar is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Remove all cookies.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
