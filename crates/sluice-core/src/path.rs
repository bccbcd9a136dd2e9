//! Canonical provider paths

use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated path inside a provider.
///
/// Always absolute (`/` prefixed). A trailing `/` marks a directory-shaped
/// path; this is preserved exactly as requested because directory handling
/// (listing, delete rejection) keys off it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderPath {
    raw: String,
}

impl ProviderPath {
    /// Provider root
    pub fn root() -> Self {
        Self { raw: "/".to_string() }
    }

    /// Parse a request path.
    ///
    /// Empty input and runs of separators collapse into a single `/`. Relative
    /// segments (`.`/`..`) and NUL bytes are rejected.
    pub fn parse(input: &str) -> Result<Self> {
        if input.contains('\0') {
            return Err(StorageError::Validation(
                "path must not contain NUL bytes".to_string(),
            ));
        }

        let is_dir = input.is_empty() || input.ends_with('/');
        let mut segments = Vec::new();
        for segment in input.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(StorageError::Validation(format!(
                    "relative segment '{segment}' not allowed in path"
                )));
            }
            segments.push(segment);
        }

        if segments.is_empty() {
            return Ok(Self::root());
        }

        let mut raw = format!("/{}", segments.join("/"));
        if is_dir {
            raw.push('/');
        }
        Ok(Self { raw })
    }

    /// The canonical path string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the path denotes a directory (trailing separator)
    pub fn is_dir(&self) -> bool {
        self.raw.ends_with('/')
    }

    /// Whether this is the provider root
    pub fn is_root(&self) -> bool {
        self.raw == "/"
    }

    /// Final path segment, empty for the root
    pub fn name(&self) -> &str {
        self.raw
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    /// Path without its leading separator, as backends key objects
    pub fn object_key(&self) -> &str {
        self.raw.trim_start_matches('/')
    }
}

impl fmt::Display for ProviderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for ProviderPath {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ProviderPath> for String {
    fn from(path: ProviderPath) -> Self {
        path.raw
    }
}

/// Build a canonical path from identifying segments.
///
/// Pure: the same segments always produce the same string.
pub fn build_path<'a>(segments: impl IntoIterator<Item = &'a str>, is_dir: bool) -> String {
    let joined = segments
        .into_iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    match (joined.is_empty(), is_dir) {
        (true, _) => "/".to_string(),
        (false, true) => format!("/{joined}/"),
        (false, false) => format!("/{joined}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("", "/")]
    #[case("/", "/")]
    #[case("a/b/z", "/a/b/z")]
    #[case("/a//b/z", "/a/b/z")]
    #[case("folder/", "/folder/")]
    #[case("//folder//", "/folder/")]
    fn test_parse_canonicalizes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(ProviderPath::parse(input).unwrap().as_str(), expected);
    }

    #[rstest]
    #[case("../etc/passwd")]
    #[case("/a/./b")]
    #[case("/a/\0")]
    fn test_parse_rejects(#[case] input: &str) {
        assert!(matches!(
            ProviderPath::parse(input),
            Err(StorageError::Validation(_))
        ));
    }

    #[test]
    fn test_directory_detection() {
        assert!(ProviderPath::parse("folder/").unwrap().is_dir());
        assert!(!ProviderPath::parse("folder").unwrap().is_dir());
        assert!(ProviderPath::root().is_dir());
    }

    #[test]
    fn test_name_and_object_key() {
        let path = ProviderPath::parse("/a/b/z").unwrap();
        assert_eq!(path.name(), "z");
        assert_eq!(path.object_key(), "a/b/z");

        let dir = ProviderPath::parse("/a/b/").unwrap();
        assert_eq!(dir.name(), "b");
        assert_eq!(dir.object_key(), "a/b/");

        assert_eq!(ProviderPath::root().name(), "");
    }

    #[test]
    fn test_build_path() {
        assert_eq!(build_path(["12"], false), "/12");
        assert_eq!(build_path(["photos/"], true), "/photos/");
        assert_eq!(build_path([""], true), "/");
    }

    proptest! {
        #[test]
        fn parse_is_idempotent(segments in proptest::collection::vec("[a-z0-9_-]{1,8}", 0..5), dir in any::<bool>()) {
            let input = format!("{}{}", segments.join("/"), if dir { "/" } else { "" });
            let once = ProviderPath::parse(&input).unwrap();
            let twice = ProviderPath::parse(once.as_str()).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
