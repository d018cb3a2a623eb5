//! Key value validation.
//!
//! Key values come from callers and get joined onto a local root directory,
//! so they must not be able to escape it.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Validate a key value and turn it into a relative path.
///
/// `..` components are resolved, but may never climb above the root. An
/// empty value (after normalization) is the root itself.
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
pub(crate) fn validate(value: &str) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in Path::new(value).components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls, so reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidArgument(format!("key contains a null byte: {value:?}")));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => {
                exn::bail!(ErrorKind::InvalidArgument(format!("key must be relative: {value:?}")))
            },
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidArgument(format!("key escapes the source root: {value:?}")));
                }
            },
        }
    }
    Ok(components.into_iter().collect())
}

/// Turn a path relative to a source root back into a `/`-separated value.
pub(crate) fn to_value(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Folder/file.pdf", "Folder/file.pdf")]
    #[case("a//b/./c", "a/b/c")]
    #[case("a/b/..", "a")]
    #[case("folder/", "folder")]
    #[case("", "")]
    #[case("./", "")]
    fn test_valid(#[case] value: &str, #[case] expected: &str) {
        assert_eq!(validate(value).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("../etc/passwd")]
    #[case("a/../../b")]
    #[case("..")]
    #[case("a\0b")]
    fn test_invalid(#[case] value: &str) {
        let err = validate(value).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidArgument(_)));
    }

    #[test]
    fn test_to_value() {
        assert_eq!(to_value(Path::new("a/b/c.txt")), "a/b/c.txt");
        assert_eq!(to_value(Path::new("./a")), "a");
        assert_eq!(to_value(Path::new("")), "");
    }
}
