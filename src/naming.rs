//! Bucket name generation
//!
//! Bucket names are global identities: two records sharing a name would silently
//! alias the same cloud bucket. Names are therefore drawn from an injected
//! generator and each generated value is handed out exactly once.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::Error;

/// Source of fresh bucket names
pub trait NameGenerator: Send + Sync {
    /// Return a name that this generator has never returned before
    fn next_name(&self) -> String;
}

/// Names of the form `<prefix>-<n>` from a counter starting at 1
///
/// The counter lives in the generator instance, so uniqueness holds for the
/// lifetime of one controller process. After a restart the sequence starts
/// again; a clashing record is then rejected by the store and skipped.
pub struct SequentialNames {
    prefix: String,
    next: AtomicU64,
}

impl SequentialNames {
    /// Create a generator whose first name is `<prefix>-1`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl NameGenerator for SequentialNames {
    fn next_name(&self) -> String {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, id)
    }
}

/// Names of the form `<prefix>-<uuid>`, unique across restarts and replicas
pub struct UuidNames {
    prefix: String,
}

impl UuidNames {
    /// Create a generator using the given prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl NameGenerator for UuidNames {
    fn next_name(&self) -> String {
        format!("{}-{}", self.prefix, uuid::Uuid::new_v4().simple())
    }
}

/// Longest name S3 accepts
const MAX_BUCKET_NAME_LEN: usize = 63;

/// Characters a uuid suffix adds to a prefix (`-` plus 32 hex digits)
pub const UUID_SUFFIX_LEN: usize = 33;

/// Validate a bucket name against the S3 naming rules
///
/// Names must be 3-63 characters of lowercase letters, digits, `-` and `.`,
/// and must start and end with a letter or digit.
pub fn validate_bucket_name(name: &str) -> Result<(), Error> {
    if name.len() < 3 || name.len() > MAX_BUCKET_NAME_LEN {
        return Err(Error::validation(format!(
            "bucket name '{}' must be 3-{} characters",
            name, MAX_BUCKET_NAME_LEN
        )));
    }

    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.'))
    {
        return Err(Error::validation(format!(
            "bucket name '{}' contains invalid character '{}'",
            name, c
        )));
    }

    let alphanumeric = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let starts_ok = name.chars().next().is_some_and(alphanumeric);
    let ends_ok = name.chars().next_back().is_some_and(alphanumeric);
    if !starts_ok || !ends_ok {
        return Err(Error::validation(format!(
            "bucket name '{}' must start and end with a letter or digit",
            name
        )));
    }

    Ok(())
}

/// Validate a name prefix so that every generated name stays valid
///
/// `suffix_len` is the longest suffix the chosen generator appends.
pub fn validate_prefix(prefix: &str, suffix_len: usize) -> Result<(), Error> {
    if prefix.len() + suffix_len > MAX_BUCKET_NAME_LEN {
        return Err(Error::validation(format!(
            "bucket prefix '{}' leaves no room for a {}-character suffix",
            prefix, suffix_len
        )));
    }
    validate_bucket_name(&format!("{}-0", prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    /// Story: the group controller never hands out the same name twice
    #[test]
    fn story_sequential_names_never_repeat() {
        let names = SequentialNames::new("my-s3-bucket");
        assert_eq!(names.next_name(), "my-s3-bucket-1");
        assert_eq!(names.next_name(), "my-s3-bucket-2");

        let seen: HashSet<String> = (0..500).map(|_| names.next_name()).collect();
        assert_eq!(seen.len(), 500);
    }

    #[test]
    fn test_sequential_names_unique_across_threads() {
        let names = Arc::new(SequentialNames::new("bucket"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let names = names.clone();
                std::thread::spawn(move || (0..250).map(|_| names.next_name()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for name in handle.join().unwrap() {
                assert!(seen.insert(name), "duplicate name generated");
            }
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_uuid_names_are_valid_and_distinct() {
        let names = UuidNames::new("my-s3-bucket");
        let a = names.next_name();
        let b = names.next_name();
        assert_ne!(a, b);
        assert!(a.starts_with("my-s3-bucket-"));
        assert_eq!(a.len(), "my-s3-bucket".len() + UUID_SUFFIX_LEN);
        assert!(validate_bucket_name(&a).is_ok());
    }

    mod validation {
        use super::*;

        #[test]
        fn test_accepts_typical_names() {
            assert!(validate_bucket_name("my-s3-bucket-1").is_ok());
            assert!(validate_bucket_name("logs.example.com").is_ok());
            assert!(validate_bucket_name("abc").is_ok());
        }

        #[test]
        fn test_rejects_bad_length() {
            assert!(validate_bucket_name("ab").is_err());
            assert!(validate_bucket_name(&"a".repeat(64)).is_err());
            assert!(validate_bucket_name(&"a".repeat(63)).is_ok());
        }

        #[test]
        fn test_rejects_invalid_characters() {
            let err = validate_bucket_name("My_Bucket").unwrap_err();
            assert!(err.to_string().contains("invalid character"));
        }

        #[test]
        fn test_rejects_bad_edges() {
            assert!(validate_bucket_name("-bucket").is_err());
            assert!(validate_bucket_name("bucket.").is_err());
        }

        #[test]
        fn test_prefix_must_leave_room_for_suffix() {
            assert!(validate_prefix("my-s3-bucket", UUID_SUFFIX_LEN).is_ok());
            assert!(validate_prefix(&"a".repeat(40), UUID_SUFFIX_LEN).is_err());
            assert!(validate_prefix("Bad", 20).is_err());
        }
    }
}
