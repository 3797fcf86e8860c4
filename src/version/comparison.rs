//! Lenient version comparison for upstream release tags.
//!
//! Upstream projects tag releases inconsistently: `v1.2.3`, `1.2.10`,
//! `2023-06-01`, `build-1842`, `continuous`, or a bare commit hash. Strict
//! SemVer parsing rejects most of these, so this comparator orders tags by
//! their leading numeric components instead and never fails.
//!
//! # Ordering rules
//!
//! 1. Any leading non-digit prefix is stripped (`v1.0` and `1.0` are equal).
//! 2. The numeric part is a run of digit groups joined by `.`, `-` or `_`.
//!    Groups compare numerically, and the shorter sequence is padded with zeros.
//! 3. Whatever follows the numeric part (`-beta`, `rc1`) is compared
//!    lexically, only when the numeric parts are equal.
//! 4. A tag with no digits at all (`continuous`, `nightly`) orders before
//!    every tag that has some. Such tags compare lexically among themselves.
//!
//! Each rule refines the previous one, so the result is a total order and
//! safe to hand to `sort_by`.
//!
//! # Examples
//!
//! ```rust
//! use relkeep::version::comparison::VersionComparator;
//! use std::cmp::Ordering;
//!
//! assert_eq!(VersionComparator::compare("1.2.3", "1.2.10"), Ordering::Less);
//! assert_eq!(VersionComparator::compare("v1.0", "1.0"), Ordering::Equal);
//! assert_eq!(VersionComparator::compare("2023-01-01", "2023-06-01"), Ordering::Less);
//! assert!(VersionComparator::is_newer("v2.0", "v1.9.9"));
//! ```

use std::cmp::Ordering;

/// Version comparison utilities for release tags.
pub struct VersionComparator;

/// A tag split into numeric components and trailing suffix.
#[derive(Debug, PartialEq, Eq)]
struct ParsedVersion<'a> {
    components: Vec<&'a str>,
    suffix: &'a str,
}

impl VersionComparator {
    /// Total order over version-like strings.
    ///
    /// Never fails: strings without any digits order before versioned ones
    /// and compare lexically among themselves.
    pub fn compare(a: &str, b: &str) -> Ordering {
        match (parse(a), parse(b)) {
            (Some(left), Some(right)) => compare_components(&left.components, &right.components)
                .then_with(|| left.suffix.cmp(right.suffix)),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => a.cmp(b),
        }
    }

    /// Whether `candidate` orders strictly after `current`.
    pub fn is_newer(candidate: &str, current: &str) -> bool {
        Self::compare(candidate, current) == Ordering::Greater
    }

    /// The greatest version in `versions`, if any.
    pub fn get_latest<'a, S: AsRef<str>>(versions: &'a [S]) -> Option<&'a S> {
        versions.iter().max_by(|a, b| Self::compare(a.as_ref(), b.as_ref()))
    }

    /// Pull a version number out of a file name.
    ///
    /// Returns the first numeric sequence that starts a word, e.g. `1.2.3`
    /// from `App-1.2.3-x86_64.AppImage`.
    ///
    /// ```rust
    /// use relkeep::version::comparison::VersionComparator;
    ///
    /// assert_eq!(
    ///     VersionComparator::extract_from_name("App-1.2.3-x86_64.AppImage"),
    ///     Some("1.2.3".to_string())
    /// );
    /// assert_eq!(VersionComparator::extract_from_name("App.AppImage"), None);
    /// ```
    pub fn extract_from_name(name: &str) -> Option<String> {
        let bytes = name.as_bytes();
        (0..bytes.len()).find(|&start| starts_version(bytes, start)).map(|start| {
            let end = numeric_run_end(bytes, start);
            name[start..end].to_string()
        })
    }
}

/// Whether a version number begins at `pos`: a digit at the start of a word,
/// or right after a `v` that starts a word. Digits following `<digit>_` belong
/// to architecture names like `x86_64`.
fn starts_version(bytes: &[u8], pos: usize) -> bool {
    if !bytes[pos].is_ascii_digit() {
        return false;
    }
    let word_start = |i: usize| i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
    match pos.checked_sub(1).map(|i| bytes[i]) {
        None => true,
        Some(b'v' | b'V') => word_start(pos - 1),
        Some(b'_') => !(pos >= 2 && bytes[pos - 2].is_ascii_digit()),
        Some(prev) => !prev.is_ascii_alphanumeric(),
    }
}

fn parse(version: &str) -> Option<ParsedVersion<'_>> {
    let bytes = version.as_bytes();
    let start = bytes.iter().position(u8::is_ascii_digit)?;
    let end = numeric_run_end(bytes, start);
    let components = version[start..end].split(['.', '-', '_']).collect();

    Some(ParsedVersion {
        components,
        suffix: &version[end..],
    })
}

/// End of the digit groups starting at `start`; separators only count when a
/// digit follows them.
fn numeric_run_end(bytes: &[u8], start: usize) -> usize {
    let mut pos = start;
    loop {
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        let separator = bytes.get(pos).is_some_and(|b| matches!(b, b'.' | b'-' | b'_'));
        let digit_follows = bytes.get(pos + 1).is_some_and(u8::is_ascii_digit);
        if separator && digit_follows {
            pos += 1;
        } else {
            return pos;
        }
    }
}

fn compare_components(left: &[&str], right: &[&str]) -> Ordering {
    let len = left.len().max(right.len());
    for i in 0..len {
        let a = left.get(i).copied().unwrap_or("0");
        let b = right.get(i).copied().unwrap_or("0");
        let ordering = compare_numeric(a, b);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Compare digit strings of any length without overflowing.
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
