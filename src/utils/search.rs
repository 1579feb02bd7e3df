//! Exact byte pattern search.
//!
//! Implements Knuth-Morris-Pratt matching: the pattern is preprocessed once into a failure
//! table (length of the longest proper prefix that is also a suffix, per pattern position),
//! after which the haystack is scanned exactly once. Worst case is `O(n + m)` regardless
//! of how repetitive the pattern or the haystack are.
//!
//! # Examples
//!
//! ```rust
//! use gpuhint::utils::{find_pattern, KmpPattern};
//!
//! assert_eq!(find_pattern(b"abab", b"xxabaabab"), Some(5));
//!
//! // Reuse the precomputed table for several haystacks
//! let pattern = KmpPattern::new(b"PE\0\0");
//! assert_eq!(pattern.find_in(b"MZ..PE\0\0"), Some(4));
//! assert_eq!(pattern.find_in(b"MZ"), None);
//! ```

/// A search pattern with its precomputed failure table.
#[derive(Debug, Clone)]
pub struct KmpPattern<'a> {
    pattern: &'a [u8],
    /// `failure[i]` is the length of the longest proper prefix of `pattern[..=i]` that is
    /// also a suffix of it.
    failure: Vec<usize>,
}

impl<'a> KmpPattern<'a> {
    /// Preprocesses `pattern` for repeated searching.
    #[must_use]
    pub fn new(pattern: &'a [u8]) -> Self {
        let mut failure = vec![0usize; pattern.len()];
        let mut matched = 0usize;

        for pos in 1..pattern.len() {
            while matched > 0 && pattern[pos] != pattern[matched] {
                matched = failure[matched - 1];
            }
            if pattern[pos] == pattern[matched] {
                matched += 1;
            }
            failure[pos] = matched;
        }

        KmpPattern { pattern, failure }
    }

    /// Returns the pattern bytes.
    #[must_use]
    pub fn pattern(&self) -> &[u8] {
        self.pattern
    }

    /// Returns the index of the first occurrence of the pattern in `haystack`.
    ///
    /// An empty pattern matches at index 0.
    #[must_use]
    pub fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        if self.pattern.is_empty() {
            return Some(0);
        }

        let mut matched = 0usize;
        for (index, &byte) in haystack.iter().enumerate() {
            while matched > 0 && byte != self.pattern[matched] {
                matched = self.failure[matched - 1];
            }
            if byte == self.pattern[matched] {
                matched += 1;
                if matched == self.pattern.len() {
                    return Some(index + 1 - matched);
                }
            }
        }

        None
    }
}

/// Returns the index of the first occurrence of `pattern` in `haystack`, or `None`.
///
/// Convenience wrapper around [`KmpPattern`] for one-shot searches.
#[must_use]
pub fn find_pattern(pattern: &[u8], haystack: &[u8]) -> Option<usize> {
    KmpPattern::new(pattern).find_in(haystack)
}
