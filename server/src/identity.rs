//! Display-name allocation for newly admitted sessions
//!
//! Candidate names are adjective-noun pairs ("red-fox") drawn at random.
//! Allocation retries until a candidate is free under case-insensitive
//! comparison with the current membership, up to a bounded number of
//! attempts. The bound turns a pathological generator (or a membership
//! approaching the output space) into an explicit error instead of a
//! spin loop.

use rand::seq::SliceRandom;
use std::collections::HashSet;
use thiserror::Error;

const ADJECTIVES: &[&str] = &[
    "red", "blue", "green", "purple", "orange", "cyan", "magenta", "yellow", "amber", "coral",
    "crimson", "golden", "indigo", "ivory", "jade", "olive", "pearl", "ruby", "silver", "teal",
    "violet", "brisk", "quiet", "swift",
];

const NOUNS: &[&str] = &[
    "fox", "owl", "wolf", "bear", "hawk", "otter", "lynx", "heron", "badger", "falcon", "ferret",
    "finch", "gull", "hare", "ibis", "koala", "lemur", "marten", "moose", "osprey", "raven",
    "seal", "stoat", "wren",
];

/// Retry budget for a single allocation
pub const DEFAULT_MAX_ATTEMPTS: usize = 100;

/// No free name was found within the retry budget
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no unique display name found within {attempts} attempts")]
pub struct AllocationExhausted {
    pub attempts: usize,
}

/// Generates unique display names for new sessions
///
/// Pure with respect to membership: allocation reads the taken-name set
/// and touches no other state, so the registry can call it from inside
/// an admission without ordering concerns.
pub struct IdentityAllocator {
    adjectives: &'static [&'static str],
    nouns: &'static [&'static str],
    max_attempts: usize,
}

impl IdentityAllocator {
    /// Creates an allocator over the built-in word lists.
    pub fn new() -> Self {
        Self::with_lists(ADJECTIVES, NOUNS, DEFAULT_MAX_ATTEMPTS)
    }

    /// Creates an allocator with custom word lists and retry budget.
    pub fn with_lists(
        adjectives: &'static [&'static str],
        nouns: &'static [&'static str],
        max_attempts: usize,
    ) -> Self {
        Self {
            adjectives,
            nouns,
            max_attempts,
        }
    }

    /// Picks a display name absent from `taken` under case-insensitive
    /// comparison.
    ///
    /// `taken` must hold lowercased names. Fails with
    /// [`AllocationExhausted`] once the retry budget is spent.
    pub fn allocate(&self, taken: &HashSet<String>) -> Result<String, AllocationExhausted> {
        let mut rng = rand::thread_rng();

        for _ in 0..self.max_attempts {
            let (Some(adjective), Some(noun)) =
                (self.adjectives.choose(&mut rng), self.nouns.choose(&mut rng))
            else {
                break;
            };

            let candidate = format!("{}-{}", adjective, noun);
            if !taken.contains(&candidate.to_lowercase()) {
                return Ok(candidate);
            }
        }

        Err(AllocationExhausted {
            attempts: self.max_attempts,
        })
    }
}

impl Default for IdentityAllocator {
    fn default() -> Self {
        Self::new()
    }
}
