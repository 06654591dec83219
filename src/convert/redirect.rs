//! Redirect resolution
//!
//! Follows redirect chains through directory metadata only; payloads are
//! never read while walking a chain.

use std::collections::HashSet;

use crate::zim::{ContainerEntry, ContainerError, EntryLookup};

use super::classify::classify;
use super::types::{EntryKind, SkipReason};

/// Outcome of resolving one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The entry is itself an article
    Terminal,
    /// `source` redirects (in `hops` steps) to the article at `canonical`.
    /// That article contributes its own row, so the redirect adds none.
    Redirected {
        source: String,
        canonical: String,
        hops: usize,
    },
    /// The chain was abandoned
    Dropped(SkipReason),
}

/// Redirect resolver with a fixed hop limit
#[derive(Debug, Clone, Copy)]
pub struct RedirectResolver {
    max_hops: usize,
}

impl RedirectResolver {
    pub fn new(max_hops: usize) -> Self {
        Self { max_hops }
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    /// Resolve `entry` to its terminal article.
    ///
    /// Only read failures along the chain are errors; cycles, over-long
    /// chains and non-article targets come back as `Dropped`.
    pub fn resolve<L: EntryLookup + ?Sized>(
        &self,
        entry: &ContainerEntry,
        lookup: &L,
    ) -> Result<Resolution, ContainerError> {
        match classify(entry) {
            EntryKind::Article => return Ok(Resolution::Terminal),
            EntryKind::Redirect => {}
            EntryKind::Image | EntryKind::Ignorable => {
                return Ok(Resolution::Dropped(SkipReason::RedirectTargetNotArticle))
            }
        }

        let mut visited: HashSet<String> = HashSet::from([entry.url.clone()]);
        let mut current = entry.clone();
        let mut hops = 0usize;

        loop {
            match classify(&current) {
                EntryKind::Article => {
                    return Ok(Resolution::Redirected {
                        source: entry.url.clone(),
                        canonical: current.url,
                        hops,
                    })
                }
                EntryKind::Image | EntryKind::Ignorable => {
                    return Ok(Resolution::Dropped(SkipReason::RedirectTargetNotArticle))
                }
                EntryKind::Redirect => {}
            }

            let Some(target) = current.redirect_target() else {
                return Ok(Resolution::Dropped(SkipReason::RedirectTargetNotArticle));
            };
            if hops >= self.max_hops {
                return Ok(Resolution::Dropped(SkipReason::RedirectDepthExceeded));
            }

            let next = lookup.lookup(target)?;
            hops += 1;
            if !visited.insert(next.url.clone()) {
                return Ok(Resolution::Dropped(SkipReason::RedirectCycle));
            }
            current = next;
        }
    }
}
