// SPDX-License-Identifier: MPL-2.0

//! Activity counters shared by the FTL components.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of the interesting events inside the FTL.
///
/// A `Stats` handle is passed by reference into every component at build
/// time; sinks read a [`StatsSnapshot`] whenever they like.
#[derive(Debug, Default)]
pub struct Stats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    trans_page_reads: AtomicU64,
    trans_page_programs: AtomicU64,
    gc_rounds: AtomicU64,
    gc_freezes: AtomicU64,
    data_pages_moved: AtomicU64,
    trans_pages_moved: AtomicU64,
    blocks_erased: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub trans_page_reads: u64,
    pub trans_page_programs: u64,
    pub gc_rounds: u64,
    pub gc_freezes: u64,
    pub data_pages_moved: u64,
    pub trans_pages_moved: u64,
    pub blocks_erased: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn count_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_trans_page_read(&self) {
        self.trans_page_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_trans_page_program(&self) {
        self.trans_page_programs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_gc_round(&self) {
        self.gc_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_gc_freeze(&self) {
        self.gc_freezes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_data_pages_moved(&self, n: u64) {
        self.data_pages_moved.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn count_trans_pages_moved(&self, n: u64) {
        self.trans_pages_moved.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn count_block_erased(&self) {
        self.blocks_erased.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            trans_page_reads: self.trans_page_reads.load(Ordering::Relaxed),
            trans_page_programs: self.trans_page_programs.load(Ordering::Relaxed),
            gc_rounds: self.gc_rounds.load(Ordering::Relaxed),
            gc_freezes: self.gc_freezes.load(Ordering::Relaxed),
            data_pages_moved: self.data_pages_moved.load(Ordering::Relaxed),
            trans_pages_moved: self.trans_pages_moved.load(Ordering::Relaxed),
            blocks_erased: self.blocks_erased.load(Ordering::Relaxed),
        }
    }
}
