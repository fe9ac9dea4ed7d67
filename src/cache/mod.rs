// SPDX-License-Identifier: MPL-2.0

//! The cached mapping table (CMT).
//!
//! A bounded resident subset of the lpn -> ppn map. Misses page the whole
//! translation page in through the flash device; evictions write dirty
//! pages back out through it. Both directions run under the per-m_vpn
//! token, so at any instant at most one task is reading, merging, or
//! programming a given translation page.

mod slru;
mod table;
mod vpn_lock;

use std::sync::Mutex;

use self::slru::RowId;
use self::table::LpnTable;
use self::vpn_lock::VpnLockPool;
use crate::{
    config::Config,
    directory::TransDirectory,
    flash::{FlashDevice, FlashOp, OpTag},
    gmt::MappingOnFlash,
    oob::{Oob, PageOwner},
    pool::{BlockPool, CursorId},
    prelude::*,
    stats::Stats,
};

pub struct MappingCache<D> {
    conf: Arc<Config>,
    flash: Arc<D>,
    pool: Arc<BlockPool>,
    oob: Arc<Oob>,
    directory: Arc<TransDirectory>,
    gmt: Arc<MappingOnFlash>,
    stats: Arc<Stats>,
    table: Mutex<LpnTable>,
    vpn_locks: Arc<VpnLockPool>,
}

impl<D: FlashDevice> MappingCache<D> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        conf: Arc<Config>,
        flash: Arc<D>,
        pool: Arc<BlockPool>,
        oob: Arc<Oob>,
        directory: Arc<TransDirectory>,
        gmt: Arc<MappingOnFlash>,
        stats: Arc<Stats>,
    ) -> Self {
        let capacity = conf.n_cache_entries();
        // A single translation page must fit resident during a fill;
        // `Config::validate` has already rejected smaller caches.
        debug_assert!(capacity >= conf.entries_per_trans_page());
        let table = LpnTable::new(capacity, conf.entries_per_trans_page());
        Self {
            conf,
            flash,
            pool,
            oob,
            directory,
            gmt,
            stats,
            table: Mutex::new(table),
            vpn_locks: Arc::new(VpnLockPool::new()),
        }
    }

    /// The current mapping of `lpn`; `None` means the lpn has never been
    /// written. Pages the translation page in on a miss.
    pub async fn lookup(&self, lpn: Lpn) -> Result<Option<Ppn>> {
        if let Some(ppn) = self.table.lock().unwrap().lookup_touch(lpn) {
            self.stats.count_cache_hit();
            return Ok(ppn);
        }

        let m_vpn = self.conf.lpn_to_m_vpn(lpn);
        let guard = self.vpn_locks.acquire(m_vpn).await;
        // Another task may have loaded the page while we waited.
        let loaded = if !self.table.lock().unwrap().has_lpn(lpn) {
            self.load_missing(m_vpn).await?;
            true
        } else {
            false
        };
        let ppn = self
            .table
            .lock()
            .unwrap()
            .lookup_touch(lpn)
            .expect("fill covers every lpn of the translation page");
        drop(guard);

        if loaded {
            self.stats.count_cache_miss();
        } else {
            self.stats.count_cache_hit();
        }
        Ok(ppn)
    }

    /// Sets the mapping of `lpn`, dirty. Evicts one row if the table is
    /// full. `ppn = None` records a discard.
    pub async fn update(&self, lpn: Lpn, ppn: Option<Ppn>) -> Result<()> {
        if self.table.lock().unwrap().has_lpn(lpn) {
            self.table.lock().unwrap().overwrite_lpn(lpn, ppn, true);
            return Ok(());
        }

        let row_id = match self.table.lock().unwrap().lock_free_row() {
            Some(row_id) => row_id,
            None => self.evict_one(None).await?,
        };
        self.table
            .lock()
            .unwrap()
            .add_lpn(row_id, lpn, ppn, true, false);
        Ok(())
    }

    /// Applies updates in order.
    pub async fn update_batch(&self, mappings: &[(Lpn, Option<Ppn>)]) -> Result<()> {
        for &(lpn, ppn) in mappings {
            self.update(lpn, ppn).await?;
        }
        Ok(())
    }

    pub(crate) fn contains(&self, lpn: Lpn) -> bool {
        self.table.lock().unwrap().has_lpn(lpn)
    }

    /// The resident mapping without provoking any I/O; outer `None` is a
    /// cache miss.
    pub(crate) fn peek(&self, lpn: Lpn) -> Option<Option<Ppn>> {
        self.table.lock().unwrap().peek(lpn)
    }

    /// Overwrites a mapping known to be resident (data-GC relocations).
    pub(crate) fn overwrite_cached(&self, lpn: Lpn, ppn: Option<Ppn>, dirty: bool) {
        self.table.lock().unwrap().overwrite_lpn(lpn, ppn, dirty);
    }

    pub(crate) fn n_resident(&self) -> usize {
        self.table.lock().unwrap().n_resident()
    }

    /// Merges `changes` into the on-flash translation page and programs its
    /// replacement. The data-GC batch path; takes the page token itself.
    pub(crate) async fn update_translation_page_on_flash(
        &self,
        m_vpn: Mvpn,
        changes: &[(Lpn, Option<Ppn>)],
        tag: OpTag,
    ) -> Result<()> {
        let guard = self.vpn_locks.acquire(m_vpn).await;
        let latest = if changes.len() < self.conf.entries_per_trans_page() {
            let mut merged = self.read_translation_page(m_vpn, tag).await?;
            self.overlay(&mut merged, m_vpn, changes.iter().copied());
            merged
        } else {
            changes.to_vec()
        };
        self.gmt.update_batch(&latest);
        self.program_translation_page(m_vpn, tag).await?;
        drop(guard);
        Ok(())
    }

    /// Loads the translation page into locked rows. The caller holds the
    /// page token, which keeps every resident row of `m_vpn` pinned; the
    /// evictions below must therefore never pick our own m_vpn.
    async fn load_missing(&self, m_vpn: Mvpn) -> Result<()> {
        let n_needed = {
            let table = self.table.lock().unwrap();
            self.conf.entries_per_trans_page() - table.n_cached_of(m_vpn)
        };
        let mut locked_rows = self.table.lock().unwrap().lock_free_rows(n_needed);
        while locked_rows.len() < n_needed {
            locked_rows.push(self.evict_one(Some(m_vpn)).await?);
        }

        let mappings = self.read_translation_page(m_vpn, OpTag::TransCache).await?;

        let mut table = self.table.lock().unwrap();
        let uncached: Vec<_> = mappings
            .into_iter()
            .filter(|&(lpn, _)| !table.has_lpn(lpn))
            .collect();
        debug_assert!(uncached.len() <= locked_rows.len());
        let surplus = locked_rows.split_off(uncached.len());
        for (&row_id, (lpn, ppn)) in locked_rows.iter().zip(uncached) {
            // Entries nobody asked for enter as least recently used.
            table.add_lpn(row_id, lpn, ppn, false, true);
        }
        table.unlock_free_rows(&surplus);
        Ok(())
    }

    /// Evicts the least recent evictable row, writing it back if dirty,
    /// and returns the freed row locked.
    ///
    /// Deadlock rules: never pick the m_vpn being loaded by our caller,
    /// and never pick an m_vpn whose token is held elsewhere.
    async fn evict_one(&self, loading_m_vpn: Option<Mvpn>) -> Result<RowId> {
        let (row_id, victim_lpn) = {
            let mut table = self.table.lock().unwrap();
            let avoid = self.vpn_locks.locked_vpns();
            let Some((row_id, lpn)) = table.victim_row(loading_m_vpn, &avoid) else {
                error!(
                    "mapping cache starved, row states {:?}",
                    table.state_counts()
                );
                return_errno_with_msg!(CacheStarved, "no evictable mapping row");
            };
            table.hold_used_row(row_id);
            (row_id, lpn)
        };

        let victim_m_vpn = self.conf.lpn_to_m_vpn(victim_lpn);
        let guard = self.vpn_locks.acquire(victim_m_vpn).await;

        if self.table.lock().unwrap().is_dirty(victim_lpn) {
            self.write_back(victim_m_vpn, OpTag::TransCache).await?;
        }

        let freed = {
            let mut table = self.table.lock().unwrap();
            debug_assert!(table.has_lpn(victim_lpn));
            debug_assert!(!table.is_dirty(victim_lpn));
            table.unhold_used_row(row_id);
            table.delete_lpn_and_lock(victim_lpn)
        };
        drop(guard);
        Ok(freed)
    }

    /// Writes the translation page back out. The caller holds the page
    /// token. Must not trigger an eviction, directly or indirectly.
    async fn write_back(&self, m_vpn: Mvpn, tag: OpTag) -> Result<()> {
        // Mark clean before any suspension: updates arriving during the
        // flash I/O must re-dirty their rows or they would be lost.
        let cached = {
            let mut table = self.table.lock().unwrap();
            let cached = table.cached_mappings_of(m_vpn);
            for &(lpn, _) in &cached {
                table.mark_clean(lpn);
            }
            cached
        };

        let latest = if cached.len() < self.conf.entries_per_trans_page() {
            let mut merged = self.read_translation_page(m_vpn, tag).await?;
            self.overlay(&mut merged, m_vpn, cached.into_iter());
            merged
        } else {
            cached
        };

        debug_assert_eq!(latest.len(), self.conf.entries_per_trans_page());
        self.gmt.update_batch(&latest);
        self.program_translation_page(m_vpn, tag).await
    }

    fn overlay(
        &self,
        page: &mut [(Lpn, Option<Ppn>)],
        m_vpn: Mvpn,
        entries: impl Iterator<Item = (Lpn, Option<Ppn>)>,
    ) {
        let base = m_vpn * self.conf.entries_per_trans_page();
        for (lpn, ppn) in entries {
            debug_assert_eq!(self.conf.lpn_to_m_vpn(lpn), m_vpn);
            page[lpn - base] = (lpn, ppn);
        }
    }

    /// Synthesizes the page content from the global table while charging
    /// the read of the current m_ppn to the device.
    async fn read_translation_page(
        &self,
        m_vpn: Mvpn,
        tag: OpTag,
    ) -> Result<Vec<(Lpn, Option<Ppn>)>> {
        let mappings = self.gmt.mappings_of(m_vpn);
        let m_ppn = self.directory.lookup(m_vpn);
        self.flash
            .rw_ppn_extent(m_ppn, 1, FlashOp::Read, tag)
            .await?;
        self.stats.count_trans_page_read();
        Ok(mappings)
    }

    /// Programs the page at a fresh m_ppn and repoints OOB and directory.
    async fn program_translation_page(&self, m_vpn: Mvpn, tag: OpTag) -> Result<()> {
        let new_m_ppn = self.pool.next_page(CursorId::UserTrans)?;
        let old_m_ppn = self.directory.lookup(m_vpn);

        self.flash
            .rw_ppn_extent(new_m_ppn, 1, FlashOp::Write, tag)
            .await?;
        self.stats.count_trans_page_program();

        self.oob
            .relocate_page(PageOwner::Trans(m_vpn), Some(old_m_ppn), new_m_ppn, true);
        self.directory.update(m_vpn, new_m_ppn);

        debug_assert!(!self.oob.is_valid(old_m_ppn));
        debug_assert!(self.oob.is_valid(new_m_ppn));
        debug_assert_eq!(self.oob.owner(new_m_ppn), Some(PageOwner::Trans(m_vpn)));
        Ok(())
    }
}
