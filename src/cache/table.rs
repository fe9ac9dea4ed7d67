// SPDX-License-Identifier: MPL-2.0

//! The resident rows of the cached mapping table.

use hashbrown::HashSet;

use super::slru::{RowId, SlruIndex};
use crate::prelude::*;

/// Lifecycle of one cache row.
///
/// ```text
/// FREE <--> FREE_AND_LOCKED <--> USED <--> USED_AND_LOCKED
///                                 ^
///                                 |
///                                 v
///                            USED_AND_HOLD
/// ```
///
/// `FreeAndLocked` reserves a row for a mapping about to arrive;
/// `UsedAndHold` pins an eviction victim so it cannot be chosen twice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RowState {
    Free,
    FreeAndLocked,
    Used,
    UsedAndLocked,
    UsedAndHold,
}

#[derive(Debug)]
pub(crate) struct Row {
    lpn: Option<Lpn>,
    ppn: Option<Ppn>,
    dirty: bool,
    state: RowState,
}

impl Row {
    fn new() -> Self {
        Self {
            lpn: None,
            ppn: None,
            dirty: false,
            state: RowState::Free,
        }
    }

    fn set_state(&mut self, to: RowState) {
        use RowState::*;
        let legal = match to {
            Free => matches!(self.state, FreeAndLocked),
            FreeAndLocked => matches!(self.state, Free | Used),
            Used => matches!(self.state, FreeAndLocked | UsedAndLocked | UsedAndHold),
            UsedAndLocked | UsedAndHold => matches!(self.state, Used),
        };
        debug_assert!(legal, "row transition {:?} -> {:?}", self.state, to);
        self.state = to;
    }

    fn assert_modifiable(&self) {
        use RowState::*;
        debug_assert!(
            matches!(self.state, FreeAndLocked | Used | UsedAndHold),
            "row fields modified in state {:?}",
            self.state
        );
    }
}

/// Fixed-capacity row table plus the recency index over the occupied rows.
pub(crate) struct LpnTable {
    rows: Vec<Row>,
    index: SlruIndex,
    entries_per_trans_page: usize,
}

impl LpnTable {
    pub fn new(capacity: usize, entries_per_trans_page: usize) -> Self {
        Self {
            rows: (0..capacity).map(|_| Row::new()).collect(),
            index: SlruIndex::new(capacity),
            entries_per_trans_page,
        }
    }

    fn m_vpn_of(&self, lpn: Lpn) -> Mvpn {
        lpn / self.entries_per_trans_page
    }

    pub fn capacity(&self) -> usize {
        self.rows.len()
    }

    pub fn n_resident(&self) -> usize {
        self.index.len()
    }

    pub fn has_lpn(&self, lpn: Lpn) -> bool {
        self.index.contains(lpn)
    }

    /// The cached mapping, touching recency. `None` means a cache miss.
    pub fn lookup_touch(&mut self, lpn: Lpn) -> Option<Option<Ppn>> {
        let row = self.index.peek(lpn)?;
        self.index.touch(lpn);
        Some(self.rows[row].ppn)
    }

    /// The cached mapping without touching recency.
    pub fn peek(&self, lpn: Lpn) -> Option<Option<Ppn>> {
        self.index.peek(lpn).map(|row| self.rows[row].ppn)
    }

    pub fn is_dirty(&self, lpn: Lpn) -> bool {
        let row = self.index.peek(lpn).expect("lpn not resident");
        self.rows[row].dirty
    }

    pub fn row_state(&self, row_id: RowId) -> RowState {
        self.rows[row_id].state
    }

    /// FREE -> FREE_AND_LOCKED for up to `n` rows; returns the row ids won.
    pub fn lock_free_rows(&mut self, n: usize) -> Vec<RowId> {
        let mut got = Vec::with_capacity(n);
        if n == 0 {
            return got;
        }
        for (row_id, row) in self.rows.iter_mut().enumerate() {
            if row.state == RowState::Free {
                row.set_state(RowState::FreeAndLocked);
                got.push(row_id);
                if got.len() == n {
                    break;
                }
            }
        }
        got
    }

    pub fn lock_free_row(&mut self) -> Option<RowId> {
        self.lock_free_rows(1).into_iter().next()
    }

    /// FREE_AND_LOCKED -> FREE for reserved rows that went unused.
    pub fn unlock_free_rows(&mut self, row_ids: &[RowId]) {
        for &row_id in row_ids {
            self.rows[row_id].set_state(RowState::Free);
        }
    }

    /// Occupies a locked row. `as_least_recent` is the fill path: entries
    /// the caller did not ask for must not displace the hot set.
    pub fn add_lpn(
        &mut self,
        row_id: RowId,
        lpn: Lpn,
        ppn: Option<Ppn>,
        dirty: bool,
        as_least_recent: bool,
    ) {
        debug_assert!(!self.has_lpn(lpn), "lpn {} already resident", lpn);
        let row = &mut self.rows[row_id];
        row.assert_modifiable();
        row.lpn = Some(lpn);
        row.ppn = ppn;
        row.dirty = dirty;
        row.set_state(RowState::Used);

        if as_least_recent {
            self.index.insert_cold(lpn, row_id);
        } else {
            self.index.insert_mru(lpn, row_id);
        }
    }

    /// Overwrites a resident mapping in place, touching recency.
    pub fn overwrite_lpn(&mut self, lpn: Lpn, ppn: Option<Ppn>, dirty: bool) {
        let row_id = self.index.peek(lpn).expect("lpn not resident");
        self.index.touch(lpn);
        let row = &mut self.rows[row_id];
        row.assert_modifiable();
        row.ppn = ppn;
        row.dirty = dirty;
    }

    pub fn mark_clean(&mut self, lpn: Lpn) {
        let row_id = self.index.peek(lpn).expect("lpn not resident");
        let row = &mut self.rows[row_id];
        debug_assert!(matches!(
            row.state,
            RowState::Used | RowState::UsedAndHold
        ));
        row.dirty = false;
    }

    /// All resident mappings of the translation page, in lpn order.
    pub fn cached_mappings_of(&self, m_vpn: Mvpn) -> Vec<(Lpn, Option<Ppn>)> {
        let start = m_vpn * self.entries_per_trans_page;
        (start..start + self.entries_per_trans_page)
            .filter_map(|lpn| self.peek(lpn).map(|ppn| (lpn, ppn)))
            .collect()
    }

    pub fn n_cached_of(&self, m_vpn: Mvpn) -> usize {
        let start = m_vpn * self.entries_per_trans_page;
        (start..start + self.entries_per_trans_page)
            .filter(|&lpn| self.has_lpn(lpn))
            .count()
    }

    /// The least recent USED row whose translation page is neither being
    /// loaded nor locked elsewhere. Becoming a victim is the only road to
    /// deletion, and `UsedAndHold` keeps a row from being chosen twice.
    pub fn victim_row(
        &self,
        loading_m_vpn: Option<Mvpn>,
        avoid_m_vpns: &HashSet<Mvpn>,
    ) -> Option<(RowId, Lpn)> {
        for row_id in self.index.iter_lru_to_mru() {
            let row = &self.rows[row_id];
            if row.state != RowState::Used {
                continue;
            }
            let lpn = row.lpn.expect("indexed row without lpn");
            let m_vpn = self.m_vpn_of(lpn);
            if Some(m_vpn) == loading_m_vpn || avoid_m_vpns.contains(&m_vpn) {
                continue;
            }
            return Some((row_id, lpn));
        }
        None
    }

    pub fn hold_used_row(&mut self, row_id: RowId) {
        self.rows[row_id].set_state(RowState::UsedAndHold);
    }

    pub fn unhold_used_row(&mut self, row_id: RowId) {
        self.rows[row_id].set_state(RowState::Used);
    }

    /// Drops the lpn from the table and hands its row back locked, the
    /// single deletion point of the cache.
    pub fn delete_lpn_and_lock(&mut self, lpn: Lpn) -> RowId {
        let row_id = self.index.remove(lpn);
        let row = &mut self.rows[row_id];
        debug_assert_eq!(row.state, RowState::Used);
        row.assert_modifiable();
        row.lpn = None;
        row.ppn = None;
        row.dirty = false;
        row.set_state(RowState::FreeAndLocked);
        row_id
    }

    /// Row counts per state, in declaration order.
    pub fn state_counts(&self) -> [usize; 5] {
        let mut counts = [0; 5];
        for row in &self.rows {
            counts[row.state as usize] += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use hashbrown::HashSet;

    use super::{LpnTable, RowState};

    #[test]
    fn add_lookup_delete() {
        let mut t = LpnTable::new(4, 4);
        let row = t.lock_free_row().unwrap();
        assert_eq!(t.row_state(row), RowState::FreeAndLocked);

        t.add_lpn(row, 5, Some(50), true, false);
        assert_eq!(t.row_state(row), RowState::Used);
        assert_eq!(t.lookup_touch(5), Some(Some(50)));
        assert!(t.is_dirty(5));

        t.mark_clean(5);
        let freed = t.delete_lpn_and_lock(5);
        assert_eq!(freed, row);
        assert_eq!(t.row_state(row), RowState::FreeAndLocked);
        assert!(!t.has_lpn(5));
        assert_eq!(t.lookup_touch(5), None);
    }

    #[test]
    fn capacity_is_conserved() {
        let mut t = LpnTable::new(4, 4);
        let rows = t.lock_free_rows(3);
        assert_eq!(rows.len(), 3);
        t.unlock_free_rows(&rows[1..]);
        t.add_lpn(rows[0], 0, None, false, true);

        let [free, locked, used, _, _] = t.state_counts();
        assert_eq!((free, locked, used), (3, 0, 1));
        assert_eq!(t.state_counts().iter().sum::<usize>(), t.capacity());
    }

    #[test]
    fn victim_skips_loading_and_held() {
        let mut t = LpnTable::new(4, 4);
        // lpns 0 and 4 live in translation pages 0 and 1.
        let r0 = t.lock_free_row().unwrap();
        t.add_lpn(r0, 0, Some(10), false, false);
        let r1 = t.lock_free_row().unwrap();
        t.add_lpn(r1, 4, Some(11), false, false);

        // Loading m_vpn 0 cannot evict its own entries.
        let (victim, lpn) = t.victim_row(Some(0), &HashSet::new()).unwrap();
        assert_eq!((victim, lpn), (r1, 4));

        // A held row is no longer a candidate.
        t.hold_used_row(r1);
        assert!(t.victim_row(Some(0), &HashSet::new()).is_none());

        // Neither is a row whose m_vpn token is held elsewhere.
        t.unhold_used_row(r1);
        let avoid: HashSet<_> = [1].into_iter().collect();
        assert!(t.victim_row(Some(0), &avoid).is_none());
    }

    #[test]
    fn mappings_of_one_trans_page() {
        let mut t = LpnTable::new(4, 4);
        for lpn in [4, 6] {
            let row = t.lock_free_row().unwrap();
            t.add_lpn(row, lpn, Some(lpn * 10), false, false);
        }
        assert_eq!(t.n_cached_of(1), 2);
        assert_eq!(
            t.cached_mappings_of(1),
            vec![(4, Some(40)), (6, Some(60))]
        );
        assert_eq!(t.n_cached_of(0), 0);
    }

    #[test]
    #[cfg_attr(not(debug_assertions), ignore)]
    #[should_panic]
    fn illegal_transition() {
        let mut t = LpnTable::new(1, 4);
        // FREE -> USED_AND_HOLD is not in the graph.
        t.hold_used_row(0);
    }
}
