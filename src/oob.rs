// SPDX-License-Identifier: MPL-2.0

//! Out-of-band page metadata: validity, provenance, and write times.

use std::sync::Mutex;

use hashbrown::HashMap;
use tokio::time::Instant;

use crate::{
    bitmap::{FlashBitmap, PageState},
    config::Config,
    prelude::*,
};

/// What a physical page currently holds: a user data page or a translation
/// page. The reverse map resolves a ppn back to its logical owner during
/// cleaning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageOwner {
    Data(Lpn),
    Trans(Mvpn),
}

struct OobInner {
    states: FlashBitmap,
    owners: HashMap<Ppn, PageOwner>,
    // Program timestamps. Only a fresh program advances the counter; a
    // cleaning move copies the source page's stamp. Erase drops the stamps
    // of the whole block.
    timestamps: HashMap<Ppn, u64>,
    next_timestamp: u64,
    // Block -> time of the most recent invalidation of any of its pages.
    last_inv: HashMap<Pbn, Instant>,
}

/// The out-of-band store. Owns the page-state bitmap and the ppn-keyed
/// metadata that travels with every program, invalidation, and erase.
pub struct Oob {
    inner: Mutex<OobInner>,
    pages_per_block: usize,
}

impl Oob {
    pub fn new(conf: &Config) -> Self {
        Self {
            inner: Mutex::new(OobInner {
                states: FlashBitmap::new(conf.pages_per_block, conf.blocks_per_dev),
                owners: HashMap::new(),
                timestamps: HashMap::new(),
                next_timestamp: 0,
                last_inv: HashMap::new(),
            }),
            pages_per_block: conf.pages_per_block,
        }
    }

    pub fn state(&self, ppn: Ppn) -> PageState {
        self.inner.lock().unwrap().states.state(ppn)
    }

    pub fn is_valid(&self, ppn: Ppn) -> bool {
        self.inner.lock().unwrap().states.is_valid(ppn)
    }

    pub fn owner(&self, ppn: Ppn) -> Option<PageOwner> {
        self.inner.lock().unwrap().owners.get(&ppn).copied()
    }

    pub fn timestamp(&self, ppn: Ppn) -> Option<u64> {
        self.inner.lock().unwrap().timestamps.get(&ppn).copied()
    }

    pub fn n_valid_in_block(&self, pbn: Pbn) -> usize {
        self.inner.lock().unwrap().states.n_valid_in_block(pbn)
    }

    pub fn block_valid_ratio(&self, pbn: Pbn) -> f64 {
        self.inner.lock().unwrap().states.block_valid_ratio(pbn)
    }

    pub fn last_inv_time(&self, pbn: Pbn) -> Option<Instant> {
        self.inner.lock().unwrap().last_inv.get(&pbn).copied()
    }

    /// The owner's content moved from `old_ppn` (if any) to `new_ppn`:
    /// validates the new page, records provenance, and invalidates the old
    /// copy.
    ///
    /// `update_time = true` stamps a fresh write time (host writes,
    /// translation-page programs); `false` carries the old page's stamp
    /// along (cleaning moves).
    pub fn relocate_page(
        &self,
        owner: PageOwner,
        old_ppn: Option<Ppn>,
        new_ppn: Ppn,
        update_time: bool,
    ) {
        let mut inner = self.inner.lock().unwrap();
        if update_time {
            let t = inner.next_timestamp;
            inner.next_timestamp += 1;
            inner.timestamps.insert(new_ppn, t);
        } else {
            let old = old_ppn.expect("timestamp copy needs a source page");
            let t = inner.timestamps[&old];
            inner.timestamps.insert(new_ppn, t);
        }

        inner.states.validate(new_ppn);
        inner.owners.insert(new_ppn, owner);

        if let Some(old) = old_ppn {
            Self::do_invalidate(&mut inner, old, self.pages_per_block);
        }
    }

    pub fn invalidate(&self, ppn: Ppn) {
        let mut inner = self.inner.lock().unwrap();
        Self::do_invalidate(&mut inner, ppn, self.pages_per_block);
    }

    fn do_invalidate(inner: &mut OobInner, ppn: Ppn, pages_per_block: usize) {
        inner.states.invalidate(ppn);
        inner.last_inv.insert(ppn / pages_per_block, Instant::now());
    }

    /// Forgets everything about the block: states back to erased, reverse
    /// map and timestamps dropped, invalidation time cleared.
    pub fn erase_block(&self, pbn: Pbn) {
        let mut inner = self.inner.lock().unwrap();
        inner.states.erase_block(pbn);
        let start = pbn * self.pages_per_block;
        for ppn in start..start + self.pages_per_block {
            inner.owners.remove(&ppn);
            inner.timestamps.remove(&ppn);
        }
        inner.last_inv.remove(&pbn);
    }
}
