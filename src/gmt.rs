// SPDX-License-Identifier: MPL-2.0

//! The full lpn -> ppn table as it would sit in translation pages on flash.

use std::sync::Mutex;

use hashbrown::HashMap;

use crate::{config::Config, prelude::*};

/// The global mapping table. This is the simulated content of all
/// translation pages taken together; it changes in memory exactly when the
/// simulated program of a translation page completes, and the cache reads
/// it to synthesize a page's content during a fill.
///
/// An absent lpn has never been written (or was discarded).
pub struct MappingOnFlash {
    entries: Mutex<HashMap<Lpn, Ppn>>,
    entries_per_trans_page: usize,
}

impl MappingOnFlash {
    pub fn new(conf: &Config) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            entries_per_trans_page: conf.entries_per_trans_page(),
        }
    }

    pub fn lookup(&self, lpn: Lpn) -> Option<Ppn> {
        self.entries.lock().unwrap().get(&lpn).copied()
    }

    pub fn update(&self, lpn: Lpn, ppn: Option<Ppn>) {
        let mut entries = self.entries.lock().unwrap();
        match ppn {
            Some(ppn) => {
                entries.insert(lpn, ppn);
            }
            None => {
                entries.remove(&lpn);
            }
        }
    }

    pub fn update_batch(&self, mappings: &[(Lpn, Option<Ppn>)]) {
        for &(lpn, ppn) in mappings {
            self.update(lpn, ppn);
        }
    }

    /// The full content of one translation page, one slot per lpn.
    pub fn mappings_of(&self, m_vpn: Mvpn) -> Vec<(Lpn, Option<Ppn>)> {
        let entries = self.entries.lock().unwrap();
        let start = m_vpn * self.entries_per_trans_page;
        (start..start + self.entries_per_trans_page)
            .map(|lpn| (lpn, entries.get(&lpn).copied()))
            .collect()
    }
}
