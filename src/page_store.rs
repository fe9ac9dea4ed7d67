// SPDX-License-Identifier: MPL-2.0

//! Simulated page payloads.
//!
//! The flash device only models timing, so the bytes the host wrote live
//! here, keyed by ppn. Cleaning moves payloads along with their pages and
//! an erase drops whatever is left in the block.

use std::sync::Mutex;

use hashbrown::HashMap;

use crate::prelude::*;

pub struct PageStore {
    pages: Mutex<HashMap<Ppn, Vec<u8>>>,
}

impl PageStore {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
        }
    }

    pub fn write(&self, ppn: Ppn, data: Vec<u8>) {
        self.pages.lock().unwrap().insert(ppn, data);
    }

    pub fn read(&self, ppn: Ppn) -> Option<Vec<u8>> {
        self.pages.lock().unwrap().get(&ppn).cloned()
    }

    /// Moves a payload to the page's new home.
    pub fn relocate(&self, old_ppn: Ppn, new_ppn: Ppn) {
        let mut pages = self.pages.lock().unwrap();
        if let Some(data) = pages.remove(&old_ppn) {
            pages.insert(new_ppn, data);
        }
    }

    pub fn erase_ppns(&self, ppns: core::ops::Range<Ppn>) {
        let mut pages = self.pages.lock().unwrap();
        for ppn in ppns {
            pages.remove(&ppn);
        }
    }
}

impl Default for PageStore {
    fn default() -> Self {
        Self::new()
    }
}
