// SPDX-License-Identifier: MPL-2.0

//! FTL geometry and policy knobs.

use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Configuration of the simulated device and the FTL policies on top of it.
///
/// All address math helpers live here so that every component derives
/// `m_vpn`s and block ranges the same way.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub pages_per_block: usize,
    pub blocks_per_dev: usize,
    /// Flash page size in bytes.
    pub page_size: usize,
    pub sector_size: usize,
    /// Bytes per lpn->ppn entry inside a translation page.
    pub trans_entry_bytes: usize,
    /// Bytes per resident mapping-cache row.
    pub cache_entry_bytes: usize,
    /// Total size of the cached mapping table, in bytes.
    pub mapping_cache_bytes: usize,
    pub over_provisioning: f64,
    /// High watermark H: a GC round starts above `H * blocks_per_dev` used.
    pub gc_threshold_ratio: f64,
    /// Low watermark L: a running round continues down to `L * blocks_per_dev`.
    pub gc_low_threshold_ratio: f64,
    /// Minimum `(1 - H) * blocks_per_dev` spare blocks required at mount.
    pub min_spare_blocks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pages_per_block: 64,
            blocks_per_dev: 1024,
            page_size: 2048,
            sector_size: 512,
            trans_entry_bytes: 4,
            cache_entry_bytes: 8,
            mapping_cache_bytes: 32768,
            over_provisioning: 1.28,
            gc_threshold_ratio: 0.95,
            gc_low_threshold_ratio: 0.9,
            min_spare_blocks: 32,
        }
    }
}

impl Config {
    pub fn total_pages(&self) -> usize {
        self.blocks_per_dev * self.pages_per_block
    }

    /// Number of lpn->ppn entries one translation page holds.
    pub fn entries_per_trans_page(&self) -> usize {
        self.page_size / self.trans_entry_bytes
    }

    /// Capacity of the cached mapping table, in rows.
    pub fn n_cache_entries(&self) -> usize {
        self.mapping_cache_bytes / self.cache_entry_bytes
    }

    pub fn lpn_to_m_vpn(&self, lpn: Lpn) -> Mvpn {
        lpn / self.entries_per_trans_page()
    }

    /// All lpns mapped by the given translation page.
    pub fn m_vpn_to_lpns(&self, m_vpn: Mvpn) -> core::ops::Range<Lpn> {
        let start = m_vpn * self.entries_per_trans_page();
        start..start + self.entries_per_trans_page()
    }

    /// Translation pages needed to map the whole device.
    pub fn total_translation_pages(&self) -> usize {
        (self.total_pages() * self.trans_entry_bytes).div_ceil(self.page_size)
    }

    pub fn page_to_block(&self, ppn: Ppn) -> Pbn {
        ppn / self.pages_per_block
    }

    pub fn block_page_range(&self, pbn: Pbn) -> core::ops::Range<Ppn> {
        let start = pbn * self.pages_per_block;
        start..start + self.pages_per_block
    }

    pub fn validate(&self) -> Result<()> {
        if self.pages_per_block == 0
            || self.blocks_per_dev == 0
            || self.page_size == 0
            || self.sector_size == 0
            || self.trans_entry_bytes == 0
            || self.cache_entry_bytes == 0
        {
            return_errno_with_msg!(InvalidArgs, "zero-sized geometry");
        }
        if self.page_size % self.trans_entry_bytes != 0 {
            return_errno_with_msg!(InvalidArgs, "page size not a multiple of entry size");
        }
        // The whole translation page must fit in the cache during a fill.
        if self.n_cache_entries() < self.entries_per_trans_page() {
            return_errno_with_msg!(InvalidArgs, "mapping cache smaller than a translation page");
        }
        let trans_blocks = self
            .total_translation_pages()
            .div_ceil(self.pages_per_block);
        if trans_blocks >= self.blocks_per_dev {
            return_errno_with_msg!(InvalidArgs, "translation pages exhaust the device");
        }
        if !(self.over_provisioning >= 1.0) {
            return_errno_with_msg!(InvalidArgs, "over-provisioning below 1.0");
        }
        Ok(())
    }
}
