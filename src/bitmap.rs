// SPDX-License-Identifier: MPL-2.0

//! Per-page flash state, packed two bits per page.

use bittle::{Bits, BitsMut};

use crate::prelude::*;

/// The erase-before-write lifecycle of one flash page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageState {
    Erased,
    Valid,
    Invalid,
}

/// A compact array of [`PageState`]s, two bits per page, plus a per-block
/// tally of valid pages so victim scoring is O(1).
///
/// State transitions are the hardware's: ERASED -> VALID -> INVALID, and
/// back to ERASED only through a whole-block erase. Any other transition is
/// a programming error.
#[derive(Clone, Debug)]
pub struct FlashBitmap {
    bits: Vec<u64>,
    valid_in_block: Vec<u32>,
    pages_per_block: usize,
    npages: usize,
}

impl FlashBitmap {
    const VALID_BIT: u64 = 0;
    const INVALID_BIT: u64 = 1;

    pub fn new(pages_per_block: usize, n_blocks: usize) -> Self {
        let npages = pages_per_block * n_blocks;
        let vec_len = (2 * npages).div_ceil(64);
        Self {
            bits: vec![0u64; vec_len],
            valid_in_block: vec![0u32; n_blocks],
            pages_per_block,
            npages,
        }
    }

    fn check_index(&self, ppn: Ppn) {
        if ppn >= self.npages {
            panic!("ppn {} is out of range, total pages {}", ppn, self.npages);
        }
    }

    pub fn state(&self, ppn: Ppn) -> PageState {
        self.check_index(ppn);
        let valid = self.bits.test_bit((2 * ppn as u64 + Self::VALID_BIT) as _);
        let invalid = self.bits.test_bit((2 * ppn as u64 + Self::INVALID_BIT) as _);
        match (valid, invalid) {
            (false, false) => PageState::Erased,
            (true, false) => PageState::Valid,
            (false, true) => PageState::Invalid,
            (true, true) => unreachable!("corrupt page state for ppn {}", ppn),
        }
    }

    pub fn is_valid(&self, ppn: Ppn) -> bool {
        self.state(ppn) == PageState::Valid
    }

    /// Marks a freshly programmed page valid. The page must be erased.
    pub fn validate(&mut self, ppn: Ppn) {
        debug_assert_eq!(self.state(ppn), PageState::Erased, "validate ppn {}", ppn);
        self.bits.set_bit((2 * ppn as u64 + Self::VALID_BIT) as _);
        self.valid_in_block[ppn / self.pages_per_block] += 1;
    }

    /// Marks a superseded page invalid. The page must be valid.
    pub fn invalidate(&mut self, ppn: Ppn) {
        debug_assert_eq!(self.state(ppn), PageState::Valid, "invalidate ppn {}", ppn);
        self.bits.clear_bit((2 * ppn as u64 + Self::VALID_BIT) as _);
        self.bits.set_bit((2 * ppn as u64 + Self::INVALID_BIT) as _);
        self.valid_in_block[ppn / self.pages_per_block] -= 1;
    }

    /// Resets every page of the block to erased.
    pub fn erase_block(&mut self, pbn: Pbn) {
        let start = pbn * self.pages_per_block;
        self.check_index(start + self.pages_per_block - 1);
        for ppn in start..start + self.pages_per_block {
            self.bits.clear_bit((2 * ppn as u64 + Self::VALID_BIT) as _);
            self.bits.clear_bit((2 * ppn as u64 + Self::INVALID_BIT) as _);
        }
        self.valid_in_block[pbn] = 0;
    }

    pub fn n_valid_in_block(&self, pbn: Pbn) -> usize {
        self.valid_in_block[pbn] as usize
    }

    pub fn block_valid_ratio(&self, pbn: Pbn) -> f64 {
        self.valid_in_block[pbn] as f64 / self.pages_per_block as f64
    }
}
