// SPDX-License-Identifier: MPL-2.0

//! The block pool: free list, used lists, and the four append points.

use std::{
    collections::{BTreeSet, VecDeque},
    sync::Mutex,
};

use crate::{config::Config, prelude::*};

/// What a used block holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockPurpose {
    Data,
    Trans,
}

/// The four append points. Host traffic and cleaning traffic never share a
/// block, and neither do data and translation pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorId {
    UserData,
    UserTrans,
    GcData,
    GcTrans,
}

impl CursorId {
    pub const ALL: [CursorId; 4] = [
        CursorId::UserData,
        CursorId::UserTrans,
        CursorId::GcData,
        CursorId::GcTrans,
    ];

    pub fn purpose(&self) -> BlockPurpose {
        match self {
            CursorId::UserData | CursorId::GcData => BlockPurpose::Data,
            CursorId::UserTrans | CursorId::GcTrans => BlockPurpose::Trans,
        }
    }
}

struct PoolInner {
    free: VecDeque<Pbn>,
    data_used: BTreeSet<Pbn>,
    trans_used: BTreeSet<Pbn>,
    // The ppn most recently handed out per cursor; `None` until first use.
    cursors: [Option<Ppn>; 4],
}

/// Owner of the block lists and append cursors. A free block becomes used
/// only by a cursor attaching to it, and returns to free only through
/// [`BlockPool::move_used_to_free`] after cleaning.
pub struct BlockPool {
    inner: Mutex<PoolInner>,
    pages_per_block: usize,
}

impl BlockPool {
    pub fn new(conf: &Config) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                free: (0..conf.blocks_per_dev).collect(),
                data_used: BTreeSet::new(),
                trans_used: BTreeSet::new(),
                cursors: [None; 4],
            }),
            pages_per_block: conf.pages_per_block,
        }
    }

    /// Hands out the next page of the cursor, attaching a fresh free block
    /// when the cursor is unset or just crossed a block boundary.
    pub fn next_page(&self, cursor: CursorId) -> Result<Ppn> {
        let mut inner = self.inner.lock().unwrap();
        let idx = cursor as usize;
        let ppn = match inner.cursors[idx] {
            Some(cur) if (cur + 1) % self.pages_per_block != 0 => cur + 1,
            _ => self.attach_free_block(&mut inner, cursor.purpose())?,
        };
        inner.cursors[idx] = Some(ppn);
        Ok(ppn)
    }

    /// Reserves `n` pages in cursor order.
    pub fn next_pages(&self, cursor: CursorId, n: usize) -> Result<Vec<Ppn>> {
        (0..n).map(|_| self.next_page(cursor)).collect()
    }

    fn attach_free_block(&self, inner: &mut PoolInner, purpose: BlockPurpose) -> Result<Ppn> {
        let Some(pbn) = inner.free.pop_front() else {
            return_errno_with_msg!(OutOfSpace, "free block list is empty");
        };
        match purpose {
            BlockPurpose::Data => inner.data_used.insert(pbn),
            BlockPurpose::Trans => inner.trans_used.insert(pbn),
        };
        Ok(pbn * self.pages_per_block)
    }

    /// Returns a cleaned block to the free list. The caller guarantees no
    /// page of the block is still valid.
    pub fn move_used_to_free(&self, pbn: Pbn, purpose: BlockPurpose) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(
            !Self::cursor_blocks_of(&inner, self.pages_per_block).contains(&pbn),
            "freeing the block under an append cursor"
        );
        let removed = match purpose {
            BlockPurpose::Data => inner.data_used.remove(&pbn),
            BlockPurpose::Trans => inner.trans_used.remove(&pbn),
        };
        debug_assert!(removed, "block {} was not in the {:?} used list", pbn, purpose);
        inner.free.push_back(pbn);
    }

    /// Blocks currently under an append cursor; never GC victims.
    pub fn cursor_blocks(&self) -> Vec<Pbn> {
        let inner = self.inner.lock().unwrap();
        Self::cursor_blocks_of(&inner, self.pages_per_block)
    }

    fn cursor_blocks_of(inner: &PoolInner, pages_per_block: usize) -> Vec<Pbn> {
        inner
            .cursors
            .iter()
            .flatten()
            .map(|ppn| ppn / pages_per_block)
            .collect()
    }

    pub fn used_blocks(&self, purpose: BlockPurpose) -> Vec<Pbn> {
        let inner = self.inner.lock().unwrap();
        match purpose {
            BlockPurpose::Data => inner.data_used.iter().copied().collect(),
            BlockPurpose::Trans => inner.trans_used.iter().copied().collect(),
        }
    }

    pub fn n_used(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.data_used.len() + inner.trans_used.len()
    }

    pub fn n_free(&self) -> usize {
        self.inner.lock().unwrap().free.len()
    }

    pub fn free_blocks(&self) -> Vec<Pbn> {
        self.inner.lock().unwrap().free.iter().copied().collect()
    }
}
