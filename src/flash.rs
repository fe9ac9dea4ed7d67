// SPDX-License-Identifier: MPL-2.0

//! The flash-device seam.
//!
//! The core only ever tells the device *which* pages it touches and with
//! what intent; payloads are modeled separately (see `page_store`). A real
//! timing model plugs in behind [`FlashDevice`]; [`SimFlash`] is the
//! in-crate device used by tests and demos.

use std::{sync::Mutex, time::Duration};

use hashbrown::HashMap;

use crate::{config::Config, prelude::*};

/// Direction of a page transfer.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum FlashOp {
    Read,
    Write,
}

/// Provenance tag carried by every flash operation.
///
/// Tags only feed statistics; they never change behavior.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum OpTag {
    /// Host data reads and programs.
    DataUser,
    /// Data-page moves and erases during garbage collection.
    DataCleaning,
    /// Translation-page fills and write-backs of the mapping cache.
    TransCache,
    /// Translation-page moves and erases during garbage collection.
    TransClean,
    /// Translation-page merges forced by data-block cleaning.
    TransUpdateForDataGc,
}

impl OpTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpTag::DataUser => "data.user",
            OpTag::DataCleaning => "data.cleaning",
            OpTag::TransCache => "trans.cache",
            OpTag::TransClean => "trans.clean",
            OpTag::TransUpdateForDataGc => "trans.update.for.data.gc",
        }
    }
}

/// An asynchronous NAND-like array of erase-before-write blocks.
///
/// Every method suspends the caller for however long the device decides the
/// operation takes; completion order is the cooperative scheduler's business.
#[allow(async_fn_in_trait)]
pub trait FlashDevice {
    /// Transfers the given pages, batched with whatever parallelism the
    /// device offers.
    async fn rw_ppns(&self, ppns: &[Ppn], op: FlashOp, tag: OpTag) -> Result<()>;

    /// Transfers `n` physically contiguous pages starting at `ppn`.
    async fn rw_ppn_extent(&self, ppn: Ppn, n: usize, op: FlashOp, tag: OpTag) -> Result<()>;

    /// Erases `n` contiguous blocks starting at `pbn`.
    async fn erase_pbn_extent(&self, pbn: Pbn, n: usize, tag: OpTag) -> Result<()>;
}

/// A timing-only flash device with channel-level parallelism.
///
/// Blocks are interleaved across channels, so a batched transfer costs the
/// latency of its most loaded channel. Per-tag operation counts are kept for
/// tests and reporting.
pub struct SimFlash {
    pages_per_block: usize,
    n_channels: usize,
    read_latency: Duration,
    write_latency: Duration,
    erase_latency: Duration,
    rw_counts: Mutex<HashMap<(FlashOp, OpTag), u64>>,
    erase_counts: Mutex<HashMap<OpTag, u64>>,
}

impl SimFlash {
    /// Typical SLC NAND latencies.
    const READ_US: u64 = 20;
    const WRITE_US: u64 = 200;
    const ERASE_US: u64 = 1500;

    pub fn new(conf: &Config, n_channels: usize) -> Self {
        Self::with_latencies(
            conf,
            n_channels,
            Duration::from_micros(Self::READ_US),
            Duration::from_micros(Self::WRITE_US),
            Duration::from_micros(Self::ERASE_US),
        )
    }

    pub fn with_latencies(
        conf: &Config,
        n_channels: usize,
        read_latency: Duration,
        write_latency: Duration,
        erase_latency: Duration,
    ) -> Self {
        assert!(n_channels > 0);
        Self {
            pages_per_block: conf.pages_per_block,
            n_channels,
            read_latency,
            write_latency,
            erase_latency,
            rw_counts: Mutex::new(HashMap::new()),
            erase_counts: Mutex::new(HashMap::new()),
        }
    }

    fn channel_of(&self, ppn: Ppn) -> usize {
        (ppn / self.pages_per_block) % self.n_channels
    }

    /// Latency of a batched transfer: the most loaded channel serializes.
    fn batch_latency(&self, ppns: &[Ppn], per_page: Duration) -> Duration {
        let mut per_channel = vec![0u32; self.n_channels];
        for &ppn in ppns {
            per_channel[self.channel_of(ppn)] += 1;
        }
        per_page * per_channel.into_iter().max().unwrap_or(0)
    }

    pub fn op_count(&self, op: FlashOp, tag: OpTag) -> u64 {
        *self.rw_counts.lock().unwrap().get(&(op, tag)).unwrap_or(&0)
    }

    pub fn erase_count(&self, tag: OpTag) -> u64 {
        *self.erase_counts.lock().unwrap().get(&tag).unwrap_or(&0)
    }

    fn note_rw(&self, op: FlashOp, tag: OpTag, n: u64) {
        *self.rw_counts.lock().unwrap().entry((op, tag)).or_insert(0) += n;
    }
}

impl FlashDevice for SimFlash {
    async fn rw_ppns(&self, ppns: &[Ppn], op: FlashOp, tag: OpTag) -> Result<()> {
        if ppns.is_empty() {
            return Ok(());
        }
        self.note_rw(op, tag, ppns.len() as u64);
        let per_page = match op {
            FlashOp::Read => self.read_latency,
            FlashOp::Write => self.write_latency,
        };
        tokio::time::sleep(self.batch_latency(ppns, per_page)).await;
        Ok(())
    }

    async fn rw_ppn_extent(&self, ppn: Ppn, n: usize, op: FlashOp, tag: OpTag) -> Result<()> {
        let ppns: Vec<Ppn> = (ppn..ppn + n).collect();
        self.rw_ppns(&ppns, op, tag).await
    }

    async fn erase_pbn_extent(&self, pbn: Pbn, n: usize, tag: OpTag) -> Result<()> {
        let _ = pbn;
        *self.erase_counts.lock().unwrap().entry(tag).or_insert(0) += n as u64;
        tokio::time::sleep(self.erase_latency * n as u32).await;
        Ok(())
    }
}
