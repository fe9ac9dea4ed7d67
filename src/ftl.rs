// SPDX-License-Identifier: MPL-2.0

//! The FTL facade.
//!
//! Host extents are split into sub-extents sharing one translation page;
//! the sub-extents run concurrently, each pairing its user-data transfer
//! with the mapping updates it implies. After every host operation the
//! garbage collector gets a chance to run.

use futures::future::{try_join, try_join_all};

use crate::{
    addr::Extent,
    cache::MappingCache,
    config::Config,
    directory::TransDirectory,
    flash::{FlashDevice, FlashOp, OpTag},
    gc::GarbageCollector,
    gmt::MappingOnFlash,
    oob::{Oob, PageOwner},
    page_store::PageStore,
    pool::{BlockPool, CursorId},
    prelude::*,
    stats::{Stats, StatsSnapshot},
};

/// A page-mapped FTL over an asynchronous flash device.
///
/// Components are wired once at mount and share nothing but `Arc`s; the
/// facade serializes nothing itself beyond awaiting its own sub-extents,
/// leaving per-translation-page ordering to the cache's token pool.
pub struct Ftl<D> {
    conf: Arc<Config>,
    flash: Arc<D>,
    pool: Arc<BlockPool>,
    oob: Arc<Oob>,
    directory: Arc<TransDirectory>,
    gmt: Arc<MappingOnFlash>,
    cache: Arc<MappingCache<D>>,
    pages: Arc<PageStore>,
    gc: GarbageCollector<D>,
    stats: Arc<Stats>,
}

impl<D: FlashDevice> Ftl<D> {
    /// Mounts the FTL: validates the geometry, seeds the block pool, and
    /// reserves every translation page.
    pub fn new(conf: Config, flash: Arc<D>) -> Result<Self> {
        conf.validate()?;
        let conf = Arc::new(conf);
        let stats = Arc::new(Stats::new());
        let pool = Arc::new(BlockPool::new(&conf));
        let oob = Arc::new(Oob::new(&conf));
        let directory = Arc::new(TransDirectory::init(&conf, &pool, &oob)?);
        let gmt = Arc::new(MappingOnFlash::new(&conf));
        let cache = Arc::new(MappingCache::new(
            conf.clone(),
            flash.clone(),
            pool.clone(),
            oob.clone(),
            directory.clone(),
            gmt.clone(),
            stats.clone(),
        ));
        let pages = Arc::new(PageStore::new());
        let gc = GarbageCollector::new(
            conf.clone(),
            flash.clone(),
            pool.clone(),
            oob.clone(),
            directory.clone(),
            cache.clone(),
            pages.clone(),
            stats.clone(),
        )?;

        info!(
            "dftl mounted: {} blocks of {} pages, {} translation pages reserved, cache {} rows",
            conf.blocks_per_dev,
            conf.pages_per_block,
            conf.total_translation_pages(),
            conf.n_cache_entries()
        );
        Ok(Self {
            conf,
            flash,
            pool,
            oob,
            directory,
            gmt,
            cache,
            pages,
            gc,
            stats,
        })
    }

    pub fn config(&self) -> &Config {
        &self.conf
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Writes one page of payload per lpn of the extent.
    pub async fn write_ext(&self, ext: Extent, data: Vec<Vec<u8>>) -> Result<()> {
        self.check_extent(&ext)?;
        if data.len() != ext.lpn_count {
            return_errno_with_msg!(InvalidArgs, "one payload page per lpn required");
        }

        let groups = ext.split_by_trans_page(self.conf.entries_per_trans_page());
        let new_ppns = self.pool.next_pages(CursorId::UserData, ext.lpn_count)?;

        try_join_all(groups.iter().map(|group| {
            let off = group.lpn_start - ext.lpn_start;
            self.write_group(
                *group,
                &new_ppns[off..off + group.lpn_count],
                &data[off..off + group.lpn_count],
            )
        }))
        .await?;

        self.gc.run().await
    }

    /// The per-lpn contents of the extent; `None` for lpns never written
    /// or discarded.
    pub async fn read_ext(&self, ext: Extent) -> Result<Vec<Option<Vec<u8>>>> {
        self.check_extent(&ext)?;
        let groups = ext.split_by_trans_page(self.conf.entries_per_trans_page());
        let per_group = try_join_all(groups.into_iter().map(|group| self.read_group(group))).await?;
        let result = per_group.into_iter().flatten().collect();
        self.gc.run().await?;
        Ok(result)
    }

    /// Drops the extent's mappings and invalidates its pages. Idempotent.
    pub async fn discard_ext(&self, ext: Extent) -> Result<()> {
        self.check_extent(&ext)?;
        let groups = ext.split_by_trans_page(self.conf.entries_per_trans_page());
        try_join_all(groups.into_iter().map(|group| self.discard_group(group))).await?;
        self.gc.run().await
    }

    fn check_extent(&self, ext: &Extent) -> Result<()> {
        if ext.lpn_end() > self.conf.total_pages() {
            return_errno_with_msg!(InvalidArgs, "extent beyond the logical space");
        }
        Ok(())
    }

    /// One program of the group's pages, concurrent with the mapping and
    /// OOB updates those pages imply.
    async fn write_group(&self, group: Extent, new_ppns: &[Ppn], data: &[Vec<u8>]) -> Result<()> {
        let program = async {
            self.flash
                .rw_ppns(new_ppns, FlashOp::Write, OpTag::DataUser)
                .await?;
            for (&ppn, page) in new_ppns.iter().zip(data) {
                self.pages.write(ppn, page.clone());
            }
            Ok::<(), Error>(())
        };

        let update_meta = async {
            let mut old_ppns = Vec::with_capacity(group.lpn_count);
            for lpn in group.lpn_iter() {
                old_ppns.push(self.cache.lookup(lpn).await?);
            }
            for ((lpn, old_ppn), &new_ppn) in group.lpn_iter().zip(old_ppns).zip(new_ppns) {
                self.cache.update(lpn, Some(new_ppn)).await?;
                self.oob
                    .relocate_page(PageOwner::Data(lpn), old_ppn, new_ppn, true);
            }
            Ok::<(), Error>(())
        };

        try_join(program, update_meta).await?;
        Ok(())
    }

    async fn read_group(&self, group: Extent) -> Result<Vec<Option<Vec<u8>>>> {
        let mut mapped = Vec::with_capacity(group.lpn_count);
        for lpn in group.lpn_iter() {
            mapped.push(self.cache.lookup(lpn).await?);
        }

        // One batched read of the pages that exist; uninitiated lpns cost
        // no data I/O.
        let live: Vec<Ppn> = mapped.iter().copied().flatten().collect();
        self.flash
            .rw_ppns(&live, FlashOp::Read, OpTag::DataUser)
            .await?;

        Ok(mapped
            .into_iter()
            .map(|ppn| ppn.and_then(|ppn| self.pages.read(ppn)))
            .collect())
    }

    async fn discard_group(&self, group: Extent) -> Result<()> {
        for lpn in group.lpn_iter() {
            let Some(ppn) = self.cache.lookup(lpn).await? else {
                continue;
            };
            if self.oob.is_valid(ppn) {
                self.oob.invalidate(ppn);
            }
            self.cache.update(lpn, None).await?;
        }
        Ok(())
    }
}
