// SPDX-License-Identifier: MPL-2.0

//! Garbage collection: victim scoring, block cleaning, and the watermark
//! state machine gating it all.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BinaryHeap},
    sync::Mutex,
};

use tokio::time::Instant;

use crate::{
    cache::MappingCache,
    config::Config,
    directory::TransDirectory,
    flash::{FlashDevice, FlashOp, OpTag},
    oob::{Oob, PageOwner},
    page_store::PageStore,
    pool::{BlockPool, BlockPurpose, CursorId},
    prelude::*,
    stats::Stats,
};

/// Decides whether a GC round should start and whether a running round
/// should continue.
///
/// The first query of a round compares against the high watermark; later
/// queries compare against the low watermark, and a round that makes no
/// progress for `2 * pages_per_block` consecutive queries freezes until
/// the next refresh.
#[derive(Debug)]
pub(crate) struct GcDecider {
    high_blocks: f64,
    low_blocks: f64,
    max_freeze_calls: usize,
    stats: Arc<Stats>,
    first_call: bool,
    last_used: Option<usize>,
    freeze_count: usize,
    frozen: bool,
}

impl GcDecider {
    pub fn new(conf: &Config, stats: Arc<Stats>) -> Result<Self> {
        // A high watermark below 1/over_provisioning would let the logical
        // space fill the device and leave GC running forever.
        let min_high = 1.0 / conf.over_provisioning;
        let high_ratio = if conf.gc_threshold_ratio < min_high {
            info!(
                "high watermark clamped to {:.3} (configured {:.3})",
                min_high, conf.gc_threshold_ratio
            );
            min_high
        } else {
            conf.gc_threshold_ratio
        };
        let min_low = 0.8 / conf.over_provisioning;
        let low_ratio = if conf.gc_low_threshold_ratio < min_low {
            info!(
                "low watermark clamped to {:.3} (configured {:.3})",
                min_low, conf.gc_low_threshold_ratio
            );
            min_low
        } else {
            conf.gc_low_threshold_ratio
        };

        let spare_blocks = (1.0 - high_ratio) * conf.blocks_per_dev as f64;
        if spare_blocks < conf.min_spare_blocks as f64 {
            return_errno_with_msg!(
                InsufficientSpare,
                "too few spare blocks above the high watermark"
            );
        }

        Ok(Self {
            high_blocks: high_ratio * conf.blocks_per_dev as f64,
            low_blocks: low_ratio * conf.blocks_per_dev as f64,
            max_freeze_calls: 2 * conf.pages_per_block,
            stats,
            first_call: true,
            last_used: None,
            freeze_count: 0,
            frozen: false,
        })
    }

    /// Resets the round state.
    pub fn refresh(&mut self) {
        self.first_call = true;
        self.last_used = None;
        self.freeze_count = 0;
        self.frozen = false;
    }

    pub fn need_cleaning(&mut self, n_used: usize) -> bool {
        if self.first_call {
            self.first_call = false;
            return n_used as f64 > self.high_blocks;
        }
        if self.frozen {
            return false;
        }
        if self.freezed_too_long(n_used) {
            self.frozen = true;
            self.stats.count_gc_freeze();
            warn!(
                "gc frozen after {} queries without progress, {} blocks used",
                self.max_freeze_calls, n_used
            );
            return false;
        }
        n_used as f64 > self.low_blocks
    }

    fn improved(&mut self, n_used: usize) -> bool {
        let ret = match self.last_used {
            None => true,
            Some(last) => n_used < last,
        };
        self.last_used = Some(n_used);
        ret
    }

    fn freezed_too_long(&mut self, n_used: usize) -> bool {
        if self.improved(n_used) {
            self.freeze_count = 0;
            false
        } else {
            self.freeze_count += 1;
            self.freeze_count > self.max_freeze_calls
        }
    }
}

/// A cleaning candidate, ordered by descending benefit/cost and then by
/// ascending block id.
struct Victim {
    score: f64,
    pbn: Pbn,
    purpose: BlockPurpose,
}

impl PartialEq for Victim {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Victim {}

impl PartialOrd for Victim {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Victim {
    fn cmp(&self, other: &Self) -> Ordering {
        // Scores never compare as NaN: valid ratios are finite and ages
        // are non-negative.
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.pbn.cmp(&self.pbn))
    }
}

/// Scores every used block not under an append cursor.
///
/// `bene_cost = age * (1 - u) / (2u)`: an empty block is an infinite
/// bargain, a fully valid one is not worth touching at all.
fn build_victim_queue(pool: &BlockPool, oob: &Oob) -> BinaryHeap<Victim> {
    let now = Instant::now();
    let cursor_blocks = pool.cursor_blocks();
    let mut heap = BinaryHeap::new();

    for purpose in [BlockPurpose::Data, BlockPurpose::Trans] {
        for pbn in pool.used_blocks(purpose) {
            if cursor_blocks.contains(&pbn) {
                continue;
            }
            let u = oob.block_valid_ratio(pbn);
            if u >= 1.0 {
                continue;
            }
            let score = if u == 0.0 {
                f64::INFINITY
            } else {
                let last_inv = oob
                    .last_inv_time(pbn)
                    .expect("a partially valid block has an invalidation time");
                let age = now.duration_since(last_inv).as_secs_f64();
                age * (1.0 - u) / (2.0 * u)
            };
            heap.push(Victim {
                score,
                pbn,
                purpose,
            });
        }
    }
    heap
}

/// Relocates the valid pages of a data block, batches the mapping changes
/// per translation page, and erases the block.
pub(crate) struct DataBlockCleaner<D> {
    conf: Arc<Config>,
    flash: Arc<D>,
    oob: Arc<Oob>,
    pool: Arc<BlockPool>,
    cache: Arc<MappingCache<D>>,
    pages: Arc<PageStore>,
    stats: Arc<Stats>,
}

impl<D: FlashDevice> DataBlockCleaner<D> {
    pub async fn clean(&self, pbn: Pbn) -> Result<()> {
        debug_assert!(self.pool.used_blocks(BlockPurpose::Data).contains(&pbn));
        debug_assert!(!self.pool.cursor_blocks().contains(&pbn));

        let mut changes = Vec::new();
        for ppn in self.conf.block_page_range(pbn) {
            if !self.oob.is_valid(ppn) {
                continue;
            }
            changes.push(self.relocate_page(ppn).await?);
        }
        self.apply_changes(changes).await?;

        debug_assert_eq!(self.oob.n_valid_in_block(pbn), 0);
        self.pool.move_used_to_free(pbn, BlockPurpose::Data);
        self.erase(pbn).await
    }

    /// Moves one valid page through the gc-data append point. The mapping
    /// change is returned for batched application.
    async fn relocate_page(&self, ppn: Ppn) -> Result<(Lpn, Ppn)> {
        self.flash
            .rw_ppn_extent(ppn, 1, FlashOp::Read, OpTag::DataCleaning)
            .await?;
        let new_ppn = self.pool.next_page(CursorId::GcData)?;
        self.flash
            .rw_ppn_extent(new_ppn, 1, FlashOp::Write, OpTag::DataCleaning)
            .await?;

        let Some(PageOwner::Data(lpn)) = self.oob.owner(ppn) else {
            panic!("valid page {} in a data block has no data owner", ppn);
        };
        // The content is unchanged, so the write time travels with it.
        self.oob
            .relocate_page(PageOwner::Data(lpn), Some(ppn), new_ppn, false);
        self.pages.relocate(ppn, new_ppn);
        self.stats.count_data_pages_moved(1);
        Ok((lpn, new_ppn))
    }

    /// Applies relocation changes grouped by translation page.
    ///
    /// A group fully resident in the cache is overwritten there, dirty,
    /// with no flash traffic. A group with any non-resident entry goes
    /// through an on-flash merge; resident entries are then overwritten
    /// clean, consistent with what was just programmed.
    async fn apply_changes(&self, changes: Vec<(Lpn, Ppn)>) -> Result<()> {
        let mut groups: BTreeMap<Mvpn, Vec<(Lpn, Ppn)>> = BTreeMap::new();
        for (lpn, new_ppn) in changes {
            groups
                .entry(self.conf.lpn_to_m_vpn(lpn))
                .or_default()
                .push((lpn, new_ppn));
        }

        for (m_vpn, group) in groups {
            let mut resident = Vec::new();
            let mut any_absent = false;
            for &(lpn, new_ppn) in &group {
                if self.cache.contains(lpn) {
                    self.cache.overwrite_cached(lpn, Some(new_ppn), true);
                    resident.push((lpn, new_ppn));
                } else {
                    any_absent = true;
                }
            }
            if any_absent {
                let mappings: Vec<(Lpn, Option<Ppn>)> =
                    group.iter().map(|&(lpn, ppn)| (lpn, Some(ppn))).collect();
                self.cache
                    .update_translation_page_on_flash(
                        m_vpn,
                        &mappings,
                        OpTag::TransUpdateForDataGc,
                    )
                    .await?;
                for (lpn, new_ppn) in resident {
                    self.cache.overwrite_cached(lpn, Some(new_ppn), false);
                }
            }
        }
        Ok(())
    }

    async fn erase(&self, pbn: Pbn) -> Result<()> {
        self.oob.erase_block(pbn);
        self.pages.erase_ppns(self.conf.block_page_range(pbn));
        self.flash
            .erase_pbn_extent(pbn, 1, OpTag::DataCleaning)
            .await?;
        self.stats.count_block_erased();
        Ok(())
    }
}

/// Relocates the valid pages of a translation block and erases it.
pub(crate) struct TransBlockCleaner<D> {
    conf: Arc<Config>,
    flash: Arc<D>,
    oob: Arc<Oob>,
    pool: Arc<BlockPool>,
    directory: Arc<TransDirectory>,
    stats: Arc<Stats>,
}

impl<D: FlashDevice> TransBlockCleaner<D> {
    pub async fn clean(&self, pbn: Pbn) -> Result<()> {
        debug_assert!(self.pool.used_blocks(BlockPurpose::Trans).contains(&pbn));
        debug_assert!(!self.pool.cursor_blocks().contains(&pbn));

        for ppn in self.conf.block_page_range(pbn) {
            if !self.oob.is_valid(ppn) {
                continue;
            }
            self.relocate_page(ppn).await?;
        }

        debug_assert_eq!(self.oob.n_valid_in_block(pbn), 0);
        self.pool.move_used_to_free(pbn, BlockPurpose::Trans);
        self.oob.erase_block(pbn);
        self.flash
            .erase_pbn_extent(pbn, 1, OpTag::TransClean)
            .await?;
        self.stats.count_block_erased();
        Ok(())
    }

    async fn relocate_page(&self, m_ppn: Mppn) -> Result<()> {
        let Some(PageOwner::Trans(m_vpn)) = self.oob.owner(m_ppn) else {
            panic!(
                "valid page {} in a translation block has no trans owner",
                m_ppn
            );
        };
        self.flash
            .rw_ppn_extent(m_ppn, 1, FlashOp::Read, OpTag::TransClean)
            .await?;
        let new_m_ppn = self.pool.next_page(CursorId::GcTrans)?;
        self.flash
            .rw_ppn_extent(new_m_ppn, 1, FlashOp::Write, OpTag::TransClean)
            .await?;

        self.oob
            .relocate_page(PageOwner::Trans(m_vpn), Some(m_ppn), new_m_ppn, true);
        self.directory.update(m_vpn, new_m_ppn);
        self.stats.count_trans_pages_moved(1);
        Ok(())
    }
}

/// Runs GC rounds: picks victims by benefit/cost while the decider says
/// the round should go on.
pub(crate) struct GarbageCollector<D> {
    pool: Arc<BlockPool>,
    oob: Arc<Oob>,
    stats: Arc<Stats>,
    decider: Mutex<GcDecider>,
    data_cleaner: DataBlockCleaner<D>,
    trans_cleaner: TransBlockCleaner<D>,
}

impl<D: FlashDevice> GarbageCollector<D> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conf: Arc<Config>,
        flash: Arc<D>,
        pool: Arc<BlockPool>,
        oob: Arc<Oob>,
        directory: Arc<TransDirectory>,
        cache: Arc<MappingCache<D>>,
        pages: Arc<PageStore>,
        stats: Arc<Stats>,
    ) -> Result<Self> {
        let decider = GcDecider::new(&conf, stats.clone())?;
        let data_cleaner = DataBlockCleaner {
            conf: conf.clone(),
            flash: flash.clone(),
            oob: oob.clone(),
            pool: pool.clone(),
            cache,
            pages,
            stats: stats.clone(),
        };
        let trans_cleaner = TransBlockCleaner {
            conf,
            flash,
            oob: oob.clone(),
            pool: pool.clone(),
            directory,
            stats: stats.clone(),
        };
        Ok(Self {
            pool,
            oob,
            stats,
            decider: Mutex::new(decider),
            data_cleaner,
            trans_cleaner,
        })
    }

    /// One GC round. The victim queue is scored once when the round
    /// actually starts; running out of victims ends the round early.
    pub async fn run(&self) -> Result<()> {
        self.decider.lock().unwrap().refresh();
        let mut victims: Option<BinaryHeap<Victim>> = None;

        loop {
            let n_used = self.pool.n_used();
            if !self.decider.lock().unwrap().need_cleaning(n_used) {
                break;
            }
            let queue = victims.get_or_insert_with(|| {
                self.stats.count_gc_round();
                debug!(
                    "gc round starts: {} blocks used, {} free",
                    n_used,
                    self.pool.n_free()
                );
                build_victim_queue(&self.pool, &self.oob)
            });
            let Some(victim) = queue.pop() else {
                debug!("gc round out of victims at {} blocks used", n_used);
                break;
            };
            match victim.purpose {
                BlockPurpose::Data => self.data_cleaner.clean(victim.pbn).await?,
                BlockPurpose::Trans => self.trans_cleaner.clean(victim.pbn).await?,
            }
        }

        if victims.is_some() {
            debug!(
                "gc round ends: {} blocks used, {} free",
                self.pool.n_used(),
                self.pool.n_free()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::flash::SimFlash;

    fn toy_conf() -> Config {
        Config {
            pages_per_block: 4,
            blocks_per_dev: 16,
            page_size: 16,
            sector_size: 16,
            trans_entry_bytes: 4,
            cache_entry_bytes: 8,
            mapping_cache_bytes: 32,
            min_spare_blocks: 0,
            ..Default::default()
        }
    }

    struct Rig {
        conf: Arc<Config>,
        flash: Arc<SimFlash>,
        pool: Arc<BlockPool>,
        oob: Arc<Oob>,
        directory: Arc<TransDirectory>,
        gmt: Arc<crate::gmt::MappingOnFlash>,
        cache: Arc<MappingCache<SimFlash>>,
        pages: Arc<PageStore>,
        stats: Arc<Stats>,
    }

    fn rig(conf: Config) -> Rig {
        let conf = Arc::new(conf);
        let flash = Arc::new(SimFlash::new(&conf, 1));
        let pool = Arc::new(BlockPool::new(&conf));
        let oob = Arc::new(Oob::new(&conf));
        let directory = Arc::new(TransDirectory::init(&conf, &pool, &oob).unwrap());
        let gmt = Arc::new(crate::gmt::MappingOnFlash::new(&conf));
        let stats = Arc::new(Stats::new());
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
        Rig {
            conf,
            flash,
            pool,
            oob,
            directory,
            gmt,
            cache,
            pages,
            stats,
        }
    }

    fn data_cleaner(r: &Rig) -> DataBlockCleaner<SimFlash> {
        DataBlockCleaner {
            conf: r.conf.clone(),
            flash: r.flash.clone(),
            oob: r.oob.clone(),
            pool: r.pool.clone(),
            cache: r.cache.clone(),
            pages: r.pages.clone(),
            stats: r.stats.clone(),
        }
    }

    fn trans_cleaner(r: &Rig) -> TransBlockCleaner<SimFlash> {
        TransBlockCleaner {
            conf: r.conf.clone(),
            flash: r.flash.clone(),
            oob: r.oob.clone(),
            pool: r.pool.clone(),
            directory: r.directory.clone(),
            stats: r.stats.clone(),
        }
    }

    #[test]
    fn decider_round_shape() {
        let stats = Arc::new(Stats::new());
        let mut decider = GcDecider::new(&toy_conf(), stats).unwrap();
        // High watermark 15.2, low 14.4.
        decider.refresh();
        assert!(decider.need_cleaning(16));
        // Progress keeps the round alive down to the low watermark.
        assert!(decider.need_cleaning(15));
        assert!(!decider.need_cleaning(14));

        // Below the high watermark no round starts at all.
        decider.refresh();
        assert!(!decider.need_cleaning(15));
    }

    #[test]
    fn decider_freezes_without_progress() {
        let stats = Arc::new(Stats::new());
        let mut decider = GcDecider::new(&toy_conf(), stats.clone()).unwrap();
        decider.refresh();
        assert!(decider.need_cleaning(16));

        // 2 * pages_per_block = 8 stalled queries are tolerated; the first
        // repeat has no baseline yet and still counts as progress.
        for _ in 0..9 {
            assert!(decider.need_cleaning(16));
        }
        assert!(!decider.need_cleaning(16));
        assert_eq!(stats.snapshot().gc_freezes, 1);
        // Frozen stays frozen for the rest of the round.
        assert!(!decider.need_cleaning(16));

        decider.refresh();
        assert!(decider.need_cleaning(16));
    }

    #[test]
    fn decider_clamps_watermarks() {
        let conf = Config {
            gc_threshold_ratio: 0.5,
            gc_low_threshold_ratio: 0.3,
            ..toy_conf()
        };
        let stats = Arc::new(Stats::new());
        let mut decider = GcDecider::new(&conf, stats).unwrap();
        // 1/1.28 clamps the high watermark to 12.5 blocks.
        decider.refresh();
        assert!(!decider.need_cleaning(12));
        decider.refresh();
        assert!(decider.need_cleaning(13));
        // 0.8/1.28 clamps the low watermark to 10 blocks.
        assert!(!decider.need_cleaning(10));
    }

    #[test]
    fn insufficient_spare_fails_init() {
        let conf = Config {
            min_spare_blocks: 32,
            ..toy_conf()
        };
        let stats = Arc::new(Stats::new());
        let err = GcDecider::new(&conf, stats).unwrap_err();
        assert_eq!(err.errno(), crate::error::Errno::InsufficientSpare);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn victims_ordered_by_benefit_cost() {
        let conf = Config {
            pages_per_block: 5,
            blocks_per_dev: 8,
            page_size: 20,
            mapping_cache_bytes: 40,
            ..toy_conf()
        };
        let r = rig(conf);
        // Three data blocks past the translation reserve; keep the cursor
        // out of the victims by allocating a page into a fourth block.
        let base = r.pool.next_pages(CursorId::UserData, 16).unwrap()[0];
        for (i, ppn) in (base..base + 15).enumerate() {
            r.oob.relocate_page(PageOwner::Data(i), None, ppn, true);
        }
        let (b0, b1, b2) = (base / 5, base / 5 + 1, base / 5 + 2);

        // b0 keeps 1 of 5 pages valid, b1 and b2 keep 4 of 5, all
        // invalidated at the same instant.
        for ppn in base + 1..base + 5 {
            r.oob.invalidate(ppn);
        }
        r.oob.invalidate(base + 5);
        r.oob.invalidate(base + 10);
        // Give the shared garbage a non-zero age.
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;

        let mut queue = build_victim_queue(&r.pool, &r.oob);
        // Equal ages: low valid ratio wins; equal everything: block id.
        assert_eq!(queue.pop().unwrap().pbn, b0);
        assert_eq!(queue.pop().unwrap().pbn, b1);
        assert_eq!(queue.pop().unwrap().pbn, b2);
        assert!(queue.pop().is_none());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn older_garbage_wins_at_equal_ratio() {
        let r = rig(toy_conf());
        let base = r.pool.next_pages(CursorId::UserData, 12).unwrap()[0];
        for (i, ppn) in (base..base + 8).enumerate() {
            r.oob.relocate_page(PageOwner::Data(i), None, ppn, true);
        }
        let (b0, b1) = (base / 4, base / 4 + 1);

        // Both blocks end at valid ratio 0.5; b0's last invalidation is
        // 10s old, b1's only 1s.
        r.oob.invalidate(base);
        r.oob.invalidate(base + 1);
        tokio::time::sleep(std::time::Duration::from_secs(9)).await;
        r.oob.invalidate(base + 4);
        r.oob.invalidate(base + 5);
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        let mut queue = build_victim_queue(&r.pool, &r.oob);
        assert_eq!(queue.pop().unwrap().pbn, b0);
        assert_eq!(queue.pop().unwrap().pbn, b1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn fully_valid_blocks_are_never_victims() {
        let r = rig(toy_conf());
        let base = r.pool.next_pages(CursorId::UserData, 8).unwrap()[0];
        for (i, ppn) in (base..base + 4).enumerate() {
            r.oob.relocate_page(PageOwner::Data(i), None, ppn, true);
        }
        let queue = build_victim_queue(&r.pool, &r.oob);
        assert!(queue.is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn data_cleaner_mixed_group_merges_and_cleans_cache(
    ) -> crate::prelude::Result<()> {
        let r = rig(toy_conf());

        // Two live pages of translation page 0 in the first data block;
        // the fifth allocation walks the data cursor off that block so it
        // can be a victim.
        let ppns = r.pool.next_pages(CursorId::UserData, 5)?;
        let ppns = &ppns[..2];
        for (lpn, &ppn) in [0usize, 1].iter().zip(ppns) {
            r.oob.relocate_page(PageOwner::Data(*lpn), None, ppn, true);
            r.gmt.update(*lpn, Some(ppn));
            r.pages.write(ppn, vec![*lpn as u8]);
        }
        let victim = ppns[0] / 4;

        // lpn 0 is resident (dirty), lpn 1 is not: the mixed rule.
        r.cache.update(0, Some(ppns[0])).await?;

        data_cleaner(&r).clean(victim).await?;

        // Both mappings moved to the gc-data append point.
        let new0 = r.cache.peek(0).expect("still resident").expect("mapped");
        let new1 = r.gmt.lookup(1).expect("mapped on flash");
        assert_ne!(new0, ppns[0]);
        assert_ne!(new1, ppns[1]);
        assert!(r.oob.is_valid(new0));
        assert!(r.oob.is_valid(new1));
        assert_eq!(r.oob.owner(new0), Some(PageOwner::Data(0)));
        // The on-flash merge also covered lpn 0, so its row is clean now.
        assert_eq!(r.gmt.lookup(0), Some(new0));
        assert_eq!(r.pages.read(new0).as_deref(), Some([0u8].as_slice()));
        assert_eq!(r.pages.read(new1).as_deref(), Some([1u8].as_slice()));

        // The victim went free and fully erased.
        assert!(!r.pool.used_blocks(BlockPurpose::Data).contains(&victim));
        for ppn in r.conf.block_page_range(victim) {
            assert_eq!(r.oob.state(ppn), crate::bitmap::PageState::Erased);
        }
        // One merged translation program for the group.
        assert_eq!(
            r.flash
                .op_count(FlashOp::Write, OpTag::TransUpdateForDataGc),
            1
        );
        assert_eq!(r.flash.erase_count(OpTag::DataCleaning), 1);
        Ok(())
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn data_cleaner_all_resident_group_stays_in_cache(
    ) -> crate::prelude::Result<()> {
        let r = rig(toy_conf());

        let ppns = r.pool.next_pages(CursorId::UserData, 5)?;
        let ppns = &ppns[..2];
        for (lpn, &ppn) in [0usize, 1].iter().zip(ppns) {
            r.oob.relocate_page(PageOwner::Data(*lpn), None, ppn, true);
            r.cache.update(*lpn, Some(ppn)).await?;
        }

        data_cleaner(&r).clean(ppns[0] / 4).await?;

        // No translation traffic at all: the cache absorbs the changes as
        // dirty rows.
        assert_eq!(
            r.flash
                .op_count(FlashOp::Write, OpTag::TransUpdateForDataGc),
            0
        );
        assert!(r.cache.peek(0).unwrap().is_some());
        assert_eq!(r.gmt.lookup(0), None);
        Ok(())
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn trans_cleaner_repoints_directory() -> crate::prelude::Result<()> {
        let r = rig(toy_conf());

        // Supersede m_vpn 1's page so the first translation block is a
        // partial victim (m_vpns 0..4 live in block 0 after mount).
        let new_m_ppn = r.pool.next_page(CursorId::UserTrans)?;
        let old_m_ppn = r.directory.lookup(1);
        r.oob
            .relocate_page(PageOwner::Trans(1), Some(old_m_ppn), new_m_ppn, true);
        r.directory.update(1, new_m_ppn);

        let survivors: Vec<Mvpn> = vec![0, 2, 3];
        let old_ppns: Vec<Ppn> = survivors.iter().map(|&v| r.directory.lookup(v)).collect();

        trans_cleaner(&r).clean(0).await?;

        for (&m_vpn, &old) in survivors.iter().zip(&old_ppns) {
            let moved = r.directory.lookup(m_vpn);
            assert_ne!(moved, old);
            assert!(r.oob.is_valid(moved));
            assert_eq!(r.oob.owner(moved), Some(PageOwner::Trans(m_vpn)));
        }
        assert!(!r.pool.used_blocks(BlockPurpose::Trans).contains(&0));
        for ppn in r.conf.block_page_range(0) {
            assert_eq!(r.oob.state(ppn), crate::bitmap::PageState::Erased);
        }
        assert_eq!(r.flash.op_count(FlashOp::Write, OpTag::TransClean), 3);
        assert_eq!(r.flash.erase_count(OpTag::TransClean), 1);
        assert_eq!(r.stats.snapshot().trans_pages_moved, 3);
        Ok(())
    }
}
