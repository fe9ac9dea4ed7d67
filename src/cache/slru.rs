// SPDX-License-Identifier: MPL-2.0

//! Segmented-LRU recency index over mapping-cache rows.
//!
//! Two linked lists threaded through row ids: a probationary segment for
//! entries seen once and a protected segment (half the capacity) for
//! entries seen again. Entries filled from flash that nobody asked for
//! enter at the probationary cold end, so a bulk fill cannot wipe out the
//! hot set.

use hashbrown::HashMap;

use crate::prelude::*;

pub(crate) type RowId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Segment {
    Probationary,
    Protected,
}

#[derive(Clone, Copy, Default)]
struct Link {
    prev: Option<RowId>,
    next: Option<RowId>,
}

struct SegList {
    // `head` is the least recent end.
    head: Option<RowId>,
    tail: Option<RowId>,
    len: usize,
}

impl SegList {
    fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }
}

pub(crate) struct SlruIndex {
    map: HashMap<Lpn, RowId>,
    links: Vec<Link>,
    seg_of: Vec<Segment>,
    prob: SegList,
    prot: SegList,
    prot_cap: usize,
}

impl SlruIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            links: vec![Link::default(); capacity],
            seg_of: vec![Segment::Probationary; capacity],
            prob: SegList::new(),
            prot: SegList::new(),
            prot_cap: capacity.div_ceil(2),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn contains(&self, lpn: Lpn) -> bool {
        self.map.contains_key(&lpn)
    }

    pub fn peek(&self, lpn: Lpn) -> Option<RowId> {
        self.map.get(&lpn).copied()
    }

    /// Inserts a fresh entry as the most recent of the probationary segment.
    pub fn insert_mru(&mut self, lpn: Lpn, row: RowId) {
        let replaced = self.map.insert(lpn, row);
        debug_assert!(replaced.is_none(), "lpn {} indexed twice", lpn);
        self.push_tail(Segment::Probationary, row);
    }

    /// Inserts a fill-only entry as the least recent of the probationary
    /// segment.
    pub fn insert_cold(&mut self, lpn: Lpn, row: RowId) {
        let replaced = self.map.insert(lpn, row);
        debug_assert!(replaced.is_none(), "lpn {} indexed twice", lpn);
        self.push_head(Segment::Probationary, row);
    }

    /// Records a hit: probationary entries are promoted, protected entries
    /// refreshed. A protected overflow demotes its coldest entry back to
    /// the probationary hot end.
    pub fn touch(&mut self, lpn: Lpn) {
        let row = self.map[&lpn];
        match self.seg_of[row] {
            Segment::Probationary => {
                self.unlink(Segment::Probationary, row);
                self.push_tail(Segment::Protected, row);
                if self.prot.len > self.prot_cap {
                    let demoted = self.pop_head(Segment::Protected).unwrap();
                    self.push_tail(Segment::Probationary, demoted);
                }
            }
            Segment::Protected => {
                self.unlink(Segment::Protected, row);
                self.push_tail(Segment::Protected, row);
            }
        }
    }

    pub fn remove(&mut self, lpn: Lpn) -> RowId {
        let row = self.map.remove(&lpn).expect("lpn not indexed");
        self.unlink(self.seg_of[row], row);
        row
    }

    /// Rows from least to most recently used: the probationary segment
    /// first, then the protected one.
    pub fn iter_lru_to_mru(&self) -> impl Iterator<Item = RowId> + '_ {
        SegIter {
            index: self,
            cur: self.prob.head,
            seg: Segment::Probationary,
        }
    }

    fn list(&mut self, seg: Segment) -> &mut SegList {
        match seg {
            Segment::Probationary => &mut self.prob,
            Segment::Protected => &mut self.prot,
        }
    }

    fn push_tail(&mut self, seg: Segment, row: RowId) {
        let old_tail = self.list(seg).tail;
        self.links[row] = Link {
            prev: old_tail,
            next: None,
        };
        if let Some(t) = old_tail {
            self.links[t].next = Some(row);
        }
        let list = self.list(seg);
        list.tail = Some(row);
        if list.head.is_none() {
            list.head = Some(row);
        }
        list.len += 1;
        self.seg_of[row] = seg;
    }

    fn push_head(&mut self, seg: Segment, row: RowId) {
        let old_head = self.list(seg).head;
        self.links[row] = Link {
            prev: None,
            next: old_head,
        };
        if let Some(h) = old_head {
            self.links[h].prev = Some(row);
        }
        let list = self.list(seg);
        list.head = Some(row);
        if list.tail.is_none() {
            list.tail = Some(row);
        }
        list.len += 1;
        self.seg_of[row] = seg;
    }

    fn pop_head(&mut self, seg: Segment) -> Option<RowId> {
        let head = self.list(seg).head?;
        self.unlink(seg, head);
        Some(head)
    }

    fn unlink(&mut self, seg: Segment, row: RowId) {
        debug_assert_eq!(self.seg_of[row], seg);
        let Link { prev, next } = self.links[row];
        match prev {
            Some(p) => self.links[p].next = next,
            None => self.list(seg).head = next,
        }
        match next {
            Some(n) => self.links[n].prev = prev,
            None => self.list(seg).tail = prev,
        }
        self.links[row] = Link::default();
        self.list(seg).len -= 1;
    }
}

struct SegIter<'a> {
    index: &'a SlruIndex,
    cur: Option<RowId>,
    seg: Segment,
}

impl Iterator for SegIter<'_> {
    type Item = RowId;

    fn next(&mut self) -> Option<RowId> {
        if self.cur.is_none() && self.seg == Segment::Probationary {
            self.seg = Segment::Protected;
            self.cur = self.index.prot.head;
        }
        let row = self.cur?;
        self.cur = self.index.links[row].next;
        Some(row)
    }
}
