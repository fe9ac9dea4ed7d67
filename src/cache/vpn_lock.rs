// SPDX-License-Identifier: MPL-2.0

//! Per-translation-page mutual exclusion.
//!
//! At most one task may be reading, merging, or programming a given
//! translation page. Waiters are served in FIFO order, and the set of
//! currently held m_vpns is visible so the evictor can steer around pages
//! other tasks are working on.

use std::sync::Mutex;

use hashbrown::{HashMap, HashSet};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::prelude::*;

struct Inner {
    tokens: HashMap<Mvpn, Arc<AsyncMutex<()>>>,
    locked: HashSet<Mvpn>,
}

pub(crate) struct VpnLockPool {
    inner: Mutex<Inner>,
}

impl VpnLockPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tokens: HashMap::new(),
                locked: HashSet::new(),
            }),
        }
    }

    /// Waits for the page's token; the returned guard holds it until drop.
    pub async fn acquire(self: &Arc<Self>, m_vpn: Mvpn) -> VpnGuard {
        let token = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .tokens
                .entry(m_vpn)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = token.lock_owned().await;
        self.inner.lock().unwrap().locked.insert(m_vpn);
        VpnGuard {
            pool: self.clone(),
            m_vpn,
            _guard: guard,
        }
    }

    pub fn is_locked(&self, m_vpn: Mvpn) -> bool {
        self.inner.lock().unwrap().locked.contains(&m_vpn)
    }

    /// Snapshot of every m_vpn whose token is currently held.
    pub fn locked_vpns(&self) -> HashSet<Mvpn> {
        self.inner.lock().unwrap().locked.clone()
    }
}

pub(crate) struct VpnGuard {
    pool: Arc<VpnLockPool>,
    m_vpn: Mvpn,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for VpnGuard {
    fn drop(&mut self) {
        self.pool.inner.lock().unwrap().locked.remove(&self.m_vpn);
    }
}
