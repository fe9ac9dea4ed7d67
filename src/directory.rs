// SPDX-License-Identifier: MPL-2.0

//! The global translation directory (m_vpn -> m_ppn).

use std::sync::Mutex;

use hashbrown::HashMap;

use crate::{
    config::Config,
    oob::{Oob, PageOwner},
    pool::{BlockPool, CursorId},
    prelude::*,
};

/// In-memory index of where each translation page currently lives.
///
/// The vendor is assumed to persist this across power cycles; at mount we
/// synthesize it by reserving one physical page per translation page
/// through the translation append cursor, with no simulated I/O.
pub struct TransDirectory {
    mapping: Mutex<HashMap<Mvpn, Mppn>>,
}

impl TransDirectory {
    /// Builds the directory and reserves every translation page.
    pub fn init(conf: &Config, pool: &BlockPool, oob: &Oob) -> Result<Self> {
        let dir = Self {
            mapping: Mutex::new(HashMap::new()),
        };
        for m_vpn in 0..conf.total_translation_pages() {
            let m_ppn = pool.next_page(CursorId::UserTrans)?;
            dir.add(m_vpn, m_ppn);
            oob.relocate_page(PageOwner::Trans(m_vpn), None, m_ppn, true);
        }
        Ok(dir)
    }

    pub fn add(&self, m_vpn: Mvpn, m_ppn: Mppn) {
        let replaced = self.mapping.lock().unwrap().insert(m_vpn, m_ppn);
        debug_assert!(replaced.is_none(), "m_vpn {} added twice", m_vpn);
    }

    pub fn update(&self, m_vpn: Mvpn, m_ppn: Mppn) {
        self.mapping.lock().unwrap().insert(m_vpn, m_ppn);
    }

    /// Every m_vpn is seeded at mount, so lookup never fails.
    pub fn lookup(&self, m_vpn: Mvpn) -> Mppn {
        *self
            .mapping
            .lock()
            .unwrap()
            .get(&m_vpn)
            .unwrap_or_else(|| panic!("m_vpn {} missing from the directory", m_vpn))
    }
}
