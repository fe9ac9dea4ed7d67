// SPDX-License-Identifier: MPL-2.0

//! A page-mapped flash translation layer simulator.
//!
//! Implements the DFTL scheme: the full lpn -> ppn map lives in
//! translation pages on the simulated flash, and only a bounded cached
//! subset is resident. Every host I/O flows through the mapping cache,
//! which pages translation pages in and out through the same device it
//! manages; a benefit/cost garbage collector relocates live pages and
//! recycles blocks behind watermarks.
//!
//! The flash device is a seam: anything implementing [`FlashDevice`]
//! provides the timing model. [`SimFlash`] is the built-in
//! channel-parallel one. All suspending operations compose as futures on
//! a cooperative single-threaded runtime.

#![deny(unsafe_code)]
#![allow(dead_code)]

mod addr;
mod bitmap;
mod cache;
mod config;
mod directory;
mod error;
mod flash;
mod ftl;
mod gc;
mod gmt;
mod oob;
mod page_store;
mod pool;
mod prelude;
mod stats;

pub use self::{
    addr::{Extent, Lpn, Mppn, Mvpn, Pbn, Ppn},
    config::Config,
    error::{Errno, Error},
    flash::{FlashDevice, FlashOp, OpTag, SimFlash},
    ftl::Ftl,
    stats::{Stats, StatsSnapshot},
};
