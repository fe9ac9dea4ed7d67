// SPDX-License-Identifier: MPL-2.0

pub(crate) use std::sync::Arc;

pub(crate) use crate::{
    addr::{Lpn, Mppn, Mvpn, Pbn, Ppn},
    error::{Errno::*, Error},
    return_errno, return_errno_with_msg,
};

pub(crate) type Result<T> = core::result::Result<T, Error>;

#[allow(unused_imports)]
pub(crate) use log::{debug, error, info, trace, warn};
