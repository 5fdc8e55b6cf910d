// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::config::Topology;
use rzbl2_images::{ImageId, ResolvedHandoff};
use thiserror::Error;

/// BL1 service that runs an image on behalf of a BL2 below EL3.
pub const BL1_SMC_RUN_IMAGE: u32 = 0x4;

/// How control leaves BL2.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transfer {
    /// BL2 is at EL3: `eret` straight into the image.
    Direct,
    /// BL2 is at S-EL1: ask BL1 with `smc`, passing the entry point.
    Smc { fid: u32 },
}

impl Transfer {
    pub fn for_topology(topology: Topology) -> Transfer {
        match topology {
            Topology::El3 => Transfer::Direct,
            Topology::Sel1 => Transfer::Smc {
                fid: BL1_SMC_RUN_IMAGE,
            },
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("transfer to {image} was rejected with status {status}")]
pub struct HandoffRejected {
    pub image: ImageId,
    pub status: i64,
}

/// The one-way transfer.
///
/// An implementation that succeeds never returns; a return value means the
/// transfer was refused synchronously.
pub trait Handoff {
    fn run_next_image(&mut self, transfer: Transfer, next: ResolvedHandoff) -> HandoffRejected;
}
