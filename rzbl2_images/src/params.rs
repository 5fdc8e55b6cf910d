// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parameters BL2 leaves for the image it hands off to.
//!
//! Serialized layout, all little-endian:
//!
//! ```text
//! ParamHeader { PARAM_BL_PARAMS, VERSION_2, size = 8, attr = entry count }
//! per entry:
//!   ParamHeader { PARAM_EP, VERSION_2, size = ENTRY_SIZE, attr = EP_* bits }
//!   image id: u32
//!   spsr: u32
//!   pc: u64
//!   args: [u64; 8]
//! ```

use crate::chain::ImageChain;
use crate::desc::{
    EntryPointInfo, ImageId, ParamHeader, EP_FIRST_EXE, PARAM_BL_PARAMS, PARAM_EP,
};
use byteorder::{ByteOrder, LittleEndian};
use packed_struct::prelude::*;

pub const ENTRY_SIZE: usize = 8 + 4 + 4 + 8 + 8 * 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextBlEntry {
    pub id: ImageId,
    pub attr: u32,
    pub ep: EntryPointInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NextBlParams {
    pub entries: Vec<NextBlEntry>,
}

impl NextBlParams {
    /// Executable images reachable from `head`, in hand-off order. The
    /// first one is flagged `EP_FIRST_EXE`.
    pub fn collect(chain: &ImageChain, head: ImageId) -> NextBlParams {
        let entries = chain
            .walk(head)
            .filter(|n| n.is_executable())
            .enumerate()
            .map(|(i, n)| NextBlEntry {
                id: n.id,
                attr: if i == 0 {
                    n.ep_attr() | EP_FIRST_EXE
                } else {
                    n.ep_attr()
                },
                ep: n.ep,
            })
            .collect();
        NextBlParams { entries }
    }

    pub fn head(&self) -> Option<&NextBlEntry> {
        self.entries.first()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PackingError> {
        let count = u32::try_from(self.entries.len()).map_err(|_| PackingError::InvalidValue)?;
        let mut out = Vec::with_capacity(8 + self.entries.len() * ENTRY_SIZE);
        out.extend_from_slice(&ParamHeader::new(PARAM_BL_PARAMS, 8, count).pack()?);

        for e in &self.entries {
            out.extend_from_slice(&ParamHeader::new(PARAM_EP, ENTRY_SIZE as u16, e.attr).pack()?);
            let mut rec = [0u8; ENTRY_SIZE - 8];
            LittleEndian::write_u32(&mut rec[0..4], e.id.0);
            LittleEndian::write_u32(&mut rec[4..8], e.ep.spsr.0);
            LittleEndian::write_u64(&mut rec[8..16], e.ep.pc);
            LittleEndian::write_u64_into(&e.ep.args, &mut rec[16..]);
            out.extend_from_slice(&rec);
        }
        Ok(out)
    }
}
