// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::desc::ImageId;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

/// Half-open `[base, limit)` window an image is loaded into.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Region {
    #[serde(deserialize_with = "de_u64")]
    pub base: u64,
    #[serde(deserialize_with = "de_u64")]
    pub limit: u64,
}

impl Region {
    pub const fn new(base: u64, limit: u64) -> Region {
        Region { base, limit }
    }

    /// `limit - base`, if the region is non-empty and fits an image size.
    pub fn size(&self) -> Option<u32> {
        match self.limit.checked_sub(self.base) {
            Some(0) | None => None,
            Some(n) => u32::try_from(n).ok(),
        }
    }
}

/// Per-image load regions and the address the next-stage parameters are
/// published at.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MemoryMap {
    #[serde(deserialize_with = "de_u64")]
    pub params_base: u64,
    #[serde(rename = "region", default)]
    pub regions: BTreeMap<ImageId, Region>,
}

impl MemoryMap {
    pub fn new(params_base: u64) -> MemoryMap {
        MemoryMap {
            params_base,
            regions: BTreeMap::new(),
        }
    }

    pub fn with_region(mut self, id: ImageId, base: u64, limit: u64) -> MemoryMap {
        self.regions.insert(id, Region::new(base, limit));
        self
    }

    pub fn region(&self, id: ImageId) -> Option<&Region> {
        self.regions.get(&id)
    }

    /// Default RZ/G2L layout: trusted firmware in DDR above the CM33
    /// windows, CM33 images where the core fetches them, U-Boot last.
    pub fn rzg2l() -> MemoryMap {
        MemoryMap::new(0x4402_0000)
            .with_region(ImageId::BL31, 0x4400_0000, 0x4402_0000)
            .with_region(ImageId::BL32, 0x4410_0000, 0x4420_0000)
            .with_region(ImageId::FW_CONFIG, 0x1001_0000, 0x1001_FF80)
            .with_region(ImageId::SOC_FW_CONFIG, 0x1001_FF80, 0x1002_0000)
            .with_region(ImageId::HW_CONFIG, 0x0001_0000, 0x0001_0800)
            .with_region(ImageId::RMM, 0x4280_0000, 0x4300_0000)
            .with_region(ImageId::BL331, 0x4800_0000, 0x4808_0000)
            .with_region(ImageId::BL332, 0x5000_0000, 0x5020_0000)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntOrStr {
    Int(u64),
    Str(String),
}

/// Accepts a TOML integer or a string such as `"0x4400_0000"`.
pub fn de_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match IntOrStr::deserialize(deserializer)? {
        IntOrStr::Int(v) => Ok(v),
        IntOrStr::Str(s) => parse_int::parse::<u64>(&s.replace('_', ""))
            .map_err(|e| serde::de::Error::custom(format!("bad address `{s}`: {e}"))),
    }
}

pub fn de_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let v = de_u64(deserializer)?;
    u32::try_from(v).map_err(|_| serde::de::Error::custom(format!("{v:#x} does not fit 32 bits")))
}
