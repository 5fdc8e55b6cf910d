// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::memmap::Region;
use bitfield::bitfield;
use packed_struct::prelude::*;
use std::fmt;
use std::str::FromStr;

/// Identifier of an image in the chain.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize)]
#[serde(try_from = "String")]
pub struct ImageId(pub u32);

impl ImageId {
    pub const BL2: ImageId = ImageId(1);
    pub const BL31: ImageId = ImageId(3);
    pub const BL32: ImageId = ImageId(4);
    pub const BL33: ImageId = ImageId(5);
    pub const HW_CONFIG: ImageId = ImageId(23);
    pub const SOC_FW_CONFIG: ImageId = ImageId(25);
    pub const FW_CONFIG: ImageId = ImageId(31);
    pub const RMM: ImageId = ImageId(35);
    pub const BL331: ImageId = ImageId(40);
    pub const BL332: ImageId = ImageId(41);

    /// End of chain; never the id of a real image.
    pub const INVALID: ImageId = ImageId(0xFFFF_FFFF);

    const NAMES: [(ImageId, &'static str); 11] = [
        (ImageId::BL2, "bl2"),
        (ImageId::BL31, "bl31"),
        (ImageId::BL32, "bl32"),
        (ImageId::BL33, "bl33"),
        (ImageId::HW_CONFIG, "hw-config"),
        (ImageId::SOC_FW_CONFIG, "soc-fw-config"),
        (ImageId::FW_CONFIG, "fw-config"),
        (ImageId::RMM, "rmm"),
        (ImageId::BL331, "bl331"),
        (ImageId::BL332, "bl332"),
        (ImageId::INVALID, "invalid"),
    ];

    pub fn name(self) -> Option<&'static str> {
        ImageId::NAMES
            .iter()
            .find(|(id, _)| *id == self)
            .map(|(_, name)| *name)
    }

    pub fn is_sentinel(self) -> bool {
        self == ImageId::INVALID
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "image {}", self.0),
        }
    }
}

impl fmt::Debug for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageId({}, {})", self.0, self)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown image `{0}`")]
pub struct UnknownImage(String);

impl FromStr for ImageId {
    type Err = UnknownImage;

    /// Accepts the image name (`bl31`, `fw-config`, ...) or a number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if let Some((id, _)) = ImageId::NAMES.iter().find(|(_, name)| *name == lower) {
            return Ok(*id);
        }
        parse_int::parse::<u32>(s)
            .map(ImageId)
            .map_err(|_| UnknownImage(s.to_owned()))
    }
}

impl TryFrom<String> for ImageId {
    type Error = UnknownImage;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExceptionLevel {
    El0 = 0,
    El1 = 1,
    El2 = 2,
    El3 = 3,
}

/// `DAIF` with every exception masked.
pub const DISABLE_ALL_EXCEPTIONS: u8 = 0xF;

bitfield! {
    /// Saved program status the next image starts with.
    #[derive(Copy, Clone, PartialEq, Eq, Default)]
    pub struct Spsr(u32);
    impl Debug;
    /// Use SP_ELx rather than SP_EL0
    pub sp_elx, set_sp_elx: 0;
    pub u8, el, set_el: 3, 2;
    /// Target executes in AArch32
    pub aarch32, set_aarch32: 4;
    pub u8, daif, set_daif: 9, 6;
}

impl Spsr {
    /// `SPSR_64(el, MODE_SP_ELX, daif)`
    pub fn aarch64(el: ExceptionLevel, daif: u8) -> Spsr {
        let mut s = Spsr(0);
        s.set_el(el as u8);
        s.set_sp_elx(true);
        s.set_daif(daif);
        s
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SecurityState {
    Secure,
    NonSecure,
}

/// Where and how an image starts executing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EntryPointInfo {
    pub pc: u64,
    pub spsr: Spsr,
    pub args: [u64; 8],
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ImageAttributes {
    pub security: SecurityState,
    pub executable: bool,
    /// Run the one-time platform setup before loading this image.
    pub plat_setup: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub load_base: u64,
    pub max_size: u32,
    pub attributes: ImageAttributes,
}

/// One image of the chain and the id of the image after it.
///
/// Non-executable nodes still carry an entry point; its `pc` is just the
/// load address and is never jumped to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ImageDescNode {
    pub id: ImageId,
    pub ep: EntryPointInfo,
    pub image: ImageInfo,
    pub next: ImageId,
}

impl ImageDescNode {
    /// Non-secure, non-executable data image covering all of `region`,
    /// ending the chain. Adjust with the builder methods below.
    pub fn new(id: ImageId, region: &Region) -> ImageDescNode {
        ImageDescNode {
            id,
            ep: EntryPointInfo {
                pc: region.base,
                spsr: Spsr::default(),
                args: [0; 8],
            },
            image: ImageInfo {
                load_base: region.base,
                max_size: region.size().unwrap_or(0),
                attributes: ImageAttributes {
                    security: SecurityState::NonSecure,
                    executable: false,
                    plat_setup: false,
                },
            },
            next: ImageId::INVALID,
        }
    }

    pub fn secure(mut self) -> Self {
        self.image.attributes.security = SecurityState::Secure;
        self
    }

    pub fn executable(mut self) -> Self {
        self.image.attributes.executable = true;
        self
    }

    pub fn plat_setup(mut self) -> Self {
        self.image.attributes.plat_setup = true;
        self
    }

    pub fn spsr(mut self, spsr: Spsr) -> Self {
        self.ep.spsr = spsr;
        self
    }

    /// Set entry point argument `x<index>`.
    ///
    /// # Panics
    ///
    /// If `index` is 8 or more; an entry point carries `x0..x7` only.
    pub fn arg(mut self, index: usize, value: u64) -> Self {
        self.ep.args[index] = value;
        self
    }

    pub fn next(mut self, next: ImageId) -> Self {
        self.next = next;
        self
    }

    pub fn is_executable(&self) -> bool {
        self.image.attributes.executable
    }

    /// Entry point attribute word as the next stage reads it.
    pub fn ep_attr(&self) -> u32 {
        let mut attr = match self.image.attributes.security {
            SecurityState::Secure => EP_SECURE,
            SecurityState::NonSecure => EP_NON_SECURE,
        };
        if self.is_executable() {
            attr |= EP_EXECUTABLE;
        }
        attr
    }
}

pub const PARAM_EP: u8 = 0x01;
pub const PARAM_BL_PARAMS: u8 = 0x05;
pub const VERSION_2: u8 = 0x02;

pub const EP_SECURE: u32 = 0x0;
pub const EP_NON_SECURE: u32 = 0x1;
pub const EP_EXECUTABLE: u32 = 0x8;
pub const EP_FIRST_EXE: u32 = 0x10;

/// Common header in front of every parameter structure handed to the
/// next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PackedStruct)]
#[packed_struct(size_bytes = "8", bit_numbering = "msb0", endian = "lsb")]
pub struct ParamHeader {
    #[packed_field(bytes = "0")]
    pub ty: u8,
    #[packed_field(bytes = "1")]
    pub version: u8,
    #[packed_field(bytes = "2..=3")]
    pub size: u16,
    #[packed_field(bytes = "4..=7")]
    pub attr: u32,
}

impl ParamHeader {
    pub fn new(ty: u8, size: u16, attr: u32) -> ParamHeader {
        ParamHeader {
            ty,
            version: VERSION_2,
            size,
            attr,
        }
    }
}
