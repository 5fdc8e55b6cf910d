// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use rzbl2_images::memmap::{de_u32, de_u64};
use rzbl2_images::rz::{Bl31Fragment, Bl32Fragment, Bl33Fragment, Cm33Fragment};
use rzbl2_images::{ChainBuilder, ChainError, ExceptionLevel, FragmentProvider, ImageChain, MemoryMap};
use rzbl2_regs::cm33::{BootMode, NON_SECURE_VECTOR, SECURE_VECTOR};
use serde::Deserialize;

/// Where BL2 runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// Reset straight into BL2 at EL3.
    #[default]
    El3,
    /// Loaded by BL1, running at S-EL1.
    Sel1,
}

impl Topology {
    /// The level BL2 itself runs at.
    pub fn exception_level(self) -> ExceptionLevel {
        match self {
            Topology::El3 => ExceptionLevel::El3,
            Topology::Sel1 => ExceptionLevel::El1,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecWidth {
    #[default]
    Aarch64,
    Aarch32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Cm33Config {
    pub enabled: bool,
    /// Recorded but not acted on; the core always starts in normal mode.
    pub debug: bool,
    #[serde(deserialize_with = "de_u32")]
    pub secure_vector: u32,
    #[serde(deserialize_with = "de_u32")]
    pub non_secure_vector: u32,
}

impl Default for Cm33Config {
    fn default() -> Self {
        Cm33Config {
            enabled: true,
            debug: true,
            secure_vector: SECURE_VECTOR,
            non_secure_vector: NON_SECURE_VECTOR,
        }
    }
}

impl Cm33Config {
    pub fn mode(&self) -> BootMode {
        if self.debug {
            BootMode::Debug
        } else {
            BootMode::Normal
        }
    }
}

/// Exception level BL332 is entered at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "u8")]
pub enum Bl33El {
    El1,
    #[default]
    El2,
}

impl TryFrom<u8> for Bl33El {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Bl33El::El1),
            2 => Ok(Bl33El::El2),
            _ => Err(format!("bl33-el must be 1 or 2, not {v}")),
        }
    }
}

impl From<Bl33El> for ExceptionLevel {
    fn from(el: Bl33El) -> ExceptionLevel {
        match el {
            Bl33El::El1 => ExceptionLevel::El1,
            Bl33El::El2 => ExceptionLevel::El2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ChainConfig {
    pub bl32: bool,
    pub bl33_el: Bl33El,
    #[serde(deserialize_with = "de_u64")]
    pub bl332_arg0: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Bl2Config {
    pub topology: Topology,
    pub execution_width: ExecWidth,
    pub pauth: bool,
    pub firmware_update: bool,
    pub cm33: Cm33Config,
    pub memory_map: MemoryMap,
    pub chain: ChainConfig,
}

impl Default for Bl2Config {
    fn default() -> Self {
        Bl2Config {
            topology: Topology::default(),
            execution_width: ExecWidth::default(),
            pauth: false,
            firmware_update: false,
            cm33: Cm33Config::default(),
            memory_map: MemoryMap::rzg2l(),
            chain: ChainConfig::default(),
        }
    }
}

impl Bl2Config {
    pub fn from_toml(s: &str) -> Result<Bl2Config, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn profile(&self) -> ChainProfile<'_> {
        ChainProfile { config: self }
    }
}

/// Turns a configuration into the fragment providers that make up its
/// image chain.
pub struct ChainProfile<'a> {
    config: &'a Bl2Config,
}

impl ChainProfile<'_> {
    pub fn providers(&self) -> Vec<Box<dyn FragmentProvider>> {
        let chain = &self.config.chain;
        let mut providers: Vec<Box<dyn FragmentProvider>> =
            vec![Box::new(Bl31Fragment { bl32: chain.bl32 })];
        if chain.bl32 {
            providers.push(Box::new(Bl32Fragment));
        }
        providers.push(Box::new(Cm33Fragment));
        providers.push(Box::new(Bl33Fragment {
            el: chain.bl33_el.into(),
            arg0: chain.bl332_arg0,
        }));
        providers
    }

    pub fn build(&self) -> Result<ImageChain, ChainError> {
        let map = &self.config.memory_map;
        let mut builder = ChainBuilder::new();
        for provider in self.providers() {
            builder.register_provider(provider.as_ref(), map)?;
        }
        builder.build(map)
    }
}
