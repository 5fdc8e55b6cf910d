// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! BL2 for the RZ/G2L: load and authenticate the image chain, start the
//! CM33, hand off to BL31.

pub mod bl2;
pub mod config;
pub mod error;
pub mod handoff;
pub mod platform;

pub use bl2::{Bl2, Collaborators};
pub use config::{Bl2Config, ChainProfile, ExecWidth, Topology};
pub use error::{BootError, InitError, InitStage, PlatformError};
pub use handoff::{Handoff, HandoffRejected, Transfer, BL1_SMC_RUN_IMAGE};
pub use platform::{AuthModule, CryptoModule, FirmwareUpdate, MeasuredBootBackend, Platform};

pub const VERSION_STRING: &str = concat!("v", env!("CARGO_PKG_VERSION"), "(release)");
pub const BUILD_MESSAGE: &str = concat!("Built : ", env!("CARGO_PKG_NAME"));
