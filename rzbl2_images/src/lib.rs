// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image chain description, validation and loading.

pub mod chain;
pub mod desc;
pub mod loader;
pub mod memmap;
pub mod params;
pub mod rz;

pub use chain::{ChainBuilder, ChainError, FragmentProvider, ImageChain};
pub use desc::{EntryPointInfo, ExceptionLevel, ImageDescNode, ImageId, SecurityState, Spsr};
pub use loader::{
    AuthError, Authenticator, ChainLoader, HookError, ImageSource, LoadChainError, LoadError,
    LoadHooks, LoadedImage, MeasureError, MeasuredBoot, ResolvedHandoff,
};
pub use memmap::{MemoryMap, Region};
pub use params::NextBlParams;
