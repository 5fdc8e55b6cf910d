// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::chain::ImageChain;
use crate::desc::{EntryPointInfo, ImageDescNode, ImageId};
use crate::params::NextBlParams;
use log::{info, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("image is not present on the boot device")]
    NotFound,
    #[error("image is {len:#x} bytes but only {max_size:#x} fit")]
    TooLarge { len: u64, max_size: u32 },
    #[error("boot device read failed")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("image is too short to carry its authentication data")]
    Truncated,
    #[error("expected {expected:#x}, computed {actual:#x}")]
    Mismatch { expected: u32, actual: u32 },
    #[error("authentication failed: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("event log is full")]
    LogFull,
    #[error("measurement failed: {0}")]
    Backend(String),
}

/// Nonzero status returned by a platform hook.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("platform hook failed with status {0}")]
pub struct HookError(pub i32);

#[derive(Debug, Error)]
pub enum LoadChainError {
    #[error("{0} is not part of the image chain")]
    UnknownStart(ImageId),
    #[error("failed to load {id}")]
    Load {
        id: ImageId,
        #[source]
        source: LoadError,
    },
    #[error("failed to authenticate {id}")]
    Auth {
        id: ImageId,
        #[source]
        source: AuthError,
    },
    #[error("failed to measure {id}")]
    Measure {
        id: ImageId,
        #[source]
        source: MeasureError,
    },
    #[error("pre-load handling of {id} failed")]
    PreLoad {
        id: ImageId,
        #[source]
        source: HookError,
    },
    #[error("post-load handling of {id} failed")]
    PostLoad {
        id: ImageId,
        #[source]
        source: HookError,
    },
    #[error("publishing the next-stage parameters failed")]
    Publish(#[source] HookError),
    #[error("no executable image reachable from {0}")]
    NoExecutable(ImageId),
}

/// Where an image ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    pub id: ImageId,
    pub base: u64,
    pub len: u32,
}

/// Copies an image from the boot device into its region. Returns the
/// number of bytes written, which must not exceed `max_size`.
pub trait ImageSource {
    fn load_image(&mut self, node: &ImageDescNode) -> Result<u32, LoadError>;
}

pub trait Authenticator {
    fn authenticate(&mut self, image: &LoadedImage) -> Result<(), AuthError>;
}

pub trait MeasuredBoot {
    fn measure_image(&mut self, image: &LoadedImage) -> Result<(), MeasureError>;
}

/// Platform hooks around each image. All default to doing nothing.
pub trait LoadHooks {
    fn platform_setup(&mut self) {}

    fn pre_image_load(&mut self, _id: ImageId) -> Result<(), HookError> {
        Ok(())
    }

    fn post_image_load(&mut self, _id: ImageId) -> Result<(), HookError> {
        Ok(())
    }

    fn flush_next_bl_params(&mut self, _params: &NextBlParams) -> Result<(), HookError> {
        Ok(())
    }
}

/// Image the boot stage hands off to. Owned by whoever performs the
/// transfer; not copyable so it is consumed exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct ResolvedHandoff {
    pub image: ImageId,
    pub ep: EntryPointInfo,
}

pub struct ChainLoader<'a, S: ?Sized, A: ?Sized, M: ?Sized, H: ?Sized> {
    pub source: &'a mut S,
    pub auth: &'a mut A,
    pub measure: &'a mut M,
    pub hooks: &'a mut H,
    /// Filled into the first executable image's `arg0` when it is unset.
    pub params_base: u64,
}

impl<S, A, M, H> ChainLoader<'_, S, A, M, H>
where
    S: ImageSource + ?Sized,
    A: Authenticator + ?Sized,
    M: MeasuredBoot + ?Sized,
    H: LoadHooks + ?Sized,
{
    /// Loads, authenticates and measures every image from `start` to the
    /// end of the chain, then resolves the first executable one. The
    /// first failure aborts the walk.
    pub fn load_chain(
        &mut self,
        chain: &ImageChain,
        start: ImageId,
    ) -> Result<ResolvedHandoff, LoadChainError> {
        if chain.get(start).is_none() {
            return Err(LoadChainError::UnknownStart(start));
        }

        let mut plat_setup_done = false;
        let mut first_exe = None;
        for node in chain.walk(start) {
            let id = node.id;
            if node.image.attributes.plat_setup {
                if plat_setup_done {
                    warn!("BL2: Platform setup already done!!");
                } else {
                    info!("BL2: Doing platform setup");
                    self.hooks.platform_setup();
                    plat_setup_done = true;
                }
            }

            self.hooks
                .pre_image_load(id)
                .map_err(|source| LoadChainError::PreLoad { id, source })?;

            info!("BL2: Loading image id {}", id.0);
            let loaded = self.load_one(node)?;
            self.auth
                .authenticate(&loaded)
                .map_err(|source| LoadChainError::Auth { id, source })?;
            self.measure
                .measure_image(&loaded)
                .map_err(|source| LoadChainError::Measure { id, source })?;

            self.hooks
                .post_image_load(id)
                .map_err(|source| LoadChainError::PostLoad { id, source })?;

            if first_exe.is_none() && node.is_executable() {
                first_exe = Some(id);
            }
        }

        let head = first_exe.ok_or(LoadChainError::NoExecutable(start))?;
        let mut params = NextBlParams::collect(chain, head);
        let Some(entry) = params.entries.first_mut() else {
            return Err(LoadChainError::NoExecutable(start));
        };
        if entry.ep.args[0] == 0 {
            entry.ep.args[0] = self.params_base;
        }
        let ep = entry.ep;

        self.hooks
            .flush_next_bl_params(&params)
            .map_err(LoadChainError::Publish)?;

        Ok(ResolvedHandoff { image: head, ep })
    }

    fn load_one(&mut self, node: &ImageDescNode) -> Result<LoadedImage, LoadChainError> {
        let id = node.id;
        let len = self
            .source
            .load_image(node)
            .map_err(|source| LoadChainError::Load { id, source })?;
        if len > node.image.max_size {
            return Err(LoadChainError::Load {
                id,
                source: LoadError::TooLarge {
                    len: u64::from(len),
                    max_size: node.image.max_size,
                },
            });
        }
        Ok(LoadedImage {
            id,
            base: node.image.load_base,
            len,
        })
    }
}
