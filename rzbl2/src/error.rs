// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::handoff::HandoffRejected;
use rzbl2_images::{ChainError, LoadChainError};
use rzbl2_regs::PollTimeout;
use strum_macros::Display;
use thiserror::Error;

/// Subsystem whose initialisation failed.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
#[strum(serialize_all = "kebab-case")]
pub enum InitStage {
    FirmwareUpdate,
    Crypto,
    Auth,
    MeasuredBoot,
    MeasuredBootFinish,
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("not supported on this platform")]
    Unsupported,
    #[error("hardware fault: {0}")]
    Hardware(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform hook returned {0}")]
    Status(i32),
    #[error("pointer authentication registers are saved but the CPU has no pointer authentication")]
    PauthMissing,
    #[error("{0}")]
    Other(String),
}

/// Everything that stops a boot. None of these are recoverable; the
/// caller ends up in the platform panic path.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("{stage} initialisation failed")]
    Init {
        stage: InitStage,
        #[source]
        source: InitError,
    },
    #[error("platform setup failed")]
    Platform(#[from] PlatformError),
    #[error("invalid image chain")]
    Chain(#[from] ChainError),
    #[error("loading the image chain failed")]
    Load(#[from] LoadChainError),
    #[error("CM33 bring-up did not complete")]
    Coprocessor(#[from] PollTimeout),
    #[error(transparent)]
    HandoffRejected(#[from] HandoffRejected),
}

impl BootError {
    pub(crate) fn init(stage: InitStage) -> impl FnOnce(InitError) -> BootError {
        move |source| BootError::Init { stage, source }
    }
}
