// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SiP runtime service call contract.
//!
//! BL2 does not serve these calls; the runtime firmware it hands off to
//! does. The identifiers and status codes live here so both sides (and
//! host tools) agree on them.

use bitfield::bitfield;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

pub const SIP_SVC_VERSION_MAJOR: u32 = 1;
pub const SIP_SVC_VERSION_MINOR: u32 = 0;

/// Mailbox error code for a response with no finer diagnosis.
pub const GENERIC_RESPONSE_ERROR: u32 = 0x3FF;

#[derive(Debug, Display, EnumString, FromPrimitive, ToPrimitive, Copy, Clone, Eq, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum SipStatus {
    Ok = 0,
    Busy = 0x1,
    Rejected = 0x2,
    NoResponse = 0x3,
    Error = 0x4,
    /// Remote system update subsystem failure
    RsuError = 0x7,
}

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
#[error("unknown SiP status {0:#x}")]
pub struct UnknownStatus(pub u64);

impl TryFrom<u64> for SipStatus {
    type Error = UnknownStatus;

    fn try_from(v: u64) -> Result<Self, UnknownStatus> {
        SipStatus::from_u64(v).ok_or(UnknownStatus(v))
    }
}

/// What a SiP call returns: status in `x0`, mailbox error code in `x1`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SipReturn {
    pub status: SipStatus,
    pub mbox_error: u32,
}

impl SipReturn {
    pub fn ok() -> SipReturn {
        SipReturn {
            status: SipStatus::Ok,
            mbox_error: 0,
        }
    }

    pub fn error(mbox_error: u32) -> SipReturn {
        SipReturn {
            status: SipStatus::Error,
            mbox_error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SipStatus::Ok
    }

    pub fn from_regs(x0: u64, x1: u64) -> Result<SipReturn, UnknownStatus> {
        Ok(SipReturn {
            status: SipStatus::try_from(x0)?,
            // Only the low word carries the mailbox code.
            mbox_error: x1 as u32,
        })
    }

    pub fn to_regs(&self) -> (u64, u64) {
        (
            self.status.to_u64().unwrap_or(SipStatus::Error as u64),
            u64::from(self.mbox_error),
        )
    }
}

/// Owning entity of an SMC function identifier, bits 29:24.
#[derive(Debug, Display, FromPrimitive, Copy, Clone, Eq, PartialEq)]
pub enum Owner {
    Arm = 0,
    Cpu = 1,
    Sip = 2,
    Oem = 3,
    StandardSecure = 4,
    StandardHypervisor = 5,
    VendorHypervisor = 6,
}

bitfield! {
    /// SMC calling convention function identifier.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct FunctionId(u32);
    impl Debug;
    /// Fast call; yielding otherwise
    pub fast, _: 31;
    /// SMC64 calling convention; SMC32 otherwise
    pub smc64, _: 30;
    pub u8, owner_number, _: 29, 24;
    pub u16, number, _: 15, 0;
}

impl FunctionId {
    /// `None` for the reserved and trusted application/OS ranges.
    pub fn owner(&self) -> Option<Owner> {
        Owner::from_u8(self.owner_number())
    }

    pub fn is_sip(&self) -> bool {
        self.owner() == Some(Owner::Sip)
    }

    pub fn known(&self) -> Option<SipFunction> {
        SipFunction::from_u32(self.0)
    }
}

#[derive(Debug, Display, Copy, Clone, Eq, PartialEq)]
pub enum SipService {
    FpgaReconfig,
    SecureRegister,
    RemoteSystemUpdate,
    HardwareMonitor,
    Ecc,
    Mailbox,
    FpgaCrypto,
    Hps,
    ServiceQuery,
}

/// SiP function identifiers the runtime firmware serves.
#[derive(
    Debug, Display, EnumString, EnumIter, FromPrimitive, ToPrimitive, Copy, Clone, Eq, PartialEq,
)]
#[strum(serialize_all = "kebab-case")]
#[repr(u32)]
pub enum SipFunction {
    FpgaConfigStart = 0xC200_0001,
    FpgaConfigWrite = 0x4200_0002,
    FpgaConfigCompletedWrite = 0xC200_0003,
    FpgaConfigIsdone = 0xC200_0004,
    FpgaConfigGetMem = 0xC200_0005,

    RegRead = 0xC200_0007,
    RegWrite = 0xC200_0008,
    RegUpdate = 0xC200_0009,

    RsuStatus = 0xC200_000B,
    RsuUpdate = 0xC200_000C,
    RsuNotify = 0xC200_000E,
    RsuRetryCounter = 0xC200_000F,
    RsuDcmfVersion = 0xC200_0010,
    RsuCopyDcmfVersion = 0xC200_0011,
    RsuMaxRetry = 0xC200_0012,
    RsuCopyMaxRetry = 0xC200_0013,
    RsuDcmfStatus = 0xC200_0014,
    RsuCopyDcmfStatus = 0xC200_0015,

    EccDbe = 0xC200_000D,

    HwmonReadtemp = 0xC200_0020,
    HwmonReadvolt = 0xC200_0021,

    MboxSendCmd = 0xC200_001E,
    FirmwareVersion = 0xC200_001F,

    HpsSetBridges = 0xC200_0032,
    GetUsercode = 0xC200_003D,
    GetRomPatchSha384 = 0xC200_0040,

    FcsRandomNumber = 0xC200_005A,
    FcsCryption = 0x4200_005B,
    FcsSendCertificate = 0x4200_005D,
    FcsGetProvisionData = 0x4200_005E,
    FcsCntrSetPreauth = 0xC200_005F,
    FcsPsgsigmaTeardown = 0xC200_0064,
    FcsChipId = 0xC200_0065,
    FcsAttestationSubkey = 0xC200_0066,
    FcsAttestationMeasurements = 0xC200_0067,
    FcsGetAttestationCert = 0xC200_0068,
    FcsCreateCertOnReload = 0xC200_0069,
    FcsOpenCsSession = 0xC200_006E,
    FcsCloseCsSession = 0xC200_006F,
    FcsImportCsKey = 0x4200_0070,
    FcsExportCsKey = 0xC200_0071,
    FcsRemoveCsKey = 0xC200_0072,
    FcsGetCsKeyInfo = 0xC200_0073,

    SvcVersion = 0xC200_0200,
    SvcCallCount = 0x8200_FF00,
    SvcUid = 0x8200_FF01,
    SvcVersionQuery = 0x8200_FF03,
}

impl SipFunction {
    pub fn id(self) -> FunctionId {
        FunctionId(self as u32)
    }

    pub fn service(self) -> SipService {
        use SipFunction::*;
        match self {
            FpgaConfigStart | FpgaConfigWrite | FpgaConfigCompletedWrite | FpgaConfigIsdone
            | FpgaConfigGetMem => SipService::FpgaReconfig,
            RegRead | RegWrite | RegUpdate => SipService::SecureRegister,
            RsuStatus | RsuUpdate | RsuNotify | RsuRetryCounter | RsuDcmfVersion
            | RsuCopyDcmfVersion | RsuMaxRetry | RsuCopyMaxRetry | RsuDcmfStatus
            | RsuCopyDcmfStatus => SipService::RemoteSystemUpdate,
            EccDbe => SipService::Ecc,
            HwmonReadtemp | HwmonReadvolt => SipService::HardwareMonitor,
            MboxSendCmd | FirmwareVersion => SipService::Mailbox,
            HpsSetBridges | GetUsercode | GetRomPatchSha384 => SipService::Hps,
            FcsRandomNumber | FcsCryption | FcsSendCertificate | FcsGetProvisionData
            | FcsCntrSetPreauth | FcsPsgsigmaTeardown | FcsChipId | FcsAttestationSubkey
            | FcsAttestationMeasurements | FcsGetAttestationCert | FcsCreateCertOnReload
            | FcsOpenCsSession | FcsCloseCsSession | FcsImportCsKey | FcsExportCsKey
            | FcsRemoveCsKey | FcsGetCsKeyInfo => SipService::FpgaCrypto,
            SvcVersion | SvcCallCount | SvcUid | SvcVersionQuery => SipService::ServiceQuery,
        }
    }
}
