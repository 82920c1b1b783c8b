/*++

Licensed under the Apache-2.0 license.

File Name:

    nvdata.rs

Abstract:

    File contains the volatile flags store: a small persistent record for
    cross-reboot signaling with weaker integrity guarantees than the secure
    counters.  A corrupt record is silently reset to defaults; the caller
    learns about it through the changed flag.

--*/

use crate::checksum::crc8;
use crate::context::{Context, ContextFlags};
use crate::workbuf::SdStatus;

pub const NVDATA_SIZE: usize = 16;

const HEADER_OFFSET: usize = 0;
const HEADER_SIGNATURE_MASK: u8 = 0xC0;
const HEADER_SIGNATURE: u8 = 0x40;

const BOOT_OFFSET: usize = 1;
const RECOVERY_OFFSET: usize = 2;
const LOCALIZATION_OFFSET: usize = 3;
const DEV_OFFSET: usize = 4;
const TPM_OFFSET: usize = 5;
const SUBCODE_OFFSET: usize = 6;
const BOOT2_OFFSET: usize = 7;
const KERNEL_MAX_ROLLFORWARD_OFFSET: usize = 8;
const CRC_OFFSET: usize = 15;

/// Result of a firmware slot boot attempt, as recorded in nvdata.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwResult {
    /// Boot result is not known yet
    Unknown = 0,
    /// Slot was booted but has not confirmed success
    Trying = 1,
    /// Caller confirmed a fully successful boot from this slot
    Success = 2,
    /// Slot failed to boot
    Failure = 3,
}

impl From<u32> for FwResult {
    fn from(val: u32) -> Self {
        match val {
            1 => FwResult::Trying,
            2 => FwResult::Success,
            3 => FwResult::Failure,
            _ => FwResult::Unknown,
        }
    }
}

/// Fields stored in nvdata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvField {
    /// Wipeout requested by the app
    WipeoutRequest,
    /// Display initialization requested for next boot
    DisplayRequest,
    /// Request to leave developer mode
    DisableDevRequest,
    /// Backup of nvdata requested
    BackupRequest,
    /// Firmware try count, shared by both slots
    TryCount,
    /// Recovery request from the OS or a prior failure
    RecoveryRequest,
    /// Recovery subcode accompanying the request
    RecoverySubcode,
    /// Localization index for the excluded UI layer
    Localization,
    /// Developer boot from external media allowed
    DevBootExternal,
    /// Developer boot of an alternate bootloader allowed
    DevBootAltfw,
    /// Default developer boot target
    DevDefaultBoot,
    /// Request to clear the TPM owner on next boot
    ClearTpmOwnerRequest,
    /// TPM owner was cleared this boot
    ClearTpmOwnerDone,
    /// Result of the current boot attempt
    FwResult,
    /// Slot tried this boot
    FwTried,
    /// Slot to try next boot
    FwTryNext,
    /// Result copied from the prior boot
    FwPrevResult,
    /// Slot tried on the prior boot
    FwPrevTried,
    /// Diagnostic boot requested (sticky until consumed)
    DiagRequest,
    /// Upper bound for kernel secure version roll-forward; 0 means no limit
    KernelMaxRollForward,
}

struct FieldDesc {
    offset: usize,
    mask: u8,
    shift: u8,
}

fn desc(field: NvField) -> FieldDesc {
    match field {
        NvField::WipeoutRequest => FieldDesc {
            offset: HEADER_OFFSET,
            mask: 0x01,
            shift: 0,
        },
        NvField::TryCount => FieldDesc {
            offset: BOOT_OFFSET,
            mask: 0x0F,
            shift: 0,
        },
        NvField::DisplayRequest => FieldDesc {
            offset: BOOT_OFFSET,
            mask: 0x10,
            shift: 4,
        },
        NvField::DisableDevRequest => FieldDesc {
            offset: BOOT_OFFSET,
            mask: 0x20,
            shift: 5,
        },
        NvField::BackupRequest => FieldDesc {
            offset: BOOT_OFFSET,
            mask: 0x40,
            shift: 6,
        },
        NvField::RecoveryRequest => FieldDesc {
            offset: RECOVERY_OFFSET,
            mask: 0xFF,
            shift: 0,
        },
        NvField::RecoverySubcode => FieldDesc {
            offset: SUBCODE_OFFSET,
            mask: 0xFF,
            shift: 0,
        },
        NvField::Localization => FieldDesc {
            offset: LOCALIZATION_OFFSET,
            mask: 0xFF,
            shift: 0,
        },
        NvField::DevBootExternal => FieldDesc {
            offset: DEV_OFFSET,
            mask: 0x01,
            shift: 0,
        },
        NvField::DevBootAltfw => FieldDesc {
            offset: DEV_OFFSET,
            mask: 0x02,
            shift: 1,
        },
        NvField::DevDefaultBoot => FieldDesc {
            offset: DEV_OFFSET,
            mask: 0x30,
            shift: 4,
        },
        NvField::ClearTpmOwnerRequest => FieldDesc {
            offset: TPM_OFFSET,
            mask: 0x01,
            shift: 0,
        },
        NvField::ClearTpmOwnerDone => FieldDesc {
            offset: TPM_OFFSET,
            mask: 0x02,
            shift: 1,
        },
        NvField::FwResult => FieldDesc {
            offset: BOOT2_OFFSET,
            mask: 0x03,
            shift: 0,
        },
        NvField::FwTried => FieldDesc {
            offset: BOOT2_OFFSET,
            mask: 0x04,
            shift: 2,
        },
        NvField::FwTryNext => FieldDesc {
            offset: BOOT2_OFFSET,
            mask: 0x08,
            shift: 3,
        },
        NvField::FwPrevResult => FieldDesc {
            offset: BOOT2_OFFSET,
            mask: 0x30,
            shift: 4,
        },
        NvField::FwPrevTried => FieldDesc {
            offset: BOOT2_OFFSET,
            mask: 0x40,
            shift: 6,
        },
        NvField::DiagRequest => FieldDesc {
            offset: BOOT2_OFFSET,
            mask: 0x80,
            shift: 7,
        },
        // Handled directly in get()/set().
        NvField::KernelMaxRollForward => FieldDesc {
            offset: KERNEL_MAX_ROLLFORWARD_OFFSET,
            mask: 0xFF,
            shift: 0,
        },
    }
}

fn regen_crc(nvdata: &mut [u8; NVDATA_SIZE]) {
    nvdata[CRC_OFFSET] = crc8(&nvdata[..CRC_OFFSET]);
}

/// Initialize the volatile flags store from the caller-loaded bytes.  A bad
/// signature or checksum resets the record to defaults and flags the change
/// for write-back; corruption here is never fatal.
pub fn init(ctx: &mut Context) {
    let nvdata = ctx.nvdata();
    let valid = nvdata[HEADER_OFFSET] & HEADER_SIGNATURE_MASK == HEADER_SIGNATURE
        && crc8(&nvdata[..CRC_OFFSET]) == nvdata[CRC_OFFSET];
    if !valid {
        let nvdata = ctx.nvdata_mut();
        nvdata.fill(0);
        nvdata[HEADER_OFFSET] = HEADER_SIGNATURE;
        regen_crc(nvdata);
        ctx.set_flags(ContextFlags::NVDATA_CHANGED);
    }
    ctx.sd_mut().add_status(SdStatus::NV_INIT);
}

/// Read an nvdata field.
pub fn get(ctx: &Context, field: NvField) -> u32 {
    assert!(
        ctx.sd().has_status(SdStatus::NV_INIT),
        "nvdata read before init"
    );
    let nvdata = ctx.nvdata();
    if field == NvField::KernelMaxRollForward {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&nvdata[KERNEL_MAX_ROLLFORWARD_OFFSET..KERNEL_MAX_ROLLFORWARD_OFFSET + 4]);
        return u32::from_le_bytes(bytes);
    }
    let d = desc(field);
    ((nvdata[d.offset] & d.mask) >> d.shift) as u32
}

/// Write an nvdata field.  No-op when the stored value already matches;
/// otherwise the checksum is regenerated and the change flagged for
/// write-back.
pub fn set(ctx: &mut Context, field: NvField, value: u32) {
    assert!(
        ctx.sd().has_status(SdStatus::NV_INIT),
        "nvdata write before init"
    );
    if get(ctx, field) == value {
        return;
    }
    let nvdata = ctx.nvdata_mut();
    if field == NvField::KernelMaxRollForward {
        nvdata[KERNEL_MAX_ROLLFORWARD_OFFSET..KERNEL_MAX_ROLLFORWARD_OFFSET + 4]
            .copy_from_slice(&value.to_le_bytes());
    } else {
        let d = desc(field);
        let shifted = ((value as u8) << d.shift) & d.mask;
        nvdata[d.offset] = (nvdata[d.offset] & !d.mask) | shifted;
    }
    regen_crc(nvdata);
    ctx.set_flags(ContextFlags::NVDATA_CHANGED);
}
