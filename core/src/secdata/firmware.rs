/*++

Licensed under the Apache-2.0 license.

File Name:

    firmware.rs

Abstract:

    File contains the firmware secure counter record: the anti-rollback
    version consulted during firmware verification, plus the sticky
    developer mode flags.

--*/

use crate::checksum::crc8;
use crate::context::{Context, ContextFlags};
use crate::workbuf::SdStatus;
use memoffset::offset_of;
use vaultboot_error::{BootError, BootResult};
use zerocopy::{AsBytes, FromBytes};

pub const SECDATA_FIRMWARE_SIZE: usize = 10;
pub const SECDATA_FIRMWARE_VERSION: u8 = 2;

bitflags::bitflags! {
    /// Flags stored in the firmware secure counter.
    pub struct FirmwareFlags : u32 {
        /// The previous boot ran in developer mode
        const LAST_BOOT_DEVELOPER = 1 << 0;
        /// Developer mode is enabled
        const DEV_MODE            = 1 << 1;
    }
}

#[repr(C)]
#[derive(AsBytes, FromBytes, Default, Debug)]
struct SecdataFirmware {
    struct_version: u8,
    flags: u8,
    fw_versions: [u8; 4],
    reserved: [u8; 3],
    crc8: u8,
}

fn crc_covered() -> usize {
    offset_of!(SecdataFirmware, crc8)
}

/// Fields of the firmware secure counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareParam {
    Flags,
    Versions,
}

fn record(ctx: &Context) -> SecdataFirmware {
    // Fixed-size source; the read cannot fail.
    SecdataFirmware::read_from(ctx.secdata_firmware().as_ref()).unwrap()
}

fn store(ctx: &mut Context, mut rec: SecdataFirmware) {
    rec.crc8 = crc8(&rec.as_bytes()[..crc_covered()]);
    ctx.secdata_firmware_mut().copy_from_slice(rec.as_bytes());
    ctx.set_flags(ContextFlags::SECDATA_FIRMWARE_CHANGED);
}

/// Validate the caller-loaded record.  Distinguishes corruption from a
/// valid record; an absent record needs [`create`] on the first-ever boot.
pub fn check(ctx: &Context) -> BootResult<()> {
    let rec = record(ctx);
    if rec.struct_version < SECDATA_FIRMWARE_VERSION {
        return Err(BootError::SECDATA_FIRMWARE_VERSION);
    }
    if rec.crc8 != crc8(&rec.as_bytes()[..crc_covered()]) {
        return Err(BootError::SECDATA_FIRMWARE_CRC);
    }
    Ok(())
}

/// Create a fresh, zeroed record.
///
/// Only for the first-ever boot of a device.  Never call this to recover
/// from a failed [`check`]; that would let an attacker roll the counter
/// back to its initial state.
pub fn create(ctx: &mut Context) -> u32 {
    let rec = SecdataFirmware {
        struct_version: SECDATA_FIRMWARE_VERSION,
        ..Default::default()
    };
    store(ctx, rec);
    SECDATA_FIRMWARE_SIZE as u32
}

/// Validate the record and latch the stored version for this boot.
pub fn init(ctx: &mut Context) -> BootResult<()> {
    check(ctx)?;
    let rec = record(ctx);
    ctx.sd_mut().fw_version_secdata = u32::from_le_bytes(rec.fw_versions);
    ctx.sd_mut().add_status(SdStatus::SECDATA_FIRMWARE_INIT);
    Ok(())
}

/// Read a field of the validated record.
///
/// Before a successful [`init`] this returns default values, and only when
/// a recovery reason is already recorded; any other uninitialized access is
/// a caller ordering bug and aborts.
pub fn get(ctx: &Context, param: FirmwareParam) -> u32 {
    if !ctx.sd().has_status(SdStatus::SECDATA_FIRMWARE_INIT) {
        assert!(
            ctx.sd().recovery_reason != 0,
            "secdata_firmware read before init"
        );
        return 0;
    }
    let rec = record(ctx);
    match param {
        FirmwareParam::Flags => rec.flags as u32,
        FirmwareParam::Versions => u32::from_le_bytes(rec.fw_versions),
    }
}

/// Write a field of the validated record.  The version field may only move
/// forward within a boot.
pub fn set(ctx: &mut Context, param: FirmwareParam, value: u32) -> BootResult<()> {
    if !ctx.sd().has_status(SdStatus::SECDATA_FIRMWARE_INIT) {
        assert!(
            ctx.sd().recovery_reason != 0,
            "secdata_firmware write before init"
        );
        // Writes are dropped on the way into recovery.
        return Ok(());
    }
    if get(ctx, param) == value {
        return Ok(());
    }
    let mut rec = record(ctx);
    match param {
        FirmwareParam::Flags => {
            assert!(value <= 0xFF, "firmware secdata flags out of range");
            rec.flags = value as u8;
        }
        FirmwareParam::Versions => {
            if value < u32::from_le_bytes(rec.fw_versions) {
                return Err(BootError::SECDATA_FIRMWARE_ROLLBACK);
            }
            rec.fw_versions = value.to_le_bytes();
        }
    }
    store(ctx, rec);
    Ok(())
}
