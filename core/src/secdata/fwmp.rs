/*++

Licensed under the Apache-2.0 license.

File Name:

    fwmp.rs

Abstract:

    File contains the firmware management parameters record: policy
    overrides for developer mode signing requirements, written by OS-side
    tooling and read-only to the boot core.  The record is variable-sized;
    callers read the minimum size first and re-read if check() reports a
    larger true size.

--*/

use crate::checksum::crc8;
use crate::context::Context;
use crate::workbuf::SdStatus;
use vaultboot_error::{BootError, BootResult};
use zerocopy::{AsBytes, FromBytes};

pub const SECDATA_FWMP_MIN_SIZE: usize = 40;
pub const SECDATA_FWMP_MAX_SIZE: usize = 64;

/// Struct version; major nibble must be 1.
pub const SECDATA_FWMP_VERSION: u8 = 0x10;

pub const FWMP_HASH_SIZE: usize = 32;

/// CRC covers everything after the crc8 field, up to struct_size.
const CRC_START: usize = 3;

bitflags::bitflags! {
    /// Firmware management parameter flags.
    pub struct FwmpFlags : u32 {
        /// Refuse to boot in developer mode
        const DEV_DISABLE_BOOT     = 1 << 0;
        /// Refuse recovery installs while in developer mode
        const DEV_DISABLE_RECOVERY = 1 << 1;
        /// Allow developer boot from external media
        const DEV_ENABLE_EXTERNAL  = 1 << 2;
        /// Allow developer boot of an alternate bootloader
        const DEV_ENABLE_ALTFW     = 1 << 3;
        /// Developer mode may only boot officially signed kernels
        const DEV_OFFICIAL_ONLY    = 1 << 4;
        /// Pin the kernel data key to `dev_key_hash` in developer mode
        const DEV_USE_KEY_HASH     = 1 << 5;
    }
}

#[repr(C)]
#[derive(AsBytes, FromBytes, Debug)]
struct SecdataFwmp {
    struct_version: u8,
    struct_size: u8,
    crc8: u8,
    flags: u8,
    dev_key_hash: [u8; FWMP_HASH_SIZE],
    reserved: [u8; 4],
}

fn record(ctx: &Context) -> SecdataFwmp {
    // The record is a prefix of the fixed-size context buffer.
    SecdataFwmp::read_from_prefix(ctx.secdata_fwmp().as_ref()).unwrap()
}

/// Validate the caller-loaded record.
///
/// `size` carries the number of bytes the caller has read so far.  When the
/// record declares a larger true size, `size` is updated and
/// `SECDATA_FWMP_INCOMPLETE` returned: the caller must re-read that many
/// bytes and check again.  An incomplete result is never "valid".
pub fn check(ctx: &Context, size: &mut u8) -> BootResult<()> {
    let rec = record(ctx);
    if (rec.struct_size as usize) < SECDATA_FWMP_MIN_SIZE
        || rec.struct_size as usize > SECDATA_FWMP_MAX_SIZE
    {
        return Err(BootError::SECDATA_FWMP_SIZE);
    }
    if rec.struct_size > *size {
        *size = rec.struct_size;
        return Err(BootError::SECDATA_FWMP_INCOMPLETE);
    }
    if rec.struct_version >> 4 != SECDATA_FWMP_VERSION >> 4 {
        return Err(BootError::SECDATA_FWMP_VERSION);
    }
    let bytes = ctx.secdata_fwmp();
    if rec.crc8 != crc8(&bytes[CRC_START..rec.struct_size as usize]) {
        return Err(BootError::SECDATA_FWMP_CRC);
    }
    Ok(())
}

/// Create an empty record.
pub fn create(ctx: &mut Context) -> u32 {
    let rec = SecdataFwmp {
        struct_version: SECDATA_FWMP_VERSION,
        struct_size: SECDATA_FWMP_MIN_SIZE as u8,
        crc8: 0,
        flags: 0,
        dev_key_hash: [0; FWMP_HASH_SIZE],
        reserved: [0; 4],
    };
    let bytes = ctx.secdata_fwmp_mut();
    bytes.fill(0);
    bytes[..SECDATA_FWMP_MIN_SIZE].copy_from_slice(rec.as_bytes());
    bytes[2] = crc8(&bytes[CRC_START..SECDATA_FWMP_MIN_SIZE]);
    SECDATA_FWMP_MIN_SIZE as u32
}

/// Validate the fully-read record and mark it usable for this boot.
pub fn init(ctx: &mut Context) -> BootResult<()> {
    let mut size = SECDATA_FWMP_MAX_SIZE as u8;
    check(ctx, &mut size)?;
    ctx.sd_mut().add_status(SdStatus::SECDATA_FWMP_INIT);
    Ok(())
}

/// Policy flags.  Valid only after [`init`].
pub fn flags(ctx: &Context) -> FwmpFlags {
    assert!(
        ctx.sd().has_status(SdStatus::SECDATA_FWMP_INIT),
        "fwmp read before init"
    );
    FwmpFlags::from_bits_truncate(record(ctx).flags as u32)
}

/// Pinned developer data key digest.  Valid only after [`init`].
pub fn dev_key_hash(ctx: &Context) -> [u8; FWMP_HASH_SIZE] {
    assert!(
        ctx.sd().has_status(SdStatus::SECDATA_FWMP_INIT),
        "fwmp read before init"
    );
    record(ctx).dev_key_hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(16))]
    struct AlignedBuf<const N: usize>([u8; N]);

    #[test]
    fn test_create_then_check() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut ctx = Context::init(&mut buf.0).unwrap();
        assert_eq!(create(&mut ctx), SECDATA_FWMP_MIN_SIZE as u32);
        let mut size = SECDATA_FWMP_MIN_SIZE as u8;
        assert!(check(&ctx, &mut size).is_ok());
    }

    #[test]
    fn test_short_read_reports_true_size() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut ctx = Context::init(&mut buf.0).unwrap();
        create(&mut ctx);
        // Pretend the record on storage is 48 bytes.
        {
            let bytes = ctx.secdata_fwmp_mut();
            bytes[1] = 48;
            bytes[2] = crc8(&bytes[CRC_START..48]);
        }
        let mut size = SECDATA_FWMP_MIN_SIZE as u8;
        assert_eq!(
            check(&ctx, &mut size).err(),
            Some(BootError::SECDATA_FWMP_INCOMPLETE)
        );
        assert_eq!(size, 48);
        // Re-checking with the full record passes.
        assert!(check(&ctx, &mut size).is_ok());
    }

    #[test]
    fn test_check_rejects_bogus_size() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut ctx = Context::init(&mut buf.0).unwrap();
        create(&mut ctx);
        ctx.secdata_fwmp_mut()[1] = 16;
        let mut size = SECDATA_FWMP_MAX_SIZE as u8;
        assert_eq!(
            check(&ctx, &mut size).err(),
            Some(BootError::SECDATA_FWMP_SIZE)
        );
    }

    #[test]
    fn test_flags_and_hash() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut ctx = Context::init(&mut buf.0).unwrap();
        create(&mut ctx);
        {
            let bytes = ctx.secdata_fwmp_mut();
            bytes[3] = (FwmpFlags::DEV_OFFICIAL_ONLY | FwmpFlags::DEV_USE_KEY_HASH).bits() as u8;
            bytes[4..36].copy_from_slice(&[0xAB; FWMP_HASH_SIZE]);
            bytes[2] = crc8(&bytes[CRC_START..SECDATA_FWMP_MIN_SIZE]);
        }
        init(&mut ctx).unwrap();
        assert!(flags(&ctx).contains(FwmpFlags::DEV_OFFICIAL_ONLY));
        assert_eq!(dev_key_hash(&ctx), [0xAB; FWMP_HASH_SIZE]);
    }

    #[test]
    fn test_corrupt_crc_rejected() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut ctx = Context::init(&mut buf.0).unwrap();
        create(&mut ctx);
        ctx.secdata_fwmp_mut()[3] ^= 0xFF;
        let mut size = SECDATA_FWMP_MAX_SIZE as u8;
        assert_eq!(
            check(&ctx, &mut size).err(),
            Some(BootError::SECDATA_FWMP_CRC)
        );
    }
}
