/*++

Licensed under the Apache-2.0 license.

File Name:

    kernel.rs

Abstract:

    File contains the kernel secure counter record: the anti-rollback
    version consulted during kernel verification.

--*/

use crate::checksum::crc8;
use crate::context::{Context, ContextFlags};
use crate::workbuf::SdStatus;
use vaultboot_error::{BootError, BootResult};
use zerocopy::{AsBytes, FromBytes};

pub const SECDATA_KERNEL_SIZE: usize = 12;

/// Struct version; major nibble must be 1.
pub const SECDATA_KERNEL_VERSION: u8 = 0x10;

/// CRC covers everything after the crc8 field.
const CRC_START: usize = 3;

bitflags::bitflags! {
    /// Flags stored in the kernel secure counter.
    pub struct KernelFlags : u32 {
        /// The caller may use hardware crypto acceleration for kernel
        /// body digests
        const HWCRYPTO_ALLOWED = 1 << 0;
    }
}

#[repr(C)]
#[derive(AsBytes, FromBytes, Default, Debug)]
struct SecdataKernel {
    struct_version: u8,
    struct_size: u8,
    crc8: u8,
    flags: u8,
    kernel_versions: [u8; 4],
    reserved: [u8; 4],
}

/// Fields of the kernel secure counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelParam {
    Flags,
    Versions,
}

fn record(ctx: &Context) -> SecdataKernel {
    // Fixed-size source; the read cannot fail.
    SecdataKernel::read_from(ctx.secdata_kernel().as_ref()).unwrap()
}

fn store(ctx: &mut Context, mut rec: SecdataKernel) {
    rec.crc8 = crc8(&rec.as_bytes()[CRC_START..rec.struct_size as usize]);
    ctx.secdata_kernel_mut().copy_from_slice(rec.as_bytes());
    ctx.set_flags(ContextFlags::SECDATA_KERNEL_CHANGED);
}

/// Validate the caller-loaded record.
pub fn check(ctx: &Context) -> BootResult<()> {
    let rec = record(ctx);
    if rec.struct_version >> 4 != SECDATA_KERNEL_VERSION >> 4 {
        return Err(BootError::SECDATA_KERNEL_VERSION);
    }
    if rec.struct_size as usize != SECDATA_KERNEL_SIZE {
        return Err(BootError::SECDATA_KERNEL_SIZE);
    }
    if rec.crc8 != crc8(&rec.as_bytes()[CRC_START..rec.struct_size as usize]) {
        return Err(BootError::SECDATA_KERNEL_CRC);
    }
    Ok(())
}

/// Create a fresh, zeroed record.
///
/// Only for the first-ever boot of a device.  Never call this to recover
/// from a failed [`check`]; that would let an attacker roll the counter
/// back to its initial state.
pub fn create(ctx: &mut Context) -> u32 {
    let rec = SecdataKernel {
        struct_version: SECDATA_KERNEL_VERSION,
        struct_size: SECDATA_KERNEL_SIZE as u8,
        ..Default::default()
    };
    store(ctx, rec);
    SECDATA_KERNEL_SIZE as u32
}

/// Validate the record and latch the stored version for this boot.
pub fn init(ctx: &mut Context) -> BootResult<()> {
    check(ctx)?;
    let rec = record(ctx);
    ctx.sd_mut().kernel_version_secdata = u32::from_le_bytes(rec.kernel_versions);
    ctx.sd_mut().add_status(SdStatus::SECDATA_KERNEL_INIT);
    Ok(())
}

/// Read a field of the validated record.
///
/// Before a successful [`init`] this returns default values, and only when
/// a recovery reason is already recorded or a manual recovery is in
/// progress; any other uninitialized access is a caller ordering bug.
pub fn get(ctx: &Context, param: KernelParam) -> u32 {
    if !ctx.sd().has_status(SdStatus::SECDATA_KERNEL_INIT) {
        assert!(
            ctx.sd().recovery_reason != 0,
            "secdata_kernel read before init"
        );
        return 0;
    }
    let rec = record(ctx);
    match param {
        KernelParam::Flags => rec.flags as u32,
        KernelParam::Versions => u32::from_le_bytes(rec.kernel_versions),
    }
}

/// Write a field of the validated record.  The version field may only move
/// forward within a boot.
pub fn set(ctx: &mut Context, param: KernelParam, value: u32) -> BootResult<()> {
    if !ctx.sd().has_status(SdStatus::SECDATA_KERNEL_INIT) {
        assert!(
            ctx.sd().recovery_reason != 0,
            "secdata_kernel write before init"
        );
        return Ok(());
    }
    if get(ctx, param) == value {
        return Ok(());
    }
    let mut rec = record(ctx);
    match param {
        KernelParam::Flags => {
            assert!(value <= 0xFF, "kernel secdata flags out of range");
            rec.flags = value as u8;
        }
        KernelParam::Versions => {
            if value < u32::from_le_bytes(rec.kernel_versions) {
                return Err(BootError::SECDATA_KERNEL_ROLLBACK);
            }
            rec.kernel_versions = value.to_le_bytes();
        }
    }
    store(ctx, rec);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(16))]
    struct AlignedBuf<const N: usize>([u8; N]);

    fn fresh(buf: &mut [u8]) -> Context {
        let mut ctx = Context::init(buf).unwrap();
        create(&mut ctx);
        init(&mut ctx).unwrap();
        ctx
    }

    #[test]
    fn test_create_then_check() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut ctx = Context::init(&mut buf.0).unwrap();
        assert!(check(&ctx).is_err());
        create(&mut ctx);
        assert!(check(&ctx).is_ok());
    }

    #[test]
    fn test_check_round_trip_after_set() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut ctx = fresh(&mut buf.0);
        assert!(check(&ctx).is_ok());
        set(&mut ctx, KernelParam::Versions, 0x0003_0001).unwrap();
        assert!(check(&ctx).is_ok());
        assert_eq!(get(&ctx, KernelParam::Versions), 0x0003_0001);
    }

    #[test]
    fn test_version_rolls_forward_only() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut ctx = fresh(&mut buf.0);
        set(&mut ctx, KernelParam::Versions, 0x0002_0001).unwrap();
        assert_eq!(
            set(&mut ctx, KernelParam::Versions, 1).err(),
            Some(BootError::SECDATA_KERNEL_ROLLBACK)
        );
    }

    #[test]
    fn test_check_rejects_wrong_major_version() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut ctx = Context::init(&mut buf.0).unwrap();
        create(&mut ctx);
        ctx.secdata_kernel_mut()[0] = 0x20;
        assert_eq!(check(&ctx).err(), Some(BootError::SECDATA_KERNEL_VERSION));
    }

    #[test]
    fn test_hwcrypto_flag() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut ctx = fresh(&mut buf.0);
        set(
            &mut ctx,
            KernelParam::Flags,
            KernelFlags::HWCRYPTO_ALLOWED.bits(),
        )
        .unwrap();
        assert_eq!(
            KernelFlags::from_bits_truncate(get(&ctx, KernelParam::Flags)),
            KernelFlags::HWCRYPTO_ALLOWED
        );
    }
}
