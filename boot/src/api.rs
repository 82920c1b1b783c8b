/*++

Licensed under the Apache-2.0 license.

File Name:

    api.rs

Abstract:

    File contains small caller-facing helpers: GBB introspection,
    developer-mode management and diagnostics requests.

--*/

use crate::mode;
use vaultboot_core::secdata::firmware::{self as secdata_firmware, FirmwareFlags, FirmwareParam};
use vaultboot_core::{gbb, nvdata, BootMode, Context, NvField};
use vaultboot_error::{BootError, BootResult};
use vaultboot_image_types::{GbbFlags, GBB_HWID_MAX_SIZE};

/// Copy the hardware ID out of the GBB, NUL terminator included.  Returns
/// the copied length.
pub fn gbb_read_hwid(ctx: &Context, hwid: &mut [u8]) -> BootResult<u32> {
    let view = gbb::view(ctx)?;
    let raw = view.hwid()?;
    let len = raw
        .iter()
        .position(|b| *b == 0)
        .map(|p| p + 1)
        .ok_or(BootError::GBB_HWID_SIZE)?;
    if len > hwid.len() || len > GBB_HWID_MAX_SIZE {
        return Err(BootError::GBB_HWID_SIZE);
    }
    hwid[..len].copy_from_slice(&raw[..len]);
    Ok(len as u32)
}

/// Current GBB flags; empty when the GBB failed to load.
pub fn gbb_flags(ctx: &Context) -> GbbFlags {
    mode::gbb_flags_or_empty(ctx)
}

/// Request a diagnostic boot.  The sticky nvdata flag is consumed by the
/// next boot's mode resolver.
pub fn request_diagnostics(ctx: &mut Context) {
    nvdata::set(ctx, NvField::DiagRequest, 1);
}

/// Enable developer mode by setting the secure developer flag.  Only legal
/// from a manual recovery boot; the change applies on the next boot, after
/// the caller persists secdata_firmware.
pub fn enable_developer_mode(ctx: &mut Context) -> BootResult<()> {
    if ctx.boot_mode() != BootMode::ManualRecovery {
        return Err(BootError::API_NOT_ALLOWED);
    }
    let flags = FirmwareFlags::from_bits_truncate(secdata_firmware::get(ctx, FirmwareParam::Flags))
        | FirmwareFlags::DEV_MODE;
    secdata_firmware::set(ctx, FirmwareParam::Flags, flags.bits())
}

/// Request to leave developer mode on the next boot.
pub fn disable_developer_mode(ctx: &mut Context) {
    nvdata::set(ctx, NvField::DisableDevRequest, 1);
}

/// Kernel rollback version stored in the secure counter at init.
pub fn kernel_rollback_version(ctx: &Context) -> u32 {
    ctx.sd().kernel_version_secdata
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultboot_core::nvdata;

    #[repr(C, align(16))]
    struct AlignedBuf<const N: usize>([u8; N]);

    #[test]
    fn test_disable_request_and_diagnostics() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut ctx = Context::init(&mut buf.0).unwrap();
        nvdata::init(&mut ctx);
        disable_developer_mode(&mut ctx);
        request_diagnostics(&mut ctx);
        assert_eq!(nvdata::get(&ctx, NvField::DisableDevRequest), 1);
        assert_eq!(nvdata::get(&ctx, NvField::DiagRequest), 1);
    }

    #[test]
    fn test_enable_developer_mode_needs_manual_recovery() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut ctx = Context::init(&mut buf.0).unwrap();
        nvdata::init(&mut ctx);
        vaultboot_core::secdata::firmware::create(&mut ctx);
        vaultboot_core::secdata::firmware::init(&mut ctx).unwrap();
        ctx.set_boot_mode(vaultboot_core::BootMode::Normal);
        assert_eq!(
            enable_developer_mode(&mut ctx).err(),
            Some(BootError::API_NOT_ALLOWED)
        );
    }
}
