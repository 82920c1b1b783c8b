/*++

Licensed under the Apache-2.0 license.

File Name:

    fail.rs

Abstract:

    File contains the failure escalation path.  A failure after slot
    selection burns the slot and falls over to the other one; a failure
    before slot selection, or with both slots known-bad, escalates to a
    recovery request.

--*/

use vaultboot_core::{bprintln, nvdata, recovery, Context, FwResult, NvField, SdStatus};

/// Report a boot failure.
///
/// May be called at any point, including before the first firmware phase.
/// The first recorded reason wins; later calls within the same boot are
/// logged and otherwise ignored.  On return the caller should check for
/// updates to nvdata and secdata, then reboot.
pub fn fail(ctx: &mut Context, reason: u8, subcode: u8) {
    // A failure this early means nvdata was never loaded.
    if !ctx.sd().has_status(SdStatus::NV_INIT) {
        nvdata::init(ctx);
    }

    if ctx.sd().recovery_reason != recovery::NOT_REQUESTED {
        bprintln!(
            "[fail] reason {} already recorded, ignoring {}/{}",
            ctx.sd().recovery_reason,
            reason,
            subcode
        );
        return;
    }

    bprintln!("[fail] reason {} subcode {}", reason, subcode);

    if ctx.sd().has_status(SdStatus::CHOSE_SLOT) {
        // This boot failed with a chosen slot; don't try it again.
        nvdata::set(ctx, NvField::FwResult, FwResult::Failure as u32);
        nvdata::set(ctx, NvField::TryCount, 0);

        let other = 1 - ctx.sd().fw_slot;
        let other_failed = ctx.sd().last_fw_slot == other
            && FwResult::from(ctx.sd().last_fw_result as u32) == FwResult::Failure;
        if !other_failed {
            // The other slot is not known-bad; try it next boot.
            nvdata::set(ctx, NvField::FwTryNext, other as u32);
            return;
        }
        // Both slots have failed in successive boots.
    }

    request_recovery(ctx, reason, subcode);
}

fn request_recovery(ctx: &mut Context, reason: u8, subcode: u8) {
    ctx.sd_mut().recovery_reason = reason;
    ctx.sd_mut().recovery_subcode = subcode;
    nvdata::set(ctx, NvField::RecoveryRequest, reason as u32);
    nvdata::set(ctx, NvField::RecoverySubcode, subcode as u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultboot_core::ContextFlags;

    #[repr(C, align(16))]
    struct AlignedBuf<const N: usize>([u8; N]);

    fn ctx(buf: &mut [u8]) -> Context {
        let mut ctx = Context::init(buf).unwrap();
        nvdata::init(&mut ctx);
        ctx.clear_flags(ContextFlags::NVDATA_CHANGED);
        ctx
    }

    #[test]
    fn test_early_failure_requests_recovery() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut ctx = Context::init(&mut buf.0).unwrap();
        // No phase has run; nvdata isn't even initialized yet.
        fail(&mut ctx, recovery::SECDATA_FIRMWARE_INIT, 7);
        assert_eq!(ctx.sd().recovery_reason, recovery::SECDATA_FIRMWARE_INIT);
        assert_eq!(
            nvdata::get(&ctx, NvField::RecoveryRequest),
            recovery::SECDATA_FIRMWARE_INIT as u32
        );
        assert_eq!(nvdata::get(&ctx, NvField::RecoverySubcode), 7);
    }

    #[test]
    fn test_first_reason_wins() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut c = ctx(&mut buf.0);
        fail(&mut c, 0x31, 1);
        fail(&mut c, 0x32, 2);
        assert_eq!(c.sd().recovery_reason, 0x31);
        assert_eq!(nvdata::get(&c, NvField::RecoveryRequest), 0x31);
        assert_eq!(nvdata::get(&c, NvField::RecoverySubcode), 1);
    }

    #[test]
    fn test_failure_after_slot_choice_flips_slot() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut c = ctx(&mut buf.0);
        c.sd_mut().fw_slot = 0;
        c.sd_mut().last_fw_slot = 0;
        c.sd_mut().last_fw_result = FwResult::Trying as u8;
        c.sd_mut().add_status(SdStatus::CHOSE_SLOT);
        nvdata::set(&mut c, NvField::TryCount, 5);

        fail(&mut c, recovery::RW_INVALID_OS, 0);
        assert_eq!(
            nvdata::get(&c, NvField::FwResult),
            FwResult::Failure as u32
        );
        assert_eq!(nvdata::get(&c, NvField::TryCount), 0);
        assert_eq!(nvdata::get(&c, NvField::FwTryNext), 1);
        // Not escalated: the other slot hasn't failed.
        assert_eq!(c.sd().recovery_reason, recovery::NOT_REQUESTED);
    }

    #[test]
    fn test_both_slots_failed_escalates() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut c = ctx(&mut buf.0);
        // Slot B chosen this boot; slot A failed last boot.
        c.sd_mut().fw_slot = 1;
        c.sd_mut().last_fw_slot = 0;
        c.sd_mut().last_fw_result = FwResult::Failure as u8;
        c.sd_mut().add_status(SdStatus::CHOSE_SLOT);
        nvdata::set(&mut c, NvField::FwTryNext, 1);

        fail(&mut c, recovery::RO_INVALID_RW, 3);
        assert_eq!(c.sd().recovery_reason, recovery::RO_INVALID_RW);
        // Escalation does not redirect try-next.
        assert_eq!(nvdata::get(&c, NvField::FwTryNext), 1);
    }
}
