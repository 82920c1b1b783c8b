/*++

Licensed under the Apache-2.0 license.

File Name:

    slot.rs

Abstract:

    File contains the A/B firmware slot selector: a small state machine
    over the try-count and per-slot results stored in nvdata.  Transitions
    happen only at selection time; terminal success is confirmed later by
    the caller, after a full successful boot.

--*/

use vaultboot_core::{bprintln, nvdata, Context, ContextFlags, FwResult, NvField, SdStatus};
use vaultboot_error::BootResult;

/// Select the firmware slot to boot this time.
///
/// The previous boot's tried/result fields are copied into the prev fields
/// first, so failure history survives exactly one boot of delay.  A slot
/// whose previous result is still `Trying` never confirmed success: fall
/// over to the other slot without consuming a try.
pub(crate) fn select_fw_slot(ctx: &mut Context) -> BootResult<()> {
    let last_slot = nvdata::get(ctx, NvField::FwTried);
    let last_result = nvdata::get(ctx, NvField::FwResult);

    nvdata::set(ctx, NvField::FwPrevTried, last_slot);
    nvdata::set(ctx, NvField::FwPrevResult, last_result);

    // We don't know yet what this boot will do.
    nvdata::set(ctx, NvField::FwResult, FwResult::Unknown as u32);

    let mut slot = nvdata::get(ctx, NvField::FwTryNext);
    let tries = nvdata::get(ctx, NvField::TryCount);

    if FwResult::from(last_result) == FwResult::Trying && last_slot == slot {
        slot = 1 - slot;
        nvdata::set(ctx, NvField::FwTryNext, slot);
    } else if tries > 0 {
        nvdata::set(ctx, NvField::FwResult, FwResult::Trying as u32);
        if !ctx.flags().contains(ContextFlags::NOFAIL_BOOT) {
            nvdata::set(ctx, NvField::TryCount, tries - 1);
        }
    }

    nvdata::set(ctx, NvField::FwTried, slot);

    let sd = ctx.sd_mut();
    sd.fw_slot = slot as u8;
    sd.last_fw_slot = last_slot as u8;
    sd.last_fw_result = last_result as u8;
    sd.add_status(SdStatus::CHOSE_SLOT);
    if slot == 1 {
        ctx.set_flags(ContextFlags::FW_SLOT_B);
    }
    bprintln!("[slot] trying fw slot {}", slot);
    Ok(())
}

/// Record that the slot tried this boot reached a fully working system.
/// Terminal state for the slot FSM; called by the OS-side caller.
pub fn confirm_fw_boot(ctx: &mut Context) {
    nvdata::set(ctx, NvField::FwResult, FwResult::Success as u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(16))]
    struct AlignedBuf<const N: usize>([u8; N]);

    fn ctx(buf: &mut [u8]) -> Context {
        let mut ctx = Context::init(buf).unwrap();
        nvdata::init(&mut ctx);
        ctx
    }

    #[test]
    fn test_fresh_state_tries_slot_a() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut c = ctx(&mut buf.0);
        nvdata::set(&mut c, NvField::TryCount, 3);

        select_fw_slot(&mut c).unwrap();
        assert_eq!(c.sd().fw_slot, 0);
        assert_eq!(nvdata::get(&c, NvField::TryCount), 2);
        assert_eq!(
            nvdata::get(&c, NvField::FwResult),
            FwResult::Trying as u32
        );
        assert!(!c.flags().contains(ContextFlags::FW_SLOT_B));
    }

    #[test]
    fn test_unconfirmed_slot_falls_over() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut c = ctx(&mut buf.0);
        // Prior boot tried slot A and never confirmed success.
        nvdata::set(&mut c, NvField::FwTried, 0);
        nvdata::set(&mut c, NvField::FwResult, FwResult::Trying as u32);
        nvdata::set(&mut c, NvField::FwTryNext, 0);
        nvdata::set(&mut c, NvField::TryCount, 2);

        select_fw_slot(&mut c).unwrap();
        assert_eq!(c.sd().fw_slot, 1);
        assert!(c.flags().contains(ContextFlags::FW_SLOT_B));
        // The failover does not consume a try.
        assert_eq!(nvdata::get(&c, NvField::TryCount), 2);
        assert_eq!(nvdata::get(&c, NvField::FwTryNext), 1);
        // Failure history survives one boot of delay.
        assert_eq!(nvdata::get(&c, NvField::FwPrevTried), 0);
        assert_eq!(
            nvdata::get(&c, NvField::FwPrevResult),
            FwResult::Trying as u32
        );
    }

    #[test]
    fn test_nofail_boot_preserves_tries() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut c = ctx(&mut buf.0);
        c.set_flags(ContextFlags::NOFAIL_BOOT);
        nvdata::set(&mut c, NvField::TryCount, 3);

        select_fw_slot(&mut c).unwrap();
        assert_eq!(nvdata::get(&c, NvField::TryCount), 3);
        assert_eq!(
            nvdata::get(&c, NvField::FwResult),
            FwResult::Trying as u32
        );
    }

    #[test]
    fn test_confirm_marks_success() {
        let mut buf = AlignedBuf([0u8; 1024]);
        let mut c = ctx(&mut buf.0);
        nvdata::set(&mut c, NvField::TryCount, 1);
        select_fw_slot(&mut c).unwrap();
        confirm_fw_boot(&mut c);
        assert_eq!(
            nvdata::get(&c, NvField::FwResult),
            FwResult::Success as u32
        );
    }
}
