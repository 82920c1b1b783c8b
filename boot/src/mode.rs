/*++

Licensed under the Apache-2.0 license.

File Name:

    mode.rs

Abstract:

    File contains the boot mode resolver: developer switch evaluation,
    recovery request consumption and the final mutually-exclusive mode
    decision, in strictly descending priority.

--*/

use vaultboot_core::secdata::firmware::{self as secdata_firmware, FirmwareFlags, FirmwareParam};
use vaultboot_core::{
    bprintln, gbb, nvdata, recovery, BootMode, Context, ContextFlags, NvField, SdStatus,
};
use vaultboot_error::BootResult;
use vaultboot_image_types::GbbFlags;

/// GBB flags, or an empty set when the GBB failed to load (a recovery
/// reason has been recorded in that case).
pub(crate) fn gbb_flags_or_empty(ctx: &Context) -> GbbFlags {
    if !ctx.sd().has_status(SdStatus::GBB_INIT) {
        return GbbFlags::empty();
    }
    match gbb::view(ctx) {
        Ok(view) => view.flags(),
        Err(_) => GbbFlags::empty(),
    }
}

/// Evaluate the developer switch.
///
/// Developer mode is a sticky secure-counter flag, overridable by the GBB
/// and leavable through the nvdata disable request or the caller's context
/// flag.  Transitions in either direction request a TPM owner clear.
pub(crate) fn check_dev_switch(ctx: &mut Context) -> BootResult<()> {
    let gbb_flags = gbb_flags_or_empty(ctx);
    let old_flags =
        FirmwareFlags::from_bits_truncate(secdata_firmware::get(ctx, FirmwareParam::Flags));

    let force_dev = gbb_flags.contains(GbbFlags::FORCE_DEV_SWITCH_ON);
    let mut dev = old_flags.contains(FirmwareFlags::DEV_MODE) || force_dev;

    if dev && !force_dev {
        let leave_requested = nvdata::get(ctx, NvField::DisableDevRequest) != 0
            || ctx.flags().contains(ContextFlags::DISABLE_DEVELOPER_MODE);
        if leave_requested {
            bprintln!("[mode] leaving developer mode on request");
            dev = false;
        }
    }
    nvdata::set(ctx, NvField::DisableDevRequest, 0);

    if dev {
        ctx.set_flags(ContextFlags::DEVELOPER_MODE);
    }

    // A mode transition invalidates TPM-held secrets; ask the caller's TPM
    // layer to clear the owner.
    let was_dev = old_flags.contains(FirmwareFlags::LAST_BOOT_DEVELOPER);
    if was_dev != dev {
        nvdata::set(ctx, NvField::ClearTpmOwnerRequest, 1);
    }

    let mut new_flags = old_flags;
    if !force_dev {
        new_flags.set(FirmwareFlags::DEV_MODE, dev);
    }
    new_flags.set(FirmwareFlags::LAST_BOOT_DEVELOPER, dev);
    if new_flags != old_flags {
        secdata_firmware::set(ctx, FirmwareParam::Flags, new_flags.bits())?;
    }
    Ok(())
}

pub(crate) enum RecoveryCheck {
    Proceed,
    /// Memory retraining was requested: reboot instead of surfacing a
    /// recovery reason.
    Reboot,
}

/// Consume the recovery request recorded by a prior boot or an earlier
/// failure this boot.  The nvdata request itself is left in place until
/// the recovery flow explicitly clears it.
pub(crate) fn check_recovery(ctx: &mut Context) -> RecoveryCheck {
    let reason = nvdata::get(ctx, NvField::RecoveryRequest) as u8;
    let subcode = nvdata::get(ctx, NvField::RecoverySubcode) as u8;
    let manual = ctx.flags().contains(ContextFlags::FORCE_RECOVERY_MODE);

    if reason != recovery::NOT_REQUESTED {
        bprintln!("[mode] recovery request {}/{} from prior boot", reason, subcode);
    }

    if reason == recovery::TRAIN_AND_REBOOT {
        if !manual {
            nvdata::set(
                ctx,
                NvField::RecoveryRequest,
                recovery::NOT_REQUESTED as u32,
            );
            return RecoveryCheck::Reboot;
        }
        // The manual override below wins; don't surface the training
        // subcode.
    } else if ctx.sd().recovery_reason == recovery::NOT_REQUESTED
        && reason != recovery::NOT_REQUESTED
    {
        // A failure earlier this boot is the authoritative record; a prior
        // boot's request is only adopted when nothing is recorded yet.
        ctx.sd_mut().recovery_reason = reason;
        ctx.sd_mut().recovery_subcode = subcode;
    }

    if manual {
        ctx.sd_mut().recovery_reason = recovery::RO_MANUAL;
        ctx.sd_mut().recovery_subcode = 0;
    }

    if ctx.sd().recovery_reason != recovery::NOT_REQUESTED {
        ctx.set_flags(ContextFlags::RECOVERY_MODE);
    }
    RecoveryCheck::Proceed
}

/// Decide the mutually-exclusive boot mode, highest priority first.
pub(crate) fn resolve_boot_mode(ctx: &mut Context) {
    let gbb_flags = gbb_flags_or_empty(ctx);
    let manual_allowed = ctx.flags().contains(ContextFlags::FORCE_RECOVERY_MODE)
        || gbb_flags.contains(GbbFlags::FORCE_MANUAL_RECOVERY);

    let mode = if ctx.sd().recovery_reason != recovery::NOT_REQUESTED && manual_allowed {
        BootMode::ManualRecovery
    } else if ctx.sd().recovery_reason != recovery::NOT_REQUESTED {
        // Recovery requested without physical presence is refused.
        BootMode::BrokenScreen
    } else if ctx.flags().contains(ContextFlags::DIAGNOSTIC_UI_ENABLED)
        && nvdata::get(ctx, NvField::DiagRequest) != 0
    {
        // Sticky request from the prior boot, consumed on entry.
        nvdata::set(ctx, NvField::DiagRequest, 0);
        BootMode::Diagnostics
    } else if ctx.flags().contains(ContextFlags::DEVELOPER_MODE) {
        BootMode::Developer
    } else {
        BootMode::Normal
    };

    ctx.set_boot_mode(mode);
}
