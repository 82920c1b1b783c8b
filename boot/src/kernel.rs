/*++

Licensed under the Apache-2.0 license.

File Name:

    kernel.rs

Abstract:

    File contains the kernel phases: secure counter and management
    parameter bring-up, verification key selection, per-candidate vblock
    verification, body verification and the roll-forward finalize step.

--*/

use crate::env::BootEnv;
use crate::fail::fail;
use crate::mode;
use crate::ControlRequest;
use vaultboot_core::secdata::fwmp::{self as secdata_fwmp, FwmpFlags};
use vaultboot_core::secdata::kernel::{self as secdata_kernel, KernelParam};
use vaultboot_core::{
    bprintln, gbb, nvdata, recovery, BootMode, Context, ContextFlags, NvField, Region, SdStatus,
};
use vaultboot_error::{BootError, BootResult};
use vaultboot_image_types::{GbbFlags, Keyblock, KernelPreamble, PackedKeyView};
use vaultboot_image_verify::{VblockVerifier, VerifyPolicy};
use zerocopy::FromBytes;

/// Size of the kernel vblock staging buffer allocated from the workbuf.
pub const KERNEL_VBLOCK_MAX_SIZE: usize = 64 * 1024;

/// Location of the verified kernel body within its partition.
#[derive(Debug, Clone, Copy)]
pub struct KernelBodyInfo {
    /// Byte offset of the body within the partition (right after the
    /// vblock)
    pub offset: u32,

    /// Declared body size
    pub size: u32,

    /// Address the body expects to be loaded at
    pub load_address: u64,

    /// Full signature verification was used (not the hash-only path)
    pub signed: bool,
}

/// Prepare for kernel verification: bring up the kernel secure counter and
/// the management parameters, then select the key that will verify kernel
/// keyblocks (the recovery key in manual recovery, the firmware preamble's
/// kernel subkey otherwise).
pub fn kernel_phase1(ctx: &mut Context) -> BootResult<ControlRequest> {
    assert!(
        ctx.sd().has_status(SdStatus::FW_PHASE1_DONE),
        "kernel_phase1 called before fw_phase1"
    );
    assert!(
        !ctx.sd().has_status(SdStatus::KERNEL_PHASE1_DONE),
        "kernel_phase1 called twice"
    );
    let recovery_boot = ctx.boot_mode() == BootMode::ManualRecovery;

    if let Err(e) = secdata_kernel::init(ctx) {
        if recovery_boot {
            // Recovery must be able to run with corrupt secure storage;
            // version checks are bypassed there anyway.
            bprintln!("[k1] ignoring secdata kernel failure in recovery ({})", e.code());
        } else {
            fail(ctx, recovery::SECDATA_KERNEL_INIT, e.subcode());
            return Err(e);
        }
    }

    let gbb_flags = mode::gbb_flags_or_empty(ctx);
    if !ctx.flags().contains(ContextFlags::NO_SECDATA_FWMP)
        && !gbb_flags.contains(GbbFlags::DISABLE_FWMP)
    {
        if let Err(e) = secdata_fwmp::init(ctx) {
            if recovery_boot {
                bprintln!("[k1] ignoring fwmp failure in recovery ({})", e.code());
            } else {
                fail(ctx, recovery::SECDATA_FWMP_INIT, e.subcode());
                return Err(e);
            }
        }
    }

    fill_dev_boot_flags(ctx, gbb_flags);

    if recovery_boot {
        // The recovery key lives in the GBB copy; reference it in place.
        if !ctx.sd().has_status(SdStatus::GBB_INIT) {
            return Err(BootError::GBB_UNAVAILABLE);
        }
        let (gbb_offset, gbb_size) = (ctx.sd().gbb_offset, ctx.sd().gbb_size);
        let range = gbb::view(ctx)?.header.recovery_key_range(gbb_size)?;
        let sd = ctx.sd_mut();
        sd.kernel_key_offset = gbb_offset + range.start as u32;
        sd.kernel_key_size = range.len() as u32;
    } else {
        // Stashed by firmware phase 3, possibly in an earlier firmware
        // application that handed the workbuf over to us.
        assert!(
            ctx.sd().kernel_key_size != 0,
            "kernel_phase1 called without a kernel verification key"
        );
    }

    let staging = ctx.alloc(KERNEL_VBLOCK_MAX_SIZE as u32)?;
    let sd = ctx.sd_mut();
    sd.vblock_offset = staging.offset;
    sd.vblock_size = staging.size;
    sd.add_status(SdStatus::KERNEL_PHASE1_DONE);
    bprintln!("[k1] ready, min kernel version {}", ctx.sd().kernel_version_secdata);
    Ok(ControlRequest::Continue)
}

/// Developer-mode boot policy, combined from nvdata, the management
/// parameters and the GBB.
fn fill_dev_boot_flags(ctx: &mut Context, gbb_flags: GbbFlags) {
    if ctx.boot_mode() != BootMode::Developer {
        return;
    }
    let fwmp = if ctx.sd().has_status(SdStatus::SECDATA_FWMP_INIT) {
        secdata_fwmp::flags(ctx)
    } else {
        FwmpFlags::empty()
    };

    let boot_disabled = fwmp.contains(FwmpFlags::DEV_DISABLE_BOOT)
        && !gbb_flags.contains(GbbFlags::FORCE_DEV_SWITCH_ON);
    if !boot_disabled {
        ctx.set_flags(ContextFlags::DEV_BOOT_ALLOWED);
    }
    if nvdata::get(ctx, NvField::DevBootExternal) != 0
        || fwmp.contains(FwmpFlags::DEV_ENABLE_EXTERNAL)
        || gbb_flags.contains(GbbFlags::FORCE_DEV_BOOT_EXTERNAL)
    {
        ctx.set_flags(ContextFlags::DEV_BOOT_EXTERNAL_ALLOWED);
    }
    if nvdata::get(ctx, NvField::DevBootAltfw) != 0 || fwmp.contains(FwmpFlags::DEV_ENABLE_ALTFW)
    {
        ctx.set_flags(ContextFlags::DEV_BOOT_ALTFW_ALLOWED);
    }
}

pub(crate) fn staging_region(ctx: &Context) -> Region {
    Region {
        offset: ctx.sd().vblock_offset,
        size: ctx.sd().vblock_size,
    }
}

/// The staging buffer candidates are read into before
/// [`load_kernel_vblock`].
pub fn kernel_staging_buffer<'c>(ctx: &'c mut Context) -> BootResult<&'c mut [u8]> {
    assert!(
        ctx.sd().has_status(SdStatus::KERNEL_PHASE1_DONE),
        "staging buffer requested before kernel_phase1"
    );
    let staging = staging_region(ctx);
    ctx.region_mut(staging)
}

fn kernel_policy(ctx: &Context) -> VerifyPolicy {
    let mode = ctx.boot_mode();
    let mut official_only = false;
    let mut pinned_key_digest = None;
    if mode == BootMode::Developer && ctx.sd().has_status(SdStatus::SECDATA_FWMP_INIT) {
        let fwmp = secdata_fwmp::flags(ctx);
        official_only = fwmp.contains(FwmpFlags::DEV_OFFICIAL_ONLY);
        if fwmp.contains(FwmpFlags::DEV_USE_KEY_HASH) {
            pinned_key_digest = Some(secdata_fwmp::dev_key_hash(ctx));
        }
    }
    VerifyPolicy {
        boot_mode: mode,
        min_version: ctx.sd().kernel_version_secdata,
        official_only,
        pinned_key_digest,
        // Developer and recovery boots are physically gated, lower-trust
        // paths; both skip rollback checking.
        disable_rollback_check: matches!(mode, BootMode::Developer | BootMode::ManualRecovery),
    }
}

/// Verify the candidate vblock currently staged in the staging buffer
/// (first `staged_len` bytes).  May be called once per candidate; a
/// failure rejects only that candidate.
pub fn load_kernel_vblock<E: BootEnv>(
    ctx: &mut Context,
    env: &mut E,
    staged_len: u32,
) -> BootResult<()> {
    assert!(
        ctx.sd().has_status(SdStatus::KERNEL_PHASE1_DONE),
        "load_kernel_vblock called before kernel_phase1"
    );
    let staging = staging_region(ctx);
    if staged_len > staging.size {
        return Err(BootError::WORKBUF_REGION_RANGE);
    }
    let policy = kernel_policy(ctx);

    let (kernel_version, signed, keyblock_size, vblock_size, body_size, load_address);
    {
        let key_region = Region {
            offset: ctx.sd().kernel_key_offset,
            size: ctx.sd().kernel_key_size,
        };
        let key = PackedKeyView::from_blob(ctx.region(key_region)?)?;
        let vblock = &ctx.region(staging)?[..staged_len as usize];
        let mut verifier = VblockVerifier::new(&mut *env);
        let info = verifier.verify_kernel_vblock(vblock, &key, &policy)?;
        kernel_version = info.kernel_version;
        signed = info.signed;
        keyblock_size = info.keyblock_size;
        vblock_size = info.vblock_size;
        body_size = info.body_size;
        load_address = info.body_load_address;
    }

    let data_key_field = Keyblock::data_key_field_offset() as u32;
    let sd = ctx.sd_mut();
    sd.kernel_version = kernel_version;
    sd.kernel_signed = signed as u8;
    sd.kernel_body_offset = vblock_size;
    sd.kernel_body_size = body_size;
    sd.kernel_body_load_address = load_address;
    sd.data_key_offset = staging.offset + data_key_field;
    sd.data_key_size = keyblock_size - data_key_field;
    sd.add_status(SdStatus::KERNEL_VBLOCK_VERIFIED);

    bprintln!(
        "[k2] vblock ok, kernel version {} signed {}",
        kernel_version,
        signed as u8
    );
    Ok(())
}

/// Size, offset and load address of the kernel body for the most recently
/// verified vblock.
pub fn kernel_body_info(ctx: &Context) -> BootResult<KernelBodyInfo> {
    assert!(
        ctx.sd().has_status(SdStatus::KERNEL_VBLOCK_VERIFIED),
        "kernel body info requested before a vblock verified"
    );
    Ok(KernelBodyInfo {
        offset: ctx.sd().kernel_body_offset,
        size: ctx.sd().kernel_body_size,
        load_address: ctx.sd().kernel_body_load_address,
        signed: ctx.sd().kernel_signed != 0,
    })
}

/// Verify the kernel body the caller loaded or mapped.  The staging buffer
/// must still hold the vblock that [`load_kernel_vblock`] verified.
pub fn verify_kernel_data<E: BootEnv>(
    ctx: &mut Context,
    env: &mut E,
    body: &[u8],
) -> BootResult<()> {
    assert!(
        ctx.sd().has_status(SdStatus::KERNEL_VBLOCK_VERIFIED),
        "verify_kernel_data called before load_kernel_vblock"
    );
    let staging = staging_region(ctx);
    let declared = ctx.sd().kernel_body_size;

    {
        let vblock = ctx.region(staging)?;
        let kb = Keyblock::read_from_prefix(vblock).ok_or(BootError::KEYBLOCK_TOO_SMALL)?;
        let pre_bytes = vblock
            .get(kb.keyblock_size() as usize..)
            .ok_or(BootError::KEYBLOCK_SIZE)?;
        let pre =
            KernelPreamble::read_from_prefix(pre_bytes).ok_or(BootError::PREAMBLE_TOO_SMALL)?;
        let sig_range = pre
            .body_signature()
            .sig_range(pre.preamble_size())
            .ok_or(BootError::PREAMBLE_SIGNATURE_RANGE)?;
        let body_sig = &pre_bytes[sig_range];

        let key_region = Region {
            offset: ctx.sd().data_key_offset,
            size: ctx.sd().data_key_size,
        };
        let key = PackedKeyView::from_blob(ctx.region(key_region)?)?;
        let mut verifier = VblockVerifier::new(&mut *env);
        verifier.verify_body(body, &key, body_sig, declared)?;
    }

    ctx.sd_mut().add_status(SdStatus::KERNEL_BODY_VERIFIED);
    bprintln!("[k2] kernel body verified");
    Ok(())
}

/// Clean up after kernel verification and, if the caller authorized it,
/// roll the stored kernel version forward to the pending verified version
/// (clamped by the nvdata roll-forward limit).
pub fn kernel_phase3(ctx: &mut Context) -> BootResult<ControlRequest> {
    assert!(
        ctx.sd().has_status(SdStatus::KERNEL_PHASE1_DONE),
        "kernel_phase3 called before kernel_phase1"
    );
    let pending = ctx.sd().kernel_version;
    let stored = ctx.sd().kernel_version_secdata;
    if ctx.flags().contains(ContextFlags::ALLOW_KERNEL_ROLL_FORWARD) && pending > stored {
        let clamp = nvdata::get(ctx, NvField::KernelMaxRollForward);
        let target = if clamp != 0 { pending.min(clamp) } else { pending };
        if target > stored {
            secdata_kernel::set(ctx, KernelParam::Versions, target)?;
            ctx.sd_mut().kernel_version_secdata = target;
            bprintln!("[k3] kernel version rolled forward to {}", target);
        }
    }
    Ok(ControlRequest::Continue)
}
