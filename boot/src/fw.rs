/*++

Licensed under the Apache-2.0 license.

File Name:

    fw.rs

Abstract:

    File contains the firmware phases: nvdata/secdata/GBB bring-up and the
    boot mode decision (phase 1), slot selection (phase 2), firmware vblock
    verification (phase 3) and the streaming body hash the caller runs over
    each RW firmware section.

--*/

use crate::env::{BootEnv, Resource};
use crate::fail::fail;
use crate::mode::{self, RecoveryCheck};
use crate::slot;
use crate::ControlRequest;
use vaultboot_core::secdata::firmware::{self as secdata_firmware, FirmwareParam};
use vaultboot_core::{
    bprintln, gbb, nvdata, recovery, Context, FwResult, GbbView, Region, SdStatus,
    GBB_MAX_COPY_SIZE,
};
use vaultboot_error::{BootError, BootResult};
use vaultboot_image_types::{
    FwPreamble, GbbFlags, Keyblock, PackedKeyView, DIGEST_MAX_BYTE_SIZE, FW_PREAMBLE_BYTE_SIZE,
    GBB_HEADER_BYTE_SIZE, KEYBLOCK_BYTE_SIZE,
};
use vaultboot_image_verify::{VblockVerifier, VerifyEnv, VerifyPolicy};
use zerocopy::FromBytes;

/// Largest firmware vblock (keyblock + preamble) the core will stage.
pub const FW_VBLOCK_MAX_SIZE: usize = 16 * 1024;

/// Firmware phase 1: initialize the persistent stores, load the GBB and
/// decide the boot mode.
///
/// Subsystem failures here do not abort the phase; they record a recovery
/// reason and the boot proceeds into a recovery mode, which the caller
/// discovers through [`Context::boot_mode`].  A `Reboot` directive means
/// persistent state was staged and the machine should restart now.
pub fn fw_phase1<E: BootEnv>(ctx: &mut Context, env: &mut E) -> BootResult<ControlRequest> {
    bprintln!("[fw1] start");
    nvdata::init(ctx);

    if let Err(e) = secdata_firmware::init(ctx) {
        bprintln!("[fw1] secdata firmware init failed ({})", e.code());
        fail(ctx, recovery::SECDATA_FIRMWARE_INIT, e.subcode());
    }

    if let Err(e) = init_gbb(ctx, env) {
        bprintln!("[fw1] GBB init failed ({})", e.code());
        fail(ctx, recovery::GBB_HEADER, e.subcode());
    }

    if let Err(e) = mode::check_dev_switch(ctx) {
        bprintln!("[fw1] dev switch check failed ({})", e.code());
        fail(ctx, recovery::DEV_SWITCH, e.subcode());
    }

    if let RecoveryCheck::Reboot = mode::check_recovery(ctx) {
        // We won't return through the normal flow; push pending state out
        // before asking for the reboot.
        env.commit(ctx).map_err(|_| BootError::ENV_COMMIT)?;
        return Ok(ControlRequest::Reboot);
    }

    mode::resolve_boot_mode(ctx);
    ctx.sd_mut().add_status(SdStatus::FW_PHASE1_DONE);
    bprintln!("[fw1] boot mode {}", ctx.boot_mode() as u8);
    Ok(ControlRequest::Continue)
}

/// Firmware phase 2: select the A/B slot to try this boot.
pub fn fw_phase2(ctx: &mut Context) -> BootResult<ControlRequest> {
    assert!(
        ctx.sd().has_status(SdStatus::FW_PHASE1_DONE),
        "fw_phase2 called before fw_phase1"
    );
    assert!(
        !ctx.sd().has_status(SdStatus::CHOSE_SLOT),
        "fw_phase2 called twice"
    );
    slot::select_fw_slot(ctx)?;
    Ok(ControlRequest::Continue)
}

/// Firmware phase 3: verify the selected slot's keyblock and preamble.
///
/// On success the caller should lock down secdata_firmware and start
/// feeding RW firmware sections through the body hash calls.
pub fn fw_phase3<E: BootEnv>(ctx: &mut Context, env: &mut E) -> BootResult<ControlRequest> {
    assert!(
        ctx.sd().has_status(SdStatus::CHOSE_SLOT),
        "fw_phase3 called before fw_phase2"
    );
    match load_fw_vblock(ctx, env) {
        Ok(()) => Ok(ControlRequest::Continue),
        Err(e) => {
            fail(ctx, recovery::RO_INVALID_RW, e.subcode());
            Err(e)
        }
    }
}

fn init_gbb<E: BootEnv>(ctx: &mut Context, env: &mut E) -> BootResult<()> {
    // Header first, to learn how much of the block we need to keep.
    let mut header_bytes = [0u8; GBB_HEADER_BYTE_SIZE];
    env.read_resource(Resource::Gbb, 0, &mut header_bytes)?;
    let view = GbbView::parse(&header_bytes)?;
    let header = view.header;

    let mut extent = header.header_size();
    for (offset, size) in [
        (header.hwid_offset(), header.hwid_size()),
        (header.rootkey_offset(), header.rootkey_size()),
        (header.recovery_key_offset(), header.recovery_key_size()),
    ] {
        let end = offset
            .checked_add(size)
            .ok_or(BootError::GBB_REGION_RANGE)?;
        extent = extent.max(end);
    }
    if extent as usize > GBB_MAX_COPY_SIZE {
        return Err(BootError::GBB_REGION_RANGE);
    }

    let region = ctx.alloc(extent)?;
    env.read_resource(Resource::Gbb, 0, ctx.region_mut(region)?)?;

    // Validate the full copy, keys included, before anything trusts it.
    {
        let view = GbbView::parse(ctx.region(region)?)?;
        view.rootkey()?;
        view.recovery_key()?;
    }

    let sd = ctx.sd_mut();
    sd.gbb_offset = region.offset;
    sd.gbb_size = region.size;
    sd.add_status(SdStatus::GBB_INIT);
    Ok(())
}

fn load_fw_vblock<E: BootEnv>(ctx: &mut Context, env: &mut E) -> BootResult<()> {
    // Size the vblock from its headers before pulling it into the arena.
    let mut kb_header = [0u8; KEYBLOCK_BYTE_SIZE];
    env.read_resource(Resource::FwVblock, 0, &mut kb_header)?;
    let kb = Keyblock::read_from(&kb_header[..]).ok_or(BootError::KEYBLOCK_TOO_SMALL)?;
    let kb_size = kb.keyblock_size();
    if (kb_size as usize) < KEYBLOCK_BYTE_SIZE || kb_size as usize > FW_VBLOCK_MAX_SIZE {
        return Err(BootError::KEYBLOCK_SIZE);
    }

    let mut pre_header = [0u8; FW_PREAMBLE_BYTE_SIZE];
    env.read_resource(Resource::FwVblock, kb_size, &mut pre_header)?;
    let pre = FwPreamble::read_from(&pre_header[..]).ok_or(BootError::PREAMBLE_TOO_SMALL)?;
    let pre_size = pre.preamble_size();
    if (pre_size as usize) < FW_PREAMBLE_BYTE_SIZE {
        return Err(BootError::PREAMBLE_SIZE);
    }
    let total = (kb_size as usize)
        .checked_add(pre_size as usize)
        .filter(|t| *t <= FW_VBLOCK_MAX_SIZE)
        .ok_or(BootError::PREAMBLE_SIZE)?;

    let region = ctx.alloc(total as u32)?;
    env.read_resource(Resource::FwVblock, 0, ctx.region_mut(region)?)?;

    let gbb_flags = mode::gbb_flags_or_empty(ctx);
    let policy = VerifyPolicy {
        boot_mode: ctx.boot_mode(),
        min_version: ctx.sd().fw_version_secdata,
        official_only: false,
        pinned_key_digest: None,
        disable_rollback_check: gbb_flags.contains(GbbFlags::DISABLE_FW_ROLLBACK_CHECK),
    };

    let (fw_version, preamble_offset, preamble_size);
    {
        let gbb_view = gbb::view(ctx)?;
        let root_key = gbb_view.rootkey()?;
        let vblock = ctx.region(region)?;
        let mut verifier = VblockVerifier::new(&mut *env);
        let info = verifier.verify_fw_vblock(vblock, &root_key, &policy)?;
        fw_version = info.fw_version;
        preamble_offset = info.preamble_offset;
        preamble_size = info.preamble_size;
    }

    // Everything later resolves through these handles into the arena copy.
    let data_key_field = Keyblock::data_key_field_offset() as u32;
    let subkey_field = FwPreamble::kernel_subkey_field_offset() as u32;
    let sd = ctx.sd_mut();
    sd.fw_version = fw_version;
    sd.fw_preamble_offset = region.offset + preamble_offset;
    sd.fw_preamble_size = preamble_size;
    sd.data_key_offset = region.offset + data_key_field;
    sd.data_key_size = kb_size - data_key_field;
    sd.kernel_key_offset = sd.fw_preamble_offset + subkey_field;
    sd.kernel_key_size = preamble_size - subkey_field;
    sd.add_status(SdStatus::FW_VBLOCK_VERIFIED);

    // Roll the stored version forward only once this same slot has already
    // proven itself across a full boot.
    if fw_version > ctx.sd().fw_version_secdata
        && ctx.sd().last_fw_slot == ctx.sd().fw_slot
        && FwResult::from(ctx.sd().last_fw_result as u32) == FwResult::Success
    {
        secdata_firmware::set(ctx, FirmwareParam::Versions, fw_version)?;
        ctx.sd_mut().fw_version_secdata = fw_version;
    }

    bprintln!(
        "[fw3] slot {} verified, fw version {}",
        ctx.sd().fw_slot,
        fw_version
    );
    Ok(())
}

fn fw_preamble(ctx: &Context) -> BootResult<FwPreamble> {
    let region = Region {
        offset: ctx.sd().fw_preamble_offset,
        size: ctx.sd().fw_preamble_size,
    };
    FwPreamble::read_from_prefix(ctx.region(region)?).ok_or(BootError::PREAMBLE_TOO_SMALL)
}

fn data_key<'a>(ctx: &'a Context) -> BootResult<PackedKeyView<'a>> {
    let region = Region {
        offset: ctx.sd().data_key_offset,
        size: ctx.sd().data_key_size,
    };
    PackedKeyView::from_blob(ctx.region(region)?)
}

/// Size of the signed firmware body.  Zero until phase 3 succeeds.
pub fn firmware_body_size(ctx: &Context) -> u32 {
    if !ctx.sd().has_status(SdStatus::FW_VBLOCK_VERIFIED) {
        return 0;
    }
    match fw_preamble(ctx) {
        Ok(pre) => pre.body_signature().data_size(),
        Err(_) => 0,
    }
}

/// Begin the digest over the firmware body sections.
pub fn init_body_hash<E: BootEnv>(ctx: &mut Context, env: &mut E) -> BootResult<()> {
    assert!(
        ctx.sd().has_status(SdStatus::FW_VBLOCK_VERIFIED),
        "body hash started before fw_phase3"
    );
    let body_size = fw_preamble(ctx)?.body_signature().data_size();
    let (_, hash_alg) = data_key(ctx)?.header.alg()?;
    env.digest_init(hash_alg, body_size)
        .map_err(|_| BootError::BODY_DIGEST)?;
    let sd = ctx.sd_mut();
    sd.body_hash_remaining = body_size;
    sd.add_status(SdStatus::BODY_HASH_STARTED);
    Ok(())
}

/// Feed the next loaded firmware section into the running body digest.
pub fn extend_body_hash<E: BootEnv>(
    ctx: &mut Context,
    env: &mut E,
    data: &[u8],
) -> BootResult<()> {
    assert!(
        ctx.sd().has_status(SdStatus::BODY_HASH_STARTED),
        "body hash extended before init"
    );
    let remaining = ctx.sd().body_hash_remaining;
    if data.len() as u32 > remaining {
        return Err(BootError::BODY_SIZE);
    }
    env.digest_extend(data).map_err(|_| BootError::BODY_DIGEST)?;
    ctx.sd_mut().body_hash_remaining = remaining - data.len() as u32;
    Ok(())
}

/// Finish the body digest and check it against the preamble's signature.
pub fn check_body_hash<E: BootEnv>(ctx: &mut Context, env: &mut E) -> BootResult<()> {
    assert!(
        ctx.sd().has_status(SdStatus::BODY_HASH_STARTED),
        "body hash checked before init"
    );
    if ctx.sd().body_hash_remaining != 0 {
        return Err(BootError::BODY_INCOMPLETE);
    }

    {
        let key = data_key(ctx)?;
        let (_, hash_alg) = key.header.alg()?;
        let mut digest = [0u8; DIGEST_MAX_BYTE_SIZE];
        let dlen = hash_alg.digest_size();
        env.digest_finalize(&mut digest[..dlen])
            .map_err(|_| BootError::BODY_DIGEST)?;

        let pre = fw_preamble(ctx)?;
        let sig_range = pre
            .body_signature()
            .sig_range(pre.preamble_size())
            .ok_or(BootError::PREAMBLE_SIGNATURE_RANGE)?;
        let pre_region = Region {
            offset: ctx.sd().fw_preamble_offset,
            size: ctx.sd().fw_preamble_size,
        };
        let pre_bytes = ctx.region(pre_region)?;
        env.verify_digest(&key, &pre_bytes[sig_range], &digest[..dlen])
            .map_err(|_| BootError::BODY_SIGNATURE)?;
    }

    ctx.sd_mut().add_status(SdStatus::FW_BODY_VERIFIED);
    bprintln!("[fw3] body verified");
    Ok(())
}
