/*++

Licensed under the Apache-2.0 license.

File Name:

    scan.rs

Abstract:

    File contains the kernel partition scanner.  Candidates come from an
    externally-defined enumerator; each one runs through the verification
    pipeline, and per-candidate failures (including disk I/O errors) never
    abort the scan.

--*/

use crate::env::BootEnv;
use crate::kernel;
use vaultboot_core::{bprintln, Context, SdStatus};
use vaultboot_error::{BootError, BootResult};
use vaultboot_image_types::KEYBLOCK_BYTE_SIZE;

/// One scan position yielded by the partition enumerator.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    /// Enumerator-assigned index, reported back in outcomes
    pub index: u32,

    /// Byte offset of the partition on its device
    pub start: u64,

    /// Partition size in bytes
    pub size: u64,
}

/// Scan outcome recorded for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The scanner reached this candidate
    Tried,
    /// Full verification chain passed
    Good,
    /// Skipped or rejected
    Bad,
}

/// Kernel partition enumerator and reader, implemented by the caller over
/// its disk stack.
pub trait KernelPartitions {
    /// Next candidate in the externally-defined scan order, or `None` when
    /// exhausted.
    fn next(&mut self) -> Option<Candidate>;

    /// Read `buf.len()` bytes at `offset` within a candidate partition.
    fn read(&mut self, candidate: &Candidate, offset: u64, buf: &mut [u8]) -> BootResult<()>;

    /// Record the scan outcome for a candidate.
    fn set_outcome(&mut self, candidate: &Candidate, outcome: Outcome);
}

/// A fully verified kernel, ready for the caller to map or copy.
#[derive(Debug, Clone, Copy)]
pub struct LoadedKernel {
    /// The partition the kernel was found on
    pub partition: Candidate,

    /// Byte offset of the body within the partition
    pub body_offset: u64,

    /// Declared body size
    pub body_size: u32,

    /// Address the body expects to be loaded at
    pub body_load_address: u64,

    /// Full signature verification was used (not the hash-only path)
    pub signed: bool,

    /// Number of candidates examined, the successful one included
    pub tried: u32,
}

/// Scan kernel candidates until one passes the full verification chain.
///
/// `body_buf_size` is the caller's ceiling for the body it can load; a
/// candidate declaring a larger body is rejected for that reason alone and
/// the scan continues.  Exhausting all candidates distinguishes "nothing
/// readable found" from "kernels found but none verified".
pub fn scan_kernel_partitions<E: BootEnv, D: KernelPartitions>(
    ctx: &mut Context,
    env: &mut E,
    disk: &mut D,
    body_buf_size: u32,
) -> BootResult<LoadedKernel> {
    assert!(
        ctx.sd().has_status(SdStatus::KERNEL_PHASE1_DONE),
        "partition scan started before kernel_phase1"
    );
    let staging = kernel::staging_region(ctx);
    let mut tried = 0u32;
    let mut found = 0u32;

    while let Some(candidate) = disk.next() {
        tried += 1;
        disk.set_outcome(&candidate, Outcome::Tried);

        if candidate.size < KEYBLOCK_BYTE_SIZE as u64 {
            // Undersized; skip without reading.
            bprintln!("[scan] partition {} too small", candidate.index);
            disk.set_outcome(&candidate, Outcome::Bad);
            continue;
        }

        let staged_len = (staging.size as u64).min(candidate.size) as u32;
        let read_result = {
            let buf = ctx.region_mut(staging)?;
            disk.read(&candidate, 0, &mut buf[..staged_len as usize])
        };
        if let Err(e) = read_result {
            // Disk I/O failure is never fatal to the scan.
            bprintln!(
                "[scan] read failed on partition {} ({})",
                candidate.index,
                e.code()
            );
            disk.set_outcome(&candidate, Outcome::Bad);
            continue;
        }
        found += 1;

        if let Err(e) = kernel::load_kernel_vblock(ctx, env, staged_len) {
            bprintln!(
                "[scan] partition {} rejected ({})",
                candidate.index,
                e.code()
            );
            disk.set_outcome(&candidate, Outcome::Bad);
            continue;
        }

        let info = kernel::kernel_body_info(ctx)?;
        if info.offset as u64 + info.size as u64 > candidate.size {
            bprintln!(
                "[scan] partition {} rejected ({})",
                candidate.index,
                BootError::SCAN_CANDIDATE_TOO_SMALL.code()
            );
            disk.set_outcome(&candidate, Outcome::Bad);
            continue;
        }
        if info.size > body_buf_size {
            // Distinct from a verification failure: the kernel is good but
            // the caller can't hold it.
            bprintln!(
                "[scan] partition {} rejected ({})",
                candidate.index,
                BootError::SCAN_BODY_EXCEEDS_BUFFER.code()
            );
            disk.set_outcome(&candidate, Outcome::Bad);
            continue;
        }

        disk.set_outcome(&candidate, Outcome::Good);
        bprintln!(
            "[scan] partition {} verified after {} candidates",
            candidate.index,
            tried
        );
        return Ok(LoadedKernel {
            partition: candidate,
            body_offset: info.offset as u64,
            body_size: info.size,
            body_load_address: info.load_address,
            signed: info.signed,
            tried,
        });
    }

    Err(if found > 0 {
        BootError::SCAN_INVALID_KERNEL_FOUND
    } else {
        BootError::SCAN_NO_KERNEL_FOUND
    })
}
