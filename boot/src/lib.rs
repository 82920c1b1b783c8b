/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Verified boot decision engine: boot-mode resolution, firmware slot
    selection, the firmware and kernel verification phases and the kernel
    partition scanner.

    Call order per boot: fw_phase1 -> fw_phase2 -> fw_phase3 (plus the body
    hash calls), then kernel_phase1 -> scan_kernel_partitions (or
    load_kernel_vblock / verify_kernel_data per candidate) -> kernel_phase3.
    After every call the caller must inspect the context changed flags and
    persist what they name.  Calling out of order is a programming error
    and aborts.

--*/
#![cfg_attr(not(feature = "std"), no_std)]

mod api;
mod env;
mod fail;
mod fw;
mod kernel;
mod mode;
mod scan;
mod slot;

pub use api::{
    disable_developer_mode, enable_developer_mode, gbb_flags, gbb_read_hwid,
    kernel_rollback_version, request_diagnostics,
};
pub use slot::confirm_fw_boot;
pub use env::{BootEnv, Resource};
pub use fail::fail;
pub use fw::{
    check_body_hash, extend_body_hash, firmware_body_size, fw_phase1, fw_phase2, fw_phase3,
    init_body_hash, FW_VBLOCK_MAX_SIZE,
};
pub use kernel::{
    kernel_body_info, kernel_phase1, kernel_phase3, kernel_staging_buffer, load_kernel_vblock,
    verify_kernel_data, KernelBodyInfo, KERNEL_VBLOCK_MAX_SIZE,
};
pub use scan::{scan_kernel_partitions, Candidate, KernelPartitions, LoadedKernel, Outcome};

/// Successful-but-directive outcome of a phase entry point.  Directives are
/// not errors: the boot is proceeding exactly as designed, but the caller
/// must act before continuing the normal flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Proceed with the next phase
    Continue,
    /// Reboot the machine; persistent state has been staged for the next
    /// boot
    Reboot,
    /// Shut the machine down
    Shutdown,
}
