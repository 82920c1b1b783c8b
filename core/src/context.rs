/*++

Licensed under the Apache-2.0 license.

File Name:

    context.rs

Abstract:

    File contains the per-boot context.  The context is the caller-facing
    view of the workbuf arena: flags, the persistent data images, the boot
    mode, and arena allocation.  It is constructed once per boot and
    threaded by mutable reference through every operation; there is no
    process-wide state.

--*/

use crate::nvdata::NVDATA_SIZE;
use crate::secdata::firmware::SECDATA_FIRMWARE_SIZE;
use crate::secdata::fwmp::SECDATA_FWMP_MAX_SIZE;
use crate::secdata::kernel::SECDATA_KERNEL_SIZE;
use crate::workbuf::{Region, SharedData, Workbuf};
use vaultboot_error::BootResult;

bitflags::bitflags! {
    /// Context flags.
    ///
    /// Unless noted otherwise, flags are set by verified boot and may be
    /// read but not written by the caller.
    pub struct ContextFlags : u64 {
        /// nvdata has changed; caller must persist it, then clear this flag
        const NVDATA_CHANGED            = 1 << 0;
        /// secdata_firmware has changed; caller must persist it, then clear
        /// this flag
        const SECDATA_FIRMWARE_CHANGED  = 1 << 1;
        /// Recovery mode is requested this boot
        const RECOVERY_MODE             = 1 << 2;
        /// Developer mode is requested this boot
        const DEVELOPER_MODE            = 1 << 3;
        /// Recovery was physically requested.  Caller may set this flag
        /// when initializing the context
        const FORCE_RECOVERY_MODE       = 1 << 4;
        /// Using firmware slot B; slot A if clear
        const FW_SLOT_B                 = 1 << 5;
        /// secdata_kernel has changed; caller must persist it, then clear
        /// this flag
        const SECDATA_KERNEL_CHANGED    = 1 << 6;
        /// Allow kernel verification to roll the secure version forward.
        /// Caller may set this flag before the kernel finalize phase
        const ALLOW_KERNEL_ROLL_FORWARD = 1 << 7;
        /// Boot optimistically: don't consume firmware tries.  Caller may
        /// set this flag when initializing the context
        const NOFAIL_BOOT               = 1 << 8;
        /// No firmware management parameters exist on this system; use
        /// defaults.  Caller may set this flag before the kernel phases.
        /// Do not set it when the record exists but is invalid
        const NO_SECDATA_FWMP           = 1 << 9;
        /// Erase developer mode state if it is enabled.  Caller may set
        /// this flag when initializing the context
        const DISABLE_DEVELOPER_MODE    = 1 << 10;
        /// Diagnostic boot is supported on this platform.  Caller may set
        /// this flag when initializing the context
        const DIAGNOSTIC_UI_ENABLED     = 1 << 11;
        /// Boot into developer mode is allowed by policy
        const DEV_BOOT_ALLOWED          = 1 << 12;
        /// Developer boot from external media is allowed by policy
        const DEV_BOOT_EXTERNAL_ALLOWED = 1 << 13;
        /// Developer boot of an alternate bootloader is allowed by policy
        const DEV_BOOT_ALTFW_ALLOWED    = 1 << 14;
    }
}

/// Boot mode decided during the first firmware phase.
///
/// Modes are mutually exclusive.  When a boot satisfies more than one
/// constraint, the mode with the higher priority wins; priority is the
/// declaration order below.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// Not decided yet
    Undefined = 0,
    /// Physically requested recovery, regardless of developer state
    ManualRecovery = 1,
    /// Recovery requested without physical presence; refused
    BrokenScreen = 2,
    /// Diagnostic boot requested by a sticky flag from the prior boot
    Diagnostics = 3,
    /// Developer boot: self-signed kernels acceptable
    Developer = 4,
    /// Normal boot: kernel must be fully verified
    Normal = 5,
}

impl From<u8> for BootMode {
    fn from(val: u8) -> Self {
        match val {
            1 => BootMode::ManualRecovery,
            2 => BootMode::BrokenScreen,
            3 => BootMode::Diagnostics,
            4 => BootMode::Developer,
            5 => BootMode::Normal,
            _ => BootMode::Undefined,
        }
    }
}

/// Per-boot verified boot context.
pub struct Context<'a> {
    wb: Workbuf<'a>,
}

impl<'a> Context<'a> {
    /// Initialize a fresh context over a caller-supplied workbuf.  Call
    /// once per boot, before any other operation.
    pub fn init(workbuf: &'a mut [u8]) -> BootResult<Self> {
        Ok(Self {
            wb: Workbuf::init(workbuf)?,
        })
    }

    /// Restore the context from a previously-initialized workbuf, e.g.
    /// after transitioning between firmware applications.
    pub fn reinit(workbuf: &'a mut [u8]) -> BootResult<Self> {
        Ok(Self {
            wb: Workbuf::reinit(workbuf)?,
        })
    }

    /// Move the live workbuf into a new, disjoint buffer and restore the
    /// context from it.
    pub fn relocate(dst: &'a mut [u8], src: &[u8]) -> BootResult<Self> {
        Ok(Self {
            wb: Workbuf::relocate(dst, src)?,
        })
    }

    /// Move the live workbuf from `src_offset` to the start of the same
    /// buffer (the ranges may overlap) and restore the context.
    pub fn relocate_within(workbuf: &'a mut [u8], src_offset: usize) -> BootResult<Self> {
        Ok(Self {
            wb: Workbuf::relocate_within(workbuf, src_offset)?,
        })
    }

    /// Shared workbuf state.  Intended for verified-boot internals; callers
    /// should use the typed accessors instead.
    pub fn sd(&self) -> &SharedData {
        self.wb.sd()
    }

    /// Shared workbuf state, mutable.  Intended for verified-boot internals.
    pub fn sd_mut(&mut self) -> &mut SharedData {
        self.wb.sd_mut()
    }

    pub fn flags(&self) -> ContextFlags {
        ContextFlags::from_bits_truncate(self.sd().flags)
    }

    pub fn set_flags(&mut self, flags: ContextFlags) {
        self.sd_mut().flags |= flags.bits();
    }

    pub fn clear_flags(&mut self, flags: ContextFlags) {
        self.sd_mut().flags &= !flags.bits();
    }

    /// Boot mode.  Valid only after the first firmware phase completes;
    /// read-only to the caller thereafter.
    pub fn boot_mode(&self) -> BootMode {
        BootMode::from(self.sd().boot_mode)
    }

    /// Set the boot mode.  Called exactly once, by the boot mode resolver.
    pub fn set_boot_mode(&mut self, mode: BootMode) {
        assert_eq!(
            self.boot_mode(),
            BootMode::Undefined,
            "boot mode already decided"
        );
        self.sd_mut().boot_mode = mode as u8;
    }

    /// Recovery reason recorded this boot, if any.
    pub fn recovery_reason(&self) -> u8 {
        self.sd().recovery_reason
    }

    pub fn nvdata(&self) -> &[u8; NVDATA_SIZE] {
        &self.sd().nvdata
    }

    pub fn nvdata_mut(&mut self) -> &mut [u8; NVDATA_SIZE] {
        &mut self.sd_mut().nvdata
    }

    pub fn secdata_firmware(&self) -> &[u8; SECDATA_FIRMWARE_SIZE] {
        &self.sd().secdata_firmware
    }

    pub fn secdata_firmware_mut(&mut self) -> &mut [u8; SECDATA_FIRMWARE_SIZE] {
        &mut self.sd_mut().secdata_firmware
    }

    pub fn secdata_kernel(&self) -> &[u8; SECDATA_KERNEL_SIZE] {
        &self.sd().secdata_kernel
    }

    pub fn secdata_kernel_mut(&mut self) -> &mut [u8; SECDATA_KERNEL_SIZE] {
        &mut self.sd_mut().secdata_kernel
    }

    pub fn secdata_fwmp(&self) -> &[u8; SECDATA_FWMP_MAX_SIZE] {
        &self.sd().secdata_fwmp
    }

    pub fn secdata_fwmp_mut(&mut self) -> &mut [u8; SECDATA_FWMP_MAX_SIZE] {
        &mut self.sd_mut().secdata_fwmp
    }

    /// Allocate from the workbuf arena.
    pub fn alloc(&mut self, size: u32) -> BootResult<Region> {
        self.wb.alloc(size)
    }

    /// Resolve an arena region handle.
    pub fn region(&self, region: Region) -> BootResult<&[u8]> {
        self.wb.region(region)
    }

    /// Resolve an arena region handle, mutable.
    pub fn region_mut(&mut self, region: Region) -> BootResult<&mut [u8]> {
        self.wb.region_mut(region)
    }
}
