/*++

Licensed under the Apache-2.0 license.

File Name:

    workbuf.rs

Abstract:

    File contains the workbuf arena: a caller-supplied fixed byte region
    holding the shared data header and all transient verification state for
    one boot.  Allocation is a forward-only offset bump; nothing is freed
    until the next boot.

--*/

use crate::nvdata::NVDATA_SIZE;
use crate::secdata::firmware::SECDATA_FIRMWARE_SIZE;
use crate::secdata::fwmp::SECDATA_FWMP_MAX_SIZE;
use crate::secdata::kernel::SECDATA_KERNEL_SIZE;
use vaultboot_error::{BootError, BootResult};
use zerocopy::{AsBytes, FromBytes, LayoutVerified};

/// Required alignment of the workbuf base address.
pub const WORKBUF_ALIGN: usize = 16;

/// Granularity of workbuf allocations.
pub const WORKBUF_ALLOC_ALIGN: u32 = 8;

/// "VBWB"
pub const SHARED_DATA_MAGIC: u32 = 0x4257_4256;

/// Shared data struct version.  The major version must match exactly; an
/// arena carrying a higher minor version is accepted on reinit.
pub const SHARED_DATA_VERSION_MAJOR: u16 = 3;
pub const SHARED_DATA_VERSION_MINOR: u16 = 1;

/// Recommended workbuf size for the firmware verification stage.
pub const FIRMWARE_WORKBUF_RECOMMENDED_SIZE: usize = 16 * 1024;

/// Recommended workbuf size once kernel verification runs (covers the
/// kernel vblock staging buffer).
pub const KERNEL_WORKBUF_RECOMMENDED_SIZE: usize = 80 * 1024;

pub const SHARED_DATA_BYTE_SIZE: usize = core::mem::size_of::<SharedData>();

bitflags::bitflags! {
    /// Which subsystems have been initialized this boot.
    pub struct SdStatus : u32 {
        const NV_INIT                 = 1 << 0;
        const SECDATA_FIRMWARE_INIT   = 1 << 1;
        const SECDATA_KERNEL_INIT     = 1 << 2;
        const SECDATA_FWMP_INIT       = 1 << 3;
        const GBB_INIT                = 1 << 4;
        const FW_PHASE1_DONE          = 1 << 5;
        const CHOSE_SLOT              = 1 << 6;
        const FW_VBLOCK_VERIFIED      = 1 << 7;
        const BODY_HASH_STARTED       = 1 << 8;
        const FW_BODY_VERIFIED        = 1 << 9;
        const KERNEL_PHASE1_DONE      = 1 << 10;
        const KERNEL_VBLOCK_VERIFIED  = 1 << 11;
        const KERNEL_BODY_VERIFIED    = 1 << 12;
    }
}

/// Bounds-checked handle to a workbuf allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub offset: u32,
    pub size: u32,
}

impl Region {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// State shared across all phases of one boot, stored at offset 0 of the
/// workbuf.  Created on first initialization, re-derived (never recreated)
/// on re-entry after a context switch.
#[repr(C)]
#[derive(AsBytes, FromBytes)]
pub struct SharedData {
    /// Context flags, see `ContextFlags`
    pub flags: u64,

    /// Load address declared by the verified kernel preamble
    pub kernel_body_load_address: u64,

    /// Magic
    pub magic: u32,

    /// Total size of the workbuf
    pub workbuf_size: u32,

    /// Bytes of the workbuf in use; never exceeds `workbuf_size`
    pub workbuf_used: u32,

    /// Subsystem init status, see `SdStatus`
    pub status: u32,

    /// Firmware version of the slot being tried (combined rollback value)
    pub fw_version: u32,

    /// Firmware version stored in the secure counter at init
    pub fw_version_secdata: u32,

    /// Pending kernel version from the last verified vblock
    pub kernel_version: u32,

    /// Kernel version stored in the secure counter at init
    pub kernel_version_secdata: u32,

    /// GBB copy
    pub gbb_offset: u32,
    pub gbb_size: u32,

    /// Packed key blob used to verify kernel keyblocks
    pub kernel_key_offset: u32,
    pub kernel_key_size: u32,

    /// Packed key blob checking the current payload body (firmware data
    /// key until the kernel stage takes over)
    pub data_key_offset: u32,
    pub data_key_size: u32,

    /// Firmware preamble copy
    pub fw_preamble_offset: u32,
    pub fw_preamble_size: u32,

    /// Kernel vblock staging buffer
    pub vblock_offset: u32,
    pub vblock_size: u32,

    /// Offset of the kernel body within its partition
    pub kernel_body_offset: u32,

    /// Size of the kernel body declared by the preamble
    pub kernel_body_size: u32,

    /// Bytes of firmware body not yet fed to the running digest
    pub body_hash_remaining: u32,

    /// Struct version
    pub struct_version_major: u16,
    pub struct_version_minor: u16,

    /// Boot mode, see `BootMode`; immutable once set
    pub boot_mode: u8,

    /// Firmware slot being tried this boot (0 = A, 1 = B)
    pub fw_slot: u8,

    /// Slot tried on the previous boot
    pub last_fw_slot: u8,

    /// Result recorded by the previous boot
    pub last_fw_result: u8,

    /// Recovery reason recorded this boot; first reason wins
    pub recovery_reason: u8,

    /// Recovery subcode recorded this boot
    pub recovery_subcode: u8,

    /// Nonzero when the verified kernel used full signature verification
    pub kernel_signed: u8,

    _reserved0: u8,

    /// Volatile flags store
    pub nvdata: [u8; NVDATA_SIZE],

    /// Firmware secure counter record
    pub secdata_firmware: [u8; SECDATA_FIRMWARE_SIZE],

    /// Kernel secure counter record
    pub secdata_kernel: [u8; SECDATA_KERNEL_SIZE],

    /// Firmware management parameters record
    pub secdata_fwmp: [u8; SECDATA_FWMP_MAX_SIZE],

    _reserved1: [u8; 2],
}

impl SharedData {
    fn fresh(workbuf_size: u32) -> Self {
        let mut sd = Self::new_zeroed();
        sd.magic = SHARED_DATA_MAGIC;
        sd.struct_version_major = SHARED_DATA_VERSION_MAJOR;
        sd.struct_version_minor = SHARED_DATA_VERSION_MINOR;
        sd.workbuf_size = workbuf_size;
        sd.workbuf_used = SHARED_DATA_BYTE_SIZE as u32;
        sd
    }

    /// Validate a header against the buffer that is supposed to hold it.
    fn validate(&self, buf_len: usize) -> BootResult<()> {
        if self.magic != SHARED_DATA_MAGIC {
            return Err(BootError::SHARED_DATA_MAGIC);
        }
        if self.struct_version_major != SHARED_DATA_VERSION_MAJOR
            || self.struct_version_minor < SHARED_DATA_VERSION_MINOR
        {
            return Err(BootError::SHARED_DATA_VERSION);
        }
        if (self.workbuf_used as usize) < SHARED_DATA_BYTE_SIZE
            || self.workbuf_used > self.workbuf_size
            || self.workbuf_size as usize > buf_len
        {
            return Err(BootError::SHARED_DATA_INVALID);
        }
        Ok(())
    }

    pub fn status(&self) -> SdStatus {
        SdStatus::from_bits_truncate(self.status)
    }

    pub fn has_status(&self, status: SdStatus) -> bool {
        self.status().contains(status)
    }

    pub fn add_status(&mut self, status: SdStatus) {
        self.status |= status.bits();
    }
}

/// The workbuf arena.
pub struct Workbuf<'a> {
    buf: &'a mut [u8],
}

fn check_align(buf: &[u8]) -> BootResult<()> {
    if buf.as_ptr() as usize % WORKBUF_ALIGN != 0 {
        return Err(BootError::WORKBUF_ALIGN);
    }
    Ok(())
}

impl<'a> Workbuf<'a> {
    /// Initialize a fresh workbuf.  Call once per boot.
    pub fn init(buf: &'a mut [u8]) -> BootResult<Self> {
        check_align(buf)?;
        if buf.len() < SHARED_DATA_BYTE_SIZE {
            return Err(BootError::WORKBUF_SMALL);
        }
        let sd = SharedData::fresh(buf.len() as u32);
        buf[..SHARED_DATA_BYTE_SIZE].copy_from_slice(sd.as_bytes());
        Ok(Self { buf })
    }

    /// Re-derive a workbuf from a previously-initialized arena, e.g. after
    /// switching firmware applications.
    pub fn reinit(buf: &'a mut [u8]) -> BootResult<Self> {
        check_align(buf)?;
        let sd = SharedData::read_from_prefix(&buf[..]).ok_or(BootError::WORKBUF_SMALL)?;
        sd.validate(buf.len())?;
        Ok(Self { buf })
    }

    /// Move a live workbuf from `src` into the disjoint buffer `dst`,
    /// expanding or shrinking to `dst`'s size.  Only the live prefix
    /// (`workbuf_used` bytes) is copied.
    pub fn relocate(dst: &'a mut [u8], src: &[u8]) -> BootResult<Self> {
        check_align(dst)?;
        let sd = SharedData::read_from_prefix(src).ok_or(BootError::WORKBUF_SMALL)?;
        sd.validate(src.len())?;
        let used = sd.workbuf_used as usize;
        if dst.len() < used {
            return Err(BootError::WORKBUF_SMALL);
        }
        dst[..used].copy_from_slice(&src[..used]);
        Self::fixup_size_and_reinit(dst)
    }

    /// Move a live workbuf within a single buffer, from `src_offset` down
    /// to offset 0.  The source and destination ranges may overlap.
    pub fn relocate_within(buf: &'a mut [u8], src_offset: usize) -> BootResult<Self> {
        check_align(buf)?;
        let src = buf.get(src_offset..).ok_or(BootError::WORKBUF_SMALL)?;
        let sd = SharedData::read_from_prefix(src).ok_or(BootError::WORKBUF_SMALL)?;
        sd.validate(src.len())?;
        let used = sd.workbuf_used as usize;
        buf.copy_within(src_offset..src_offset + used, 0);
        Self::fixup_size_and_reinit(buf)
    }

    fn fixup_size_and_reinit(buf: &'a mut [u8]) -> BootResult<Self> {
        let mut sd = SharedData::read_from_prefix(&buf[..]).ok_or(BootError::WORKBUF_SMALL)?;
        sd.workbuf_size = buf.len() as u32;
        buf[..SHARED_DATA_BYTE_SIZE].copy_from_slice(sd.as_bytes());
        Self::reinit(buf)
    }

    /// Shared data header.
    pub fn sd(&self) -> &SharedData {
        match LayoutVerified::<_, SharedData>::new_from_prefix(&*self.buf) {
            Some((sd, _)) => sd.into_ref(),
            // Construction validated alignment and minimum size.
            None => panic!("workbuf header unreadable"),
        }
    }

    /// Shared data header, mutable.
    pub fn sd_mut(&mut self) -> &mut SharedData {
        match LayoutVerified::<_, SharedData>::new_from_prefix(&mut *self.buf) {
            Some((sd, _)) => sd.into_mut(),
            None => panic!("workbuf header unreadable"),
        }
    }

    /// Allocate `size` bytes from the arena.  There is no free operation.
    pub fn alloc(&mut self, size: u32) -> BootResult<Region> {
        let sd = self.sd();
        let base = (sd.workbuf_used + WORKBUF_ALLOC_ALIGN - 1) & !(WORKBUF_ALLOC_ALIGN - 1);
        let end = base
            .checked_add(size)
            .ok_or(BootError::WORKBUF_EXHAUSTED)?;
        if end > sd.workbuf_size {
            return Err(BootError::WORKBUF_EXHAUSTED);
        }
        self.sd_mut().workbuf_used = end;
        Ok(Region { offset: base, size })
    }

    /// Resolve a region handle into the live prefix of the arena.
    pub fn region(&self, region: Region) -> BootResult<&[u8]> {
        let end = region
            .offset
            .checked_add(region.size)
            .ok_or(BootError::WORKBUF_REGION_RANGE)?;
        if end > self.sd().workbuf_used {
            return Err(BootError::WORKBUF_REGION_RANGE);
        }
        Ok(&self.buf[region.offset as usize..end as usize])
    }

    /// Resolve a region handle into the live prefix of the arena, mutable.
    pub fn region_mut(&mut self, region: Region) -> BootResult<&mut [u8]> {
        let end = region
            .offset
            .checked_add(region.size)
            .ok_or(BootError::WORKBUF_REGION_RANGE)?;
        if end > self.sd().workbuf_used {
            return Err(BootError::WORKBUF_REGION_RANGE);
        }
        Ok(&mut self.buf[region.offset as usize..end as usize])
    }
}
