/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains data structures for the signed boot images: keyblocks,
    preambles, packed public keys and the read-only system binary block (GBB).

--*/

#![cfg_attr(not(feature = "std"), no_std)]

use core::ops::Range;

use getset::{CopyGetters, Getters, Setters};
use memoffset::offset_of;
use vaultboot_error::{BootError, BootResult};
use zerocopy::{AsBytes, FromBytes};

pub const KEYBLOCK_MAGIC: [u8; 8] = *b"VAULTKEY";
pub const KEYBLOCK_HEADER_VERSION_MAJOR: u32 = 2;
pub const KEYBLOCK_HEADER_VERSION_MINOR: u32 = 1;
pub const PREAMBLE_HEADER_VERSION_MAJOR: u32 = 2;
pub const PREAMBLE_HEADER_VERSION_MINOR: u32 = 1;

pub const GBB_SIGNATURE: [u8; 4] = *b"$GBB";
pub const GBB_MAJOR_VERSION: u16 = 1;
pub const GBB_MINOR_VERSION: u16 = 2;
pub const GBB_HEADER_BYTE_SIZE: usize = core::mem::size_of::<GbbHeader>();
pub const GBB_HWID_MAX_SIZE: usize = 256;

pub const SHA256_DIGEST_BYTE_SIZE: usize = 32;
pub const SHA512_DIGEST_BYTE_SIZE: usize = 64;
pub const DIGEST_MAX_BYTE_SIZE: usize = 64;

pub const KEYBLOCK_BYTE_SIZE: usize = core::mem::size_of::<Keyblock>();
pub const FW_PREAMBLE_BYTE_SIZE: usize = core::mem::size_of::<FwPreamble>();
pub const KERNEL_PREAMBLE_BYTE_SIZE: usize = core::mem::size_of::<KernelPreamble>();
pub const PACKED_KEY_BYTE_SIZE: usize = core::mem::size_of::<PackedKey>();

/// Hash algorithm for digests over signed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Sha256,
    Sha512,
}

impl HashAlg {
    pub fn digest_size(&self) -> usize {
        match self {
            HashAlg::Sha256 => SHA256_DIGEST_BYTE_SIZE,
            HashAlg::Sha512 => SHA512_DIGEST_BYTE_SIZE,
        }
    }
}

/// Signature algorithm of a packed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigAlg {
    Rsa2048,
    Rsa4096,
    Rsa8192,
}

impl SigAlg {
    pub fn signature_size(&self) -> usize {
        match self {
            SigAlg::Rsa2048 => 256,
            SigAlg::Rsa4096 => 512,
            SigAlg::Rsa8192 => 1024,
        }
    }
}

/// Decode the combined algorithm identifier carried by a packed key.
pub fn decode_algorithm(id: u32) -> BootResult<(SigAlg, HashAlg)> {
    match id {
        0 => Ok((SigAlg::Rsa2048, HashAlg::Sha256)),
        1 => Ok((SigAlg::Rsa4096, HashAlg::Sha256)),
        2 => Ok((SigAlg::Rsa8192, HashAlg::Sha256)),
        3 => Ok((SigAlg::Rsa2048, HashAlg::Sha512)),
        4 => Ok((SigAlg::Rsa4096, HashAlg::Sha512)),
        5 => Ok((SigAlg::Rsa8192, HashAlg::Sha512)),
        _ => Err(BootError::CRYPTO_ALGORITHM),
    }
}

/// Signature descriptor.
///
/// Offsets are relative to the start of the structure containing the
/// signature, never to the signature descriptor itself.
#[repr(C)]
#[derive(
    AsBytes, FromBytes, Default, Debug, Setters, CopyGetters, Copy, Clone, Eq, PartialEq,
)]
pub struct Signature {
    /// Offset of the signature bytes
    #[getset(get_copy = "pub", set = "pub")]
    sig_offset: u32,

    /// Size of the signature bytes
    #[getset(get_copy = "pub", set = "pub")]
    sig_size: u32,

    /// Number of bytes of signed data, counted from the start of the
    /// containing structure
    #[getset(get_copy = "pub", set = "pub")]
    data_size: u32,
}

impl Signature {
    /// Range of the signature bytes, if it lies inside a container of
    /// `container_size` bytes.
    pub fn sig_range(&self, container_size: u32) -> Option<Range<usize>> {
        let end = self.sig_offset.checked_add(self.sig_size)?;
        if end > container_size {
            return None;
        }
        Some(self.sig_offset as usize..end as usize)
    }

    /// Range of the signed data, if it lies inside a container of
    /// `container_size` bytes.
    pub fn data_range(&self, container_size: u32) -> Option<Range<usize>> {
        if self.data_size > container_size {
            return None;
        }
        Some(0..self.data_size as usize)
    }
}

/// Packed public key header.
///
/// The key bytes are opaque to this library; they are handed to the
/// platform's signature verification oracle unmodified.  `key_offset` is
/// relative to the position of this header within its container, so a
/// packed key is also a self-contained blob when the header is immediately
/// followed by its key data.
#[repr(C)]
#[derive(
    AsBytes, FromBytes, Default, Debug, Setters, CopyGetters, Copy, Clone, Eq, PartialEq,
)]
pub struct PackedKey {
    /// Offset of the key data
    #[getset(get_copy = "pub", set = "pub")]
    key_offset: u32,

    /// Size of the key data
    #[getset(get_copy = "pub", set = "pub")]
    key_size: u32,

    /// Combined signature/hash algorithm identifier
    #[getset(get_copy = "pub", set = "pub")]
    algorithm: u32,

    /// Rollback version component carried by this key
    #[getset(get_copy = "pub", set = "pub")]
    key_version: u32,
}

impl PackedKey {
    /// Decoded signature and hash algorithm.
    pub fn alg(&self) -> BootResult<(SigAlg, HashAlg)> {
        decode_algorithm(self.algorithm)
    }

    /// Range of the key data, if it lies inside a container of
    /// `container_size` bytes.
    pub fn key_range(&self, container_size: u32) -> Option<Range<usize>> {
        let end = self.key_offset.checked_add(self.key_size)?;
        if end > container_size {
            return None;
        }
        Some(self.key_offset as usize..end as usize)
    }
}

/// A packed key header together with its key bytes, resolved and
/// bounds-checked against the containing structure.
#[derive(Debug, Clone, Copy)]
pub struct PackedKeyView<'a> {
    pub header: PackedKey,
    pub key_data: &'a [u8],
}

impl<'a> PackedKeyView<'a> {
    /// Resolve a packed key header against its container.  `container` must
    /// start at the position of the packed key header itself.
    pub fn new(container: &'a [u8], header: PackedKey) -> BootResult<Self> {
        let range = header
            .key_range(container.len() as u32)
            .ok_or(BootError::CRYPTO_KEY_RANGE)?;
        Ok(Self {
            header,
            key_data: &container[range],
        })
    }

    /// Parse a standalone packed key blob (a header immediately followed,
    /// at `key_offset`, by its key data).
    pub fn from_blob(blob: &'a [u8]) -> BootResult<Self> {
        let header = PackedKey::read_from_prefix(blob).ok_or(BootError::CRYPTO_KEY_RANGE)?;
        Self::new(blob, header)
    }
}

bitflags::bitflags! {
    /// Keyblock applicability flags.
    ///
    /// Each mode carries a pair of bits; a keyblock is usable in a given
    /// state when the bit matching that state is set.
    pub struct KeyblockFlags : u32 {
        const DEVELOPER_0 = 0b000001;
        const DEVELOPER_1 = 0b000010;
        const RECOVERY_0  = 0b000100;
        const RECOVERY_1  = 0b001000;
        const MINIOS_0    = 0b010000;
        const MINIOS_1    = 0b100000;
    }
}

/// Signed container for a data key.
///
/// The keyblock signature (or, on the developer path, the keyblock hash)
/// covers the first `data_size` bytes of the keyblock, which must include
/// this header and the data key bytes.
#[repr(C)]
#[derive(AsBytes, FromBytes, Default, Debug, Getters, Setters, CopyGetters)]
pub struct Keyblock {
    /// Magic
    #[getset(get = "pub", set = "pub")]
    magic: [u8; 8],

    /// Header version (major must match exactly)
    #[getset(get_copy = "pub", set = "pub")]
    header_version_major: u32,

    /// Header version (minor is forward compatible)
    #[getset(get_copy = "pub", set = "pub")]
    header_version_minor: u32,

    /// Size of the keyblock including key data, signatures and padding
    #[getset(get_copy = "pub", set = "pub")]
    keyblock_size: u32,

    /// Signature over the signed portion of the keyblock
    #[getset(get = "pub", set = "pub")]
    keyblock_signature: Signature,

    /// Digest of the signed portion, for the hash-only developer path
    #[getset(get = "pub", set = "pub")]
    keyblock_hash: Signature,

    /// Applicability flags, see [`KeyblockFlags`]
    #[getset(get_copy = "pub", set = "pub")]
    keyblock_flags: u32,

    /// Data key authenticated by this keyblock
    #[getset(get = "pub", set = "pub")]
    data_key: PackedKey,
}

impl Keyblock {
    pub fn flags(&self) -> KeyblockFlags {
        KeyblockFlags::from_bits_truncate(self.keyblock_flags)
    }

    /// Byte offset of the data key header within the keyblock; the key's
    /// `key_offset` is relative to this position.
    pub fn data_key_field_offset() -> usize {
        offset_of!(Keyblock, data_key)
    }
}

/// Signed firmware preamble.
///
/// The preamble signature covers the first `data_size` bytes of the
/// preamble, which must include this header, the kernel subkey data and the
/// body signature bytes.
#[repr(C)]
#[derive(AsBytes, FromBytes, Default, Debug, Getters, Setters, CopyGetters)]
pub struct FwPreamble {
    /// Size of the preamble including key data, signatures and padding
    #[getset(get_copy = "pub", set = "pub")]
    preamble_size: u32,

    /// Header version (major must match exactly)
    #[getset(get_copy = "pub", set = "pub")]
    header_version_major: u32,

    /// Header version (minor is forward compatible)
    #[getset(get_copy = "pub", set = "pub")]
    header_version_minor: u32,

    /// Firmware rollback version component
    #[getset(get_copy = "pub", set = "pub")]
    firmware_version: u32,

    /// Signature over the signed portion of the preamble
    #[getset(get = "pub", set = "pub")]
    preamble_signature: Signature,

    /// Key used to verify the kernel keyblock
    #[getset(get = "pub", set = "pub")]
    kernel_subkey: PackedKey,

    /// Signature over the firmware body
    #[getset(get = "pub", set = "pub")]
    body_signature: Signature,

    /// Preamble flags
    #[getset(get_copy = "pub", set = "pub")]
    flags: u32,
}

impl FwPreamble {
    /// Byte offset of the kernel subkey header within the preamble; the
    /// key's `key_offset` is relative to this position.
    pub fn kernel_subkey_field_offset() -> usize {
        offset_of!(FwPreamble, kernel_subkey)
    }
}

/// Signed kernel preamble.
#[repr(C)]
#[derive(AsBytes, FromBytes, Default, Debug, Getters, Setters, CopyGetters)]
pub struct KernelPreamble {
    /// Size of the preamble including signatures and padding
    #[getset(get_copy = "pub", set = "pub")]
    preamble_size: u32,

    /// Header version (major must match exactly)
    #[getset(get_copy = "pub", set = "pub")]
    header_version_major: u32,

    /// Header version (minor is forward compatible)
    #[getset(get_copy = "pub", set = "pub")]
    header_version_minor: u32,

    /// Kernel rollback version component
    #[getset(get_copy = "pub", set = "pub")]
    kernel_version: u32,

    /// Address the body expects to be loaded at
    #[getset(get_copy = "pub", set = "pub")]
    body_load_address: u64,

    /// Address of the embedded bootloader within the loaded body
    #[getset(get_copy = "pub", set = "pub")]
    bootloader_address: u64,

    /// Size of the embedded bootloader
    #[getset(get_copy = "pub", set = "pub")]
    bootloader_size: u64,

    /// Signature over the signed portion of the preamble
    #[getset(get = "pub", set = "pub")]
    preamble_signature: Signature,

    /// Signature over the kernel body
    #[getset(get = "pub", set = "pub")]
    body_signature: Signature,

    /// Preamble flags
    #[getset(get_copy = "pub", set = "pub")]
    flags: u32,

    _rsvd: u32,
}

bitflags::bitflags! {
    /// Flags carried by the read-only system binary block.
    pub struct GbbFlags : u32 {
        /// Shorten the developer screen delay
        const DEV_SCREEN_SHORT_DELAY     = 1 << 0;
        /// Force the developer switch on regardless of secure storage
        const FORCE_DEV_SWITCH_ON        = 1 << 1;
        /// Allow developer boot from external media regardless of nvdata
        const FORCE_DEV_BOOT_EXTERNAL    = 1 << 2;
        /// Skip the firmware rollback version check
        const DISABLE_FW_ROLLBACK_CHECK  = 1 << 3;
        /// Treat any recovery request as manually requested
        const FORCE_MANUAL_RECOVERY      = 1 << 4;
        /// Ignore the firmware management parameters
        const DISABLE_FWMP               = 1 << 5;
    }
}

/// Read-only system binary block header.
///
/// Holds the hardware ID and the root and recovery public keys.  Copied
/// once into the workbuf during the first firmware phase; all later
/// accesses resolve through the stored copy.
#[repr(C)]
#[derive(AsBytes, FromBytes, Debug, Getters, Setters, CopyGetters)]
pub struct GbbHeader {
    /// Signature
    #[getset(get = "pub", set = "pub")]
    signature: [u8; 4],

    /// Major version (must match exactly)
    #[getset(get_copy = "pub", set = "pub")]
    major_version: u16,

    /// Minor version (forward compatible)
    #[getset(get_copy = "pub", set = "pub")]
    minor_version: u16,

    /// Size of this header
    #[getset(get_copy = "pub", set = "pub")]
    header_size: u32,

    /// Flags, see [`GbbFlags`]
    #[getset(get_copy = "pub", set = "pub")]
    flags: u32,

    /// Hardware ID offset within the GBB region
    #[getset(get_copy = "pub", set = "pub")]
    hwid_offset: u32,

    /// Hardware ID size, including NUL terminator
    #[getset(get_copy = "pub", set = "pub")]
    hwid_size: u32,

    /// Root key offset within the GBB region
    #[getset(get_copy = "pub", set = "pub")]
    rootkey_offset: u32,

    /// Root key size
    #[getset(get_copy = "pub", set = "pub")]
    rootkey_size: u32,

    /// Recovery key offset within the GBB region
    #[getset(get_copy = "pub", set = "pub")]
    recovery_key_offset: u32,

    /// Recovery key size
    #[getset(get_copy = "pub", set = "pub")]
    recovery_key_size: u32,

    _reserved: [u8; 88],
}

impl Default for GbbHeader {
    fn default() -> Self {
        Self {
            signature: GBB_SIGNATURE,
            major_version: GBB_MAJOR_VERSION,
            minor_version: GBB_MINOR_VERSION,
            header_size: GBB_HEADER_BYTE_SIZE as u32,
            flags: 0,
            hwid_offset: 0,
            hwid_size: 0,
            rootkey_offset: 0,
            rootkey_size: 0,
            recovery_key_offset: 0,
            recovery_key_size: 0,
            _reserved: [0u8; 88],
        }
    }
}

impl GbbHeader {
    pub fn gbb_flags(&self) -> GbbFlags {
        GbbFlags::from_bits_truncate(self.flags)
    }

    fn sub_region(&self, offset: u32, size: u32, region_size: u32) -> BootResult<Range<usize>> {
        let end = offset
            .checked_add(size)
            .ok_or(BootError::GBB_REGION_RANGE)?;
        if (offset as usize) < GBB_HEADER_BYTE_SIZE || end > region_size {
            return Err(BootError::GBB_REGION_RANGE);
        }
        Ok(offset as usize..end as usize)
    }

    /// Range of the hardware ID within a GBB region of `region_size` bytes.
    pub fn hwid_range(&self, region_size: u32) -> BootResult<Range<usize>> {
        self.sub_region(self.hwid_offset, self.hwid_size, region_size)
    }

    /// Range of the root key within a GBB region of `region_size` bytes.
    pub fn rootkey_range(&self, region_size: u32) -> BootResult<Range<usize>> {
        self.sub_region(self.rootkey_offset, self.rootkey_size, region_size)
    }

    /// Range of the recovery key within a GBB region of `region_size` bytes.
    pub fn recovery_key_range(&self, region_size: u32) -> BootResult<Range<usize>> {
        self.sub_region(self.recovery_key_offset, self.recovery_key_size, region_size)
    }
}
