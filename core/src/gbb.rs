/*++

Licensed under the Apache-2.0 license.

File Name:

    gbb.rs

Abstract:

    File contains the read-only view over the system binary block copy
    stored in the workbuf.  The block is copied into the arena once during
    the first firmware phase; everything afterwards resolves through this
    view's bounds-checked ranges.

--*/

use crate::context::Context;
use crate::workbuf::{Region, SdStatus};
use vaultboot_error::{BootError, BootResult};
use vaultboot_image_types::{
    GbbFlags, GbbHeader, PackedKeyView, GBB_HEADER_BYTE_SIZE, GBB_MAJOR_VERSION,
    GBB_MINOR_VERSION, GBB_SIGNATURE,
};
use zerocopy::FromBytes;

/// Largest GBB region the core will copy into the arena.
pub const GBB_MAX_COPY_SIZE: usize = 16 * 1024;

/// Parsed, bounds-checked view of a GBB region.
pub struct GbbView<'a> {
    pub header: GbbHeader,
    bytes: &'a [u8],
}

impl<'a> GbbView<'a> {
    /// Parse and validate a GBB region.
    pub fn parse(bytes: &'a [u8]) -> BootResult<Self> {
        let header = GbbHeader::read_from_prefix(bytes).ok_or(BootError::GBB_TOO_SMALL)?;
        if *header.signature() != GBB_SIGNATURE {
            return Err(BootError::GBB_MAGIC);
        }
        if header.major_version() != GBB_MAJOR_VERSION
            || header.minor_version() < GBB_MINOR_VERSION
        {
            return Err(BootError::GBB_VERSION);
        }
        if (header.header_size() as usize) < GBB_HEADER_BYTE_SIZE
            || header.header_size() as usize > bytes.len()
        {
            return Err(BootError::GBB_TOO_SMALL);
        }
        Ok(Self { header, bytes })
    }

    pub fn flags(&self) -> GbbFlags {
        self.header.gbb_flags()
    }

    /// Root key used to verify firmware keyblocks.
    pub fn rootkey(&self) -> BootResult<PackedKeyView<'a>> {
        let range = self.header.rootkey_range(self.bytes.len() as u32)?;
        PackedKeyView::from_blob(&self.bytes[range])
    }

    /// Recovery key used to verify kernel keyblocks in recovery mode.
    pub fn recovery_key(&self) -> BootResult<PackedKeyView<'a>> {
        let range = self.header.recovery_key_range(self.bytes.len() as u32)?;
        PackedKeyView::from_blob(&self.bytes[range])
    }

    /// Raw hardware ID bytes, including the NUL terminator.
    pub fn hwid(&self) -> BootResult<&'a [u8]> {
        let range = self.header.hwid_range(self.bytes.len() as u32)?;
        Ok(&self.bytes[range])
    }
}

/// View over the GBB copy stored in the arena.  Panics if called before
/// the first firmware phase stored the copy; that is a phase-ordering bug
/// in the caller.
pub fn view<'c>(ctx: &'c Context<'_>) -> BootResult<GbbView<'c>> {
    assert!(
        ctx.sd().has_status(SdStatus::GBB_INIT),
        "GBB accessed before the first firmware phase"
    );
    let region = Region {
        offset: ctx.sd().gbb_offset,
        size: ctx.sd().gbb_size,
    };
    GbbView::parse(ctx.region(region)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultboot_image_types::PackedKey;
    use zerocopy::AsBytes;

    fn test_gbb_bytes() -> [u8; 512] {
        let mut bytes = [0u8; 512];
        let mut header = GbbHeader::default();
        header
            .set_hwid_offset(128)
            .set_hwid_size(8)
            .set_rootkey_offset(136)
            .set_rootkey_size(48)
            .set_recovery_key_offset(184)
            .set_recovery_key_size(48);
        bytes[..GBB_HEADER_BYTE_SIZE].copy_from_slice(header.as_bytes());
        bytes[128..136].copy_from_slice(b"TESTHW\0\0");

        let mut key = PackedKey::default();
        key.set_key_offset(16).set_key_size(32).set_algorithm(0);
        bytes[136..152].copy_from_slice(key.as_bytes());
        bytes[184..200].copy_from_slice(key.as_bytes());
        bytes
    }

    #[test]
    fn test_parse_and_keys() {
        let bytes = test_gbb_bytes();
        let gbb = GbbView::parse(&bytes).unwrap();
        assert_eq!(gbb.hwid().unwrap(), b"TESTHW\0\0");
        assert_eq!(gbb.rootkey().unwrap().key_data.len(), 32);
        assert_eq!(gbb.recovery_key().unwrap().key_data.len(), 32);
    }

    #[test]
    fn test_parse_rejects_bad_signature() {
        let mut bytes = test_gbb_bytes();
        bytes[0] = b'!';
        assert_eq!(GbbView::parse(&bytes).err(), Some(BootError::GBB_MAGIC));
    }

    #[test]
    fn test_parse_rejects_old_version() {
        let mut bytes = test_gbb_bytes();
        bytes[4..6].copy_from_slice(&2u16.to_le_bytes());
        assert_eq!(GbbView::parse(&bytes).err(), Some(BootError::GBB_VERSION));
    }

    #[test]
    fn test_key_outside_region_rejected() {
        let bytes = test_gbb_bytes();
        let gbb = GbbView::parse(&bytes[..190]).unwrap();
        assert_eq!(
            gbb.recovery_key().err(),
            Some(BootError::GBB_REGION_RANGE)
        );
    }
}
