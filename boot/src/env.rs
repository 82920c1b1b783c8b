/*++

Licensed under the Apache-2.0 license.

File Name:

    env.rs

Abstract:

    File contains the platform environment trait implemented by the calling
    firmware.  The verification core reaches every external capability
    through this trait; hardware-acceleration fallback decisions happen on
    the platform side, never here.

--*/

use vaultboot_core::Context;
use vaultboot_error::BootResult;
use vaultboot_image_verify::VerifyEnv;

/// Resource index for [`BootEnv::read_resource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// The read-only system binary block
    Gbb,
    /// Firmware vblock (keyblock + preamble) of the slot selected this
    /// boot; the platform resolves the slot from the context flags
    FwVblock,
}

/// Platform environment supplied by the calling firmware.
pub trait BootEnv: VerifyEnv {
    /// Read `buf.len()` bytes at `offset` within a resource.  Must return
    /// an error rather than partial data on out-of-range requests.
    fn read_resource(&mut self, index: Resource, offset: u32, buf: &mut [u8]) -> BootResult<()>;

    /// Commit pending nvdata/secdata to storage now.  Requested
    /// opportunistically before operations that won't return control to
    /// the normal caller flow.
    fn commit(&mut self, ctx: &mut Context) -> BootResult<()>;
}
