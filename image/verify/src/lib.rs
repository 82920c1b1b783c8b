/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    Vblock verification library: the keyblock -> preamble -> body signature
    chain, policy-gated by boot mode.  Crypto is supplied by the platform
    through the [`VerifyEnv`] trait and treated as a trusted oracle.

--*/
#![cfg_attr(not(feature = "std"), no_std)]

mod verifier;

use vaultboot_core::BootMode;
use vaultboot_error::BootResult;
use vaultboot_image_types::{HashAlg, PackedKeyView};

pub use verifier::VblockVerifier;

/// Hash algorithm used for the keyless keyblock digest on the developer
/// path, and for developer key pinning.
pub const KEYBLOCK_HASH_ALG: HashAlg = HashAlg::Sha512;
pub const KEY_PIN_HASH_ALG: HashAlg = HashAlg::Sha256;

/// Policy inputs for one verification chain, derived by the caller from
/// the boot mode and the management parameters.
#[derive(Debug, Clone, Copy)]
pub struct VerifyPolicy {
    /// Mode decided by the boot mode resolver
    pub boot_mode: BootMode,

    /// Secure counter version the candidate must not roll back past
    pub min_version: u32,

    /// Developer mode must still use officially signed keyblocks
    pub official_only: bool,

    /// Pinned digest of the data key, enforced on the developer path
    pub pinned_key_digest: Option<[u8; 32]>,

    /// Skip the rollback stage entirely.  Developer and recovery boots set
    /// this; both are physically gated, lower-trust paths
    pub disable_rollback_check: bool,
}

impl VerifyPolicy {
    /// Policy for a chain that must fully verify against `key_version`s
    /// stored minimum.
    pub fn normal(min_version: u32) -> Self {
        Self {
            boot_mode: BootMode::Normal,
            min_version,
            official_only: false,
            pinned_key_digest: None,
            disable_rollback_check: false,
        }
    }
}

/// Outcome of a verified firmware vblock chain.
pub struct FwVblockInfo<'a> {
    /// Combined rollback version: `(key_version << 16) | firmware_version`
    pub fw_version: u32,

    /// Data key that authenticated the preamble; checks the body digest
    pub data_key: PackedKeyView<'a>,

    /// Key handed on to kernel keyblock verification
    pub kernel_subkey: PackedKeyView<'a>,

    /// Signature bytes over the firmware body
    pub body_sig: &'a [u8],

    /// Declared firmware body size
    pub body_size: u32,

    /// Offset and size of the preamble within the vblock
    pub preamble_offset: u32,
    pub preamble_size: u32,
}

/// Outcome of a verified kernel vblock chain.
pub struct KernelVblockInfo<'a> {
    /// Combined rollback version: `(key_version << 16) | kernel_version`
    pub kernel_version: u32,

    /// Full signature verification was used (not the hash-only path)
    pub signed: bool,

    /// Size of the keyblock; the preamble starts here
    pub keyblock_size: u32,

    /// Total vblock size: keyblock plus preamble
    pub vblock_size: u32,

    /// Data key that authenticated the preamble; checks the body digest
    pub data_key: PackedKeyView<'a>,

    /// Signature bytes over the kernel body
    pub body_sig: &'a [u8],

    /// Declared kernel body size
    pub body_size: u32,

    /// Address the body expects to be loaded at
    pub body_load_address: u64,

    /// Embedded bootloader location within the loaded body
    pub bootloader_address: u64,
    pub bootloader_size: u64,
}

/// Verification environment.
///
/// Implemented by the platform over its digest and signature engines.  A
/// hardware engine that cannot serve a request must fall back to software
/// before reporting here; this library only sees success or failure.
pub trait VerifyEnv {
    /// Begin a digest over `data_size` total bytes.
    fn digest_init(&mut self, alg: HashAlg, data_size: u32) -> BootResult<()>;

    /// Feed the next chunk of data into the running digest.
    fn digest_extend(&mut self, data: &[u8]) -> BootResult<()>;

    /// Finish the digest.  `digest` is sized for the algorithm given to
    /// [`VerifyEnv::digest_init`].
    fn digest_finalize(&mut self, digest: &mut [u8]) -> BootResult<()>;

    /// Verify `sig` over `digest` with `key`.  Returns an error both for
    /// oracle failures and for an invalid signature.
    fn verify_digest(
        &mut self,
        key: &PackedKeyView,
        sig: &[u8],
        digest: &[u8],
    ) -> BootResult<()>;
}

impl<T: VerifyEnv> VerifyEnv for &mut T {
    fn digest_init(&mut self, alg: HashAlg, data_size: u32) -> BootResult<()> {
        (**self).digest_init(alg, data_size)
    }

    fn digest_extend(&mut self, data: &[u8]) -> BootResult<()> {
        (**self).digest_extend(data)
    }

    fn digest_finalize(&mut self, digest: &mut [u8]) -> BootResult<()> {
        (**self).digest_finalize(digest)
    }

    fn verify_digest(
        &mut self,
        key: &PackedKeyView,
        sig: &[u8],
        digest: &[u8],
    ) -> BootResult<()> {
        (**self).verify_digest(key, sig, digest)
    }
}
