/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains the error type and error constants used by the verified
    boot library.

--*/
#![cfg_attr(not(feature = "std"), no_std)]

use core::convert::From;
use core::num::NonZeroU32;

/// Verified boot error type.
///
/// Error codes are grouped by subsystem: the high 16 bits identify the
/// subsystem, the low 16 bits the specific failure.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootError(pub NonZeroU32);

/// Result type used by all fallible verified boot operations.
pub type BootResult<T> = Result<T, BootError>;

/// Macro to define error constants ensuring uniqueness
///
/// This macro takes a list of (name, value, doc) tuples and generates
/// constant definitions for each error code.
#[macro_export]
macro_rules! define_error_constants {
    ($(($name:ident, $value:expr, $doc:expr)),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const $name: BootError = BootError::new_const($value);
        )*

        #[cfg(test)]
        /// Returns a vector of all defined error constants for testing uniqueness
        pub fn all_constants() -> Vec<(&'static str, u32)> {
            vec![
                $(
                    (stringify!($name), $value),
                )*
            ]
        }
    };
}

impl BootError {
    /// Create a boot error; intended to only be used from const contexts, as we
    /// don't want runtime panics if val is zero. The preferred way to get a
    /// BootError from a u32 is `BootError::try_from()` from the `TryFrom` impl.
    pub const fn new_const(val: u32) -> Self {
        match NonZeroU32::new(val) {
            Some(val) => Self(val),
            None => panic!("BootError cannot be 0"),
        }
    }

    /// Raw error code.
    pub const fn code(&self) -> u32 {
        self.0.get()
    }

    /// Low byte of the error code, used as a recovery subcode when a failure
    /// is escalated into a recovery request.
    pub const fn subcode(&self) -> u8 {
        self.0.get() as u8
    }

    // Use the macro to define all error constants
    define_error_constants![
        // Workbuf / shared data
        (
            WORKBUF_ALIGN,
            0x00010001,
            "Workbuf base address misaligned"
        ),
        (
            WORKBUF_SMALL,
            0x00010002,
            "Workbuf too small for requested use"
        ),
        (
            WORKBUF_EXHAUSTED,
            0x00010003,
            "Workbuf allocation exceeds remaining space"
        ),
        (
            WORKBUF_REGION_RANGE,
            0x00010004,
            "Workbuf region handle outside the live prefix"
        ),
        (SHARED_DATA_MAGIC, 0x00010005, "Shared data magic mismatch"),
        (
            SHARED_DATA_VERSION,
            0x00010006,
            "Shared data struct version mismatch"
        ),
        (
            SHARED_DATA_INVALID,
            0x00010007,
            "Shared data used size exceeds workbuf size"
        ),
        // Secdata firmware
        (
            SECDATA_FIRMWARE_CRC,
            0x00030001,
            "Firmware secure counter checksum mismatch"
        ),
        (
            SECDATA_FIRMWARE_VERSION,
            0x00030002,
            "Firmware secure counter struct version unsupported"
        ),
        (
            SECDATA_FIRMWARE_ROLLBACK,
            0x00030003,
            "Attempt to lower the firmware secure version within a boot"
        ),
        // Secdata kernel
        (
            SECDATA_KERNEL_CRC,
            0x00040001,
            "Kernel secure counter checksum mismatch"
        ),
        (
            SECDATA_KERNEL_VERSION,
            0x00040002,
            "Kernel secure counter struct version unsupported"
        ),
        (
            SECDATA_KERNEL_SIZE,
            0x00040003,
            "Kernel secure counter struct size invalid"
        ),
        (
            SECDATA_KERNEL_ROLLBACK,
            0x00040004,
            "Attempt to lower the kernel secure version within a boot"
        ),
        // Secdata FWMP
        (
            SECDATA_FWMP_CRC,
            0x00050001,
            "Firmware management parameters checksum mismatch"
        ),
        (
            SECDATA_FWMP_VERSION,
            0x00050002,
            "Firmware management parameters struct version unsupported"
        ),
        (
            SECDATA_FWMP_SIZE,
            0x00050003,
            "Firmware management parameters struct size out of bounds"
        ),
        (
            SECDATA_FWMP_INCOMPLETE,
            0x00050004,
            "Firmware management parameters record larger than bytes read; re-read with the reported size"
        ),
        // GBB
        (GBB_MAGIC, 0x00060001, "GBB header signature mismatch"),
        (GBB_VERSION, 0x00060002, "GBB header version unsupported"),
        (
            GBB_TOO_SMALL,
            0x00060003,
            "GBB header size field below the minimum header size"
        ),
        (
            GBB_REGION_RANGE,
            0x00060004,
            "GBB sub-region outside the declared GBB bounds"
        ),
        (
            GBB_HWID_SIZE,
            0x00060005,
            "Hardware ID does not fit in the supplied buffer"
        ),
        (
            GBB_UNAVAILABLE,
            0x00060006,
            "GBB copy unavailable this boot"
        ),
        // Keyblock
        (
            KEYBLOCK_TOO_SMALL,
            0x00070001,
            "Buffer too small for a keyblock header"
        ),
        (KEYBLOCK_MAGIC, 0x00070002, "Keyblock magic mismatch"),
        (
            KEYBLOCK_HEADER_VERSION,
            0x00070003,
            "Keyblock header version unsupported"
        ),
        (
            KEYBLOCK_SIZE,
            0x00070004,
            "Keyblock size field exceeds the containing buffer"
        ),
        (
            KEYBLOCK_SIGNATURE_RANGE,
            0x00070005,
            "Keyblock signature data outside keyblock bounds"
        ),
        (
            KEYBLOCK_SIGNED_RANGE,
            0x00070006,
            "Keyblock signed region does not cover the data key"
        ),
        (
            KEYBLOCK_SIGNATURE,
            0x00070007,
            "Keyblock signature verification failed"
        ),
        (
            KEYBLOCK_HASH,
            0x00070008,
            "Keyblock hash verification failed"
        ),
        (
            KEYBLOCK_MODE_FLAGS,
            0x00070009,
            "Keyblock mode flags do not match the current boot mode"
        ),
        (
            KEYBLOCK_KEY_VERSION_RANGE,
            0x0007000A,
            "Data key version exceeds the 16-bit rollback field"
        ),
        (
            KEYBLOCK_ROLLBACK,
            0x0007000B,
            "Data key version below the stored secure version"
        ),
        (
            KEYBLOCK_DEV_KEY_HASH,
            0x0007000C,
            "Data key digest does not match the pinned developer key hash"
        ),
        // Preamble
        (
            PREAMBLE_TOO_SMALL,
            0x00080001,
            "Buffer too small for a preamble header"
        ),
        (
            PREAMBLE_HEADER_VERSION,
            0x00080002,
            "Preamble header version unsupported"
        ),
        (
            PREAMBLE_SIZE,
            0x00080003,
            "Preamble size field exceeds the containing buffer"
        ),
        (
            PREAMBLE_SIGNATURE_RANGE,
            0x00080004,
            "Preamble signature data outside preamble bounds"
        ),
        (
            PREAMBLE_SIGNATURE,
            0x00080005,
            "Preamble signature verification failed"
        ),
        (
            PREAMBLE_VERSION_RANGE,
            0x00080006,
            "Preamble version exceeds the 16-bit rollback field"
        ),
        (
            PREAMBLE_ROLLBACK,
            0x00080007,
            "Combined version below the stored secure version"
        ),
        // Body verification
        (
            BODY_SIZE,
            0x00090001,
            "Body data exceeds the size declared by the preamble"
        ),
        (
            BODY_INCOMPLETE,
            0x00090002,
            "Body digest checked before all declared data was supplied"
        ),
        (BODY_DIGEST, 0x00090003, "Body digest computation failed"),
        (
            BODY_SIGNATURE,
            0x00090004,
            "Body signature verification failed"
        ),
        // Partition scan
        (
            SCAN_NO_KERNEL_FOUND,
            0x000A0001,
            "No readable kernel candidate found on any partition"
        ),
        (
            SCAN_INVALID_KERNEL_FOUND,
            0x000A0002,
            "Kernel candidates found but none passed verification"
        ),
        (
            SCAN_BODY_EXCEEDS_BUFFER,
            0x000A0003,
            "Declared kernel body larger than the caller's load buffer"
        ),
        (
            SCAN_READ_FAILED,
            0x000A0004,
            "Disk read failed for a kernel candidate"
        ),
        (
            SCAN_CANDIDATE_TOO_SMALL,
            0x000A0005,
            "Kernel candidate partition smaller than its declared contents"
        ),
        // Environment callbacks
        (
            ENV_READ_RESOURCE_INDEX,
            0x000B0001,
            "Resource index not available on this platform"
        ),
        (
            ENV_READ_RESOURCE_RANGE,
            0x000B0002,
            "Resource read outside the resource bounds"
        ),
        (ENV_DIGEST, 0x000B0003, "Digest callback failed"),
        (
            ENV_VERIFY,
            0x000B0004,
            "Signature verification callback failed"
        ),
        (ENV_COMMIT, 0x000B0005, "Persistence commit callback failed"),
        // Crypto parameters
        (
            CRYPTO_ALGORITHM,
            0x000C0001,
            "Unknown packed key algorithm identifier"
        ),
        (
            CRYPTO_KEY_RANGE,
            0x000C0002,
            "Packed key data outside the containing structure"
        ),
        (
            CRYPTO_DIGEST_SIZE,
            0x000C0003,
            "Digest buffer size does not match the hash algorithm"
        ),
        // API
        (
            API_NOT_ALLOWED,
            0x000D0001,
            "Operation not permitted in the current boot mode"
        ),
    ];
}

impl From<BootError> for u32 {
    fn from(val: BootError) -> Self {
        val.0.get()
    }
}

impl From<BootError> for NonZeroU32 {
    fn from(val: BootError) -> Self {
        val.0
    }
}

impl TryFrom<u32> for BootError {
    type Error = ();

    fn try_from(val: u32) -> Result<Self, Self::Error> {
        match NonZeroU32::new(val) {
            Some(val) => Ok(BootError(val)),
            None => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_error_codes_unique() {
        let constants = BootError::all_constants();
        let mut seen = HashSet::new();
        for (name, value) in constants {
            assert!(seen.insert(value), "duplicate error code for {name}");
        }
    }

    #[test]
    fn test_zero_is_not_an_error() {
        assert!(BootError::try_from(0).is_err());
        assert_eq!(
            BootError::try_from(0x00010001),
            Ok(BootError::WORKBUF_ALIGN)
        );
    }

    #[test]
    fn test_subcode_truncates() {
        assert_eq!(BootError::KEYBLOCK_ROLLBACK.subcode(), 0x0B);
    }
}
