/*++

Licensed under the Apache-2.0 license.

File Name:

    recovery.rs

Abstract:

    File contains the recovery reason codes recorded in the volatile flags
    store.  The reason travels through a single nvdata byte, so codes must
    stay within u8 range; values are part of the persistence contract with
    the caller and must not be renumbered.

--*/

/// No recovery requested.
pub const NOT_REQUESTED: u8 = 0x00;

/// Recovery requested by a legacy caller that could not supply a reason.
pub const LEGACY: u8 = 0x01;

/// Recovery forced by physical user request.
pub const RO_MANUAL: u8 = 0x02;

/// RW firmware failed signature verification.
pub const RO_INVALID_RW: u8 = 0x03;

/// Both firmware slots exhausted their boot attempts.
pub const RO_TRY_COUNT: u8 = 0x04;

/// Firmware secure counter initialization failed.
pub const SECDATA_FIRMWARE_INIT: u8 = 0x17;

/// GBB header unreadable or invalid.
pub const GBB_HEADER: u8 = 0x1A;

/// Developer switch evaluation failed.
pub const DEV_SWITCH: u8 = 0x1C;

/// Unspecified or unknown read-only firmware error.
pub const RO_UNSPECIFIED: u8 = 0x3F;

/// Kernel failed signature verification.
pub const RW_INVALID_OS: u8 = 0x43;

/// Kernel secure counter initialization failed.
pub const SECDATA_KERNEL_INIT: u8 = 0x44;

/// Firmware management parameters initialization failed.
pub const SECDATA_FWMP_INIT: u8 = 0x45;

/// No bootable kernel found on any partition.
pub const RW_NO_KERNEL: u8 = 0x5B;

/// Memory retraining requested; reboot rather than surface a reason.  The
/// request is consumed silently while a manual recovery override is also
/// forcing entry.
pub const TRAIN_AND_REBOOT: u8 = 0x63;

/// Unspecified or unknown rewritable firmware error.
pub const RW_UNSPECIFIED: u8 = 0x7F;
