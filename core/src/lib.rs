/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Verified boot core state: the workbuf arena, the per-boot context, the
    volatile flags store and the secure counter records.

--*/
#![cfg_attr(not(feature = "std"), no_std)]

pub mod checksum;
pub mod context;
pub mod gbb;
pub mod nvdata;
pub mod printer;
pub mod recovery;
pub mod secdata;
pub mod workbuf;

pub use context::{BootMode, Context, ContextFlags};
pub use gbb::{GbbView, GBB_MAX_COPY_SIZE};
pub use nvdata::{FwResult, NvField, NVDATA_SIZE};
pub use workbuf::{
    Region, SdStatus, SharedData, FIRMWARE_WORKBUF_RECOMMENDED_SIZE,
    KERNEL_WORKBUF_RECOMMENDED_SIZE, SHARED_DATA_BYTE_SIZE, WORKBUF_ALIGN,
};
