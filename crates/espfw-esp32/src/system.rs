//! Chip queries and the flash filesystem.

use anyhow::{bail, Result};
use espfw_core::system::{format_mac, ResetReason, WakeupCause};
use esp_idf_svc::sys;
use log::info;
use std::ffi::CString;

/// Mount point of the flash filesystem.
pub const FS_ROOT: &str = "/flash";

/// Data partition holding the filesystem.
pub const PARTITION_LABEL: &str = "storage";

const MAX_OPEN_FILES: usize = 5;
const ALLOCATION_UNIT: usize = 4096;

pub fn wakeup_cause() -> WakeupCause {
    // SAFETY: plain query of the sleep subsystem.
    WakeupCause::from_raw(unsafe { sys::esp_sleep_get_wakeup_cause() } as u32)
}

pub fn reset_reason() -> ResetReason {
    // SAFETY: plain query of the reset subsystem.
    ResetReason::from_raw(unsafe { sys::esp_reset_reason() } as u32)
}

pub fn station_mac() -> Result<[u8; 6]> {
    let mut mac = [0u8; 6];
    // SAFETY: `mac` has room for the six bytes written.
    let err = unsafe { sys::esp_read_mac(mac.as_mut_ptr(), sys::esp_mac_type_t_ESP_MAC_WIFI_STA) };
    if err != sys::ESP_OK {
        bail!("esp_read_mac failed with error 0x{:x}", err);
    }
    Ok(mac)
}

pub fn has_psram() -> bool {
    // SAFETY: plain heap query.
    unsafe { sys::heap_caps_get_total_size(sys::MALLOC_CAP_SPIRAM) > 0 }
}

/// Log why the chip booted and who it is.
pub fn log_boot_info() {
    info!("{}", wakeup_cause().description());
    info!("Reset reason: {:?}", reset_reason());
    match station_mac() {
        Ok(mac) => info!("{}", format_mac(&mac)),
        Err(e) => info!("MAC unavailable: {}", e),
    }
    info!("PSRAM: {}", if has_psram() { "found" } else { "not found" });
}

/// Mount the FAT partition labelled [`PARTITION_LABEL`] at [`FS_ROOT`],
/// formatting it if the mount fails.
pub fn mount_flash_fs() -> Result<()> {
    let base_path = CString::new(FS_ROOT)?;
    let label = CString::new(PARTITION_LABEL)?;
    let conf = sys::esp_vfs_fat_mount_config_t {
        format_if_mount_failed: true,
        max_files: MAX_OPEN_FILES as _,
        allocation_unit_size: ALLOCATION_UNIT,
        ..Default::default()
    };
    let mut wl_handle: sys::wl_handle_t = 0;
    // SAFETY: the VFS copies both strings during registration.
    let err = unsafe {
        sys::esp_vfs_fat_spiflash_mount_rw_wl(base_path.as_ptr(), label.as_ptr(), &conf, &mut wl_handle)
    };
    if err != sys::ESP_OK {
        bail!("Flash filesystem mount failed with error 0x{:x}", err);
    }
    info!("Flash filesystem mounted at {}", FS_ROOT);
    Ok(())
}
