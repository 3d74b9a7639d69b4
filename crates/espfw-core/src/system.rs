//! Chip and boot information helpers.

use serde::Serialize;

/// Why the chip woke up, using the ESP-IDF `esp_sleep_source_t` numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WakeupCause {
    Ext0,
    Ext1,
    Timer,
    Touchpad,
    Ulp,
    /// Not a deep-sleep wakeup; carries the raw cause.
    Undefined(u32),
}

impl WakeupCause {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            2 => WakeupCause::Ext0,
            3 => WakeupCause::Ext1,
            4 => WakeupCause::Timer,
            5 => WakeupCause::Touchpad,
            6 => WakeupCause::Ulp,
            other => WakeupCause::Undefined(other),
        }
    }

    pub fn description(&self) -> String {
        match self {
            WakeupCause::Ext0 => "Wakeup caused by external signal using RTC_IO".to_string(),
            WakeupCause::Ext1 => "Wakeup caused by external signal using RTC_CNTL".to_string(),
            WakeupCause::Timer => "Wakeup caused by timer".to_string(),
            WakeupCause::Touchpad => "Wakeup caused by touchpad".to_string(),
            WakeupCause::Ulp => "Wakeup caused by ULP program".to_string(),
            WakeupCause::Undefined(code) => {
                format!("Wakeup was not caused by deep sleep: {code}")
            }
        }
    }
}

/// Why the chip last reset, using the ESP-IDF `esp_reset_reason_t` numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResetReason {
    Unknown,
    PowerOn,
    External,
    Software,
    Panic,
    InterruptWatchdog,
    TaskWatchdog,
    Watchdog,
    DeepSleep,
    Brownout,
    Sdio,
}

impl ResetReason {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => ResetReason::PowerOn,
            2 => ResetReason::External,
            3 => ResetReason::Software,
            4 => ResetReason::Panic,
            5 => ResetReason::InterruptWatchdog,
            6 => ResetReason::TaskWatchdog,
            7 => ResetReason::Watchdog,
            8 => ResetReason::DeepSleep,
            9 => ResetReason::Brownout,
            10 => ResetReason::Sdio,
            _ => ResetReason::Unknown,
        }
    }
}

/// Format a MAC address for the boot log.
pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "MAC Address: {{ {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x} }}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

/// True when every character is an ASCII digit. The empty string counts.
pub fn is_numeric(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wakeup_cause() {
        assert_eq!(WakeupCause::from_raw(4), WakeupCause::Timer);
        assert_eq!(WakeupCause::from_raw(0), WakeupCause::Undefined(0));
        assert_eq!(
            WakeupCause::from_raw(0).description(),
            "Wakeup was not caused by deep sleep: 0"
        );
        assert_eq!(
            WakeupCause::Ext0.description(),
            "Wakeup caused by external signal using RTC_IO"
        );
    }

    #[test]
    fn test_reset_reason() {
        assert_eq!(ResetReason::from_raw(1), ResetReason::PowerOn);
        assert_eq!(ResetReason::from_raw(8), ResetReason::DeepSleep);
        assert_eq!(ResetReason::from_raw(42), ResetReason::Unknown);
    }

    #[test]
    fn test_format_mac() {
        let mac = [0x32, 0xAE, 0xA4, 0x07, 0x0D, 0x66];
        assert_eq!(format_mac(&mac), "MAC Address: { 32:ae:a4:07:0d:66 }");
    }

    #[test]
    fn test_is_numeric() {
        assert!(is_numeric("0123"));
        assert!(is_numeric(""));
        assert!(!is_numeric("12a"));
        assert!(!is_numeric("-1"));
    }
}
