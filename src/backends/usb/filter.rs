// SPDX-License-Identifier: GPL-3.0-only

//! Device filters selecting which USB devices the monitor reports

use serde::{Deserialize, Serialize};

use super::UsbDevice;
use crate::constants::uvc;

/// Constraints on a USB device; unset fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub class: Option<u8>,
    pub subclass: Option<u8>,
    pub protocol: Option<u8>,
    pub manufacturer: Option<String>,
    pub product_name: Option<String>,
    pub serial: Option<String>,
    /// A matching device is rejected instead of accepted
    pub exclude: bool,
}

impl DeviceFilter {
    /// Filters accepting UVC cameras
    ///
    /// Composite cameras announce Misc/IAD at device level, simple ones only
    /// carry the video class on their interfaces.
    pub fn uvc_defaults() -> Vec<DeviceFilter> {
        vec![
            DeviceFilter {
                class: Some(uvc::CLASS_MISC),
                subclass: Some(uvc::SUBCLASS_COMMON),
                ..Default::default()
            },
            DeviceFilter {
                class: Some(uvc::CLASS_VIDEO),
                ..Default::default()
            },
        ]
    }

    fn matches_class(&self, class: u8, subclass: u8, protocol: u8) -> bool {
        self.class.is_none_or(|c| c == class)
            && self.subclass.is_none_or(|s| s == subclass)
            && self.protocol.is_none_or(|p| p == protocol)
    }

    /// Check the filter against a device, ignoring `exclude`
    pub fn matches(&self, device: &UsbDevice) -> bool {
        let id = &device.identity;
        if self.vendor_id.is_some_and(|v| v != id.vendor_id)
            || self.product_id.is_some_and(|p| p != id.product_id)
        {
            return false;
        }
        if let Some(name) = &self.manufacturer
            && id.manufacturer.as_deref() != Some(name.as_str())
        {
            return false;
        }
        if let Some(name) = &self.product_name
            && device.product_name.as_deref() != Some(name.as_str())
        {
            return false;
        }
        if let Some(serial) = &self.serial
            && id.serial.as_deref() != Some(serial.as_str())
        {
            return false;
        }

        self.matches_class(id.class, id.subclass, id.protocol)
            || device
                .interfaces
                .iter()
                .any(|i| self.matches_class(i.class, i.subclass, i.protocol))
    }
}

/// Apply a filter list: the first matching filter decides, no filters accept all
pub fn accepts(filters: &[DeviceFilter], device: &UsbDevice) -> bool {
    if filters.is_empty() {
        return true;
    }
    filters
        .iter()
        .find(|f| f.matches(device))
        .is_some_and(|f| !f.exclude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::usb::{DeviceIdentity, InterfaceClass};

    fn device(class: u8, interfaces: Vec<InterfaceClass>) -> UsbDevice {
        UsbDevice {
            device_name: "/dev/bus/usb/001/002".into(),
            identity: DeviceIdentity::new(0x046d, 0x0825, class, 2, 1),
            product_name: Some("Webcam".into()),
            interfaces,
            sysfs_path: None,
        }
    }

    #[test]
    fn test_defaults_accept_iad_camera() {
        assert!(accepts(&DeviceFilter::uvc_defaults(), &device(239, vec![])));
    }

    #[test]
    fn test_defaults_accept_video_interface() {
        let cam = device(0, vec![InterfaceClass { class: 14, subclass: 1, protocol: 0 }]);
        assert!(accepts(&DeviceFilter::uvc_defaults(), &cam));
    }

    #[test]
    fn test_defaults_reject_hub() {
        assert!(!accepts(&DeviceFilter::uvc_defaults(), &device(9, vec![])));
    }

    #[test]
    fn test_exclude_wins_when_first() {
        let filters = vec![
            DeviceFilter {
                vendor_id: Some(0x046d),
                exclude: true,
                ..Default::default()
            },
            DeviceFilter::default(),
        ];
        assert!(!accepts(&filters, &device(239, vec![])));
    }

    #[test]
    fn test_empty_filter_list_accepts_all() {
        assert!(accepts(&[], &device(9, vec![])));
    }

    #[test]
    fn test_filter_from_json() {
        let filter: DeviceFilter = serde_json::from_str(r#"{"vendor_id": 1133}"#).unwrap();
        assert_eq!(filter.vendor_id, Some(0x046d));
        assert!(!filter.exclude);
    }
}
