//! Printer device selection.
//!
//! Given whatever the host enumerated, pick the device most likely to be
//! a receipt printer. Selection never errors on a non-empty list: plenty
//! of real printer firmwares misreport their class codes, so as a last
//! resort printing is attempted against the first device on the bus and
//! wrongness surfaces later as a transfer failure.

use log::debug;

use crate::usb::{UsbDeviceInfo, CLASS_PRINTER};

/// Vendor IDs of known POS printer brands, plus the common USB-serial
/// bridge chips some printers enumerate as.
pub const KNOWN_PRINTER_VENDORS: [u16; 12] = [
    0x0b1b, // Bematech
    0x04b8, // Epson
    0x0519, // Star Micronics
    0x0dd4, // Custom
    0x154f, // Daruma
    0x0fe6, // Kontec
    0x1a86, // QinHeng (CH340)
    0x067b, // Prolific (PL2303)
    0x10c4, // Silicon Labs
    0x0403, // FTDI
    0x0483, // Elgin
    0x20d1, // Generic POS
];

/// Pick the most plausible printer. Returns `None` only for an empty list.
pub fn select_printer(devices: &[UsbDeviceInfo]) -> Option<&UsbDeviceInfo> {
    if let Some(device) = devices
        .iter()
        .find(|d| KNOWN_PRINTER_VENDORS.contains(&d.vendor_id))
    {
        debug!(
            "selected {} by vendor id 0x{:04x}",
            device.name, device.vendor_id
        );
        return Some(device);
    }

    if let Some(device) = devices
        .iter()
        .find(|d| d.interfaces.iter().any(|i| i.class_code == CLASS_PRINTER))
    {
        debug!("selected {} by printer interface class", device.name);
        return Some(device);
    }

    let device = devices.first()?;
    debug!("no printer-looking device, falling back to {}", device.name);
    Some(device)
}

/// Find a specific device by vendor/product id. A `product_id` of zero
/// matches any product from that vendor.
pub fn find_by_ids(devices: &[UsbDeviceInfo], vendor_id: u16, product_id: u16) -> Option<&UsbDeviceInfo> {
    devices.iter().find(|d| {
        d.vendor_id == vendor_id && (product_id == 0 || d.product_id == product_id)
    })
}

/// Human-readable brand for a vendor id, for reporting only.
pub fn vendor_name(vendor_id: u16) -> String {
    match vendor_id {
        0x0b1b => "Bematech".to_string(),
        0x04b8 => "Epson".to_string(),
        0x0519 => "Star Micronics".to_string(),
        0x0dd4 => "Custom".to_string(),
        0x154f => "Daruma".to_string(),
        0x0483 => "Elgin".to_string(),
        0x1a86 => "QinHeng/CH340".to_string(),
        _ => format!("Printer VID:0x{:04x}", vendor_id),
    }
}
