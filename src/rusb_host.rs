//! libusb-backed implementation of the host USB capability, via rusb.
//!
//! On desktop platforms permission is implicit (access is decided at
//! `open` time), and "force claim" maps to libusb's auto-detach of any
//! bound kernel driver before the claim.

use std::time::Duration;

use log::{debug, trace, warn};
use rusb::{Device, DeviceHandle, Direction, GlobalContext, TransferType};

use crate::usb::{
    EndpointDirection, TransferKind, UsbDeviceInfo, UsbEndpointInfo, UsbHandle, UsbHost,
    UsbInterfaceInfo,
};

#[derive(Default)]
pub struct RusbHost;

impl RusbHost {
    pub fn new() -> Self {
        RusbHost
    }
}

fn device_name(device: &Device<GlobalContext>) -> String {
    format!("usb:{:03}/{:03}", device.bus_number(), device.address())
}

fn snapshot(device: &Device<GlobalContext>) -> Option<UsbDeviceInfo> {
    let descriptor = device.device_descriptor().ok()?;
    let config = device.config_descriptor(0).ok()?;

    let mut interfaces = Vec::new();
    for interface in config.interfaces() {
        for interface_desc in interface.descriptors() {
            let endpoints = interface_desc
                .endpoint_descriptors()
                .map(|endpoint| UsbEndpointInfo {
                    address: endpoint.address(),
                    direction: match endpoint.direction() {
                        Direction::In => EndpointDirection::In,
                        Direction::Out => EndpointDirection::Out,
                    },
                    transfer: match endpoint.transfer_type() {
                        TransferType::Control => TransferKind::Control,
                        TransferType::Isochronous => TransferKind::Isochronous,
                        TransferType::Bulk => TransferKind::Bulk,
                        TransferType::Interrupt => TransferKind::Interrupt,
                    },
                })
                .collect();
            interfaces.push(UsbInterfaceInfo {
                number: interface_desc.interface_number(),
                class_code: interface_desc.class_code(),
                subclass: interface_desc.sub_class_code(),
                endpoints,
            });
        }
    }

    // Serial is best effort; many printers do not expose one at all.
    let serial = device
        .open()
        .ok()
        .and_then(|handle| handle.read_serial_number_string_ascii(&descriptor).ok());

    Some(UsbDeviceInfo {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        name: device_name(device),
        serial,
        interfaces,
    })
}

impl UsbHost for RusbHost {
    type Handle = RusbHandle;

    fn list_devices(&self) -> Vec<UsbDeviceInfo> {
        let devices = match rusb::devices() {
            Ok(devices) => devices,
            Err(err) => {
                warn!("USB enumeration failed: {}", err);
                return Vec::new();
            }
        };
        devices.iter().filter_map(|d| snapshot(&d)).collect()
    }

    fn has_permission(&self, _device: &UsbDeviceInfo) -> bool {
        // libusb has no separate permission broadcast; access is decided
        // when the device is opened.
        true
    }

    fn request_permission(&self, device: &UsbDeviceInfo) {
        trace!("no permission prompt needed for {}", device.name);
    }

    fn open(&self, device: &UsbDeviceInfo) -> Option<RusbHandle> {
        let devices = rusb::devices().ok()?;
        for candidate in devices.iter() {
            if device_name(&candidate) != device.name {
                continue;
            }
            match candidate.open() {
                Ok(handle) => return Some(RusbHandle { handle }),
                Err(err) => {
                    warn!("open of {} failed: {}", device.name, err);
                    return None;
                }
            }
        }
        None
    }
}

pub struct RusbHandle {
    handle: DeviceHandle<GlobalContext>,
}

impl UsbHandle for RusbHandle {
    fn control_transfer(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout_ms: u32,
    ) -> i32 {
        let timeout = Duration::from_millis(u64::from(timeout_ms));
        let result = if request_type & 0x80 != 0 {
            let mut buf = vec![0u8; data.len()];
            self.handle
                .read_control(request_type, request, value, index, &mut buf, timeout)
        } else {
            self.handle
                .write_control(request_type, request, value, index, data, timeout)
        };
        match result {
            Ok(transferred) => transferred as i32,
            Err(err) => {
                debug!("control transfer 0x{:02x} failed: {}", request, err);
                -1
            }
        }
    }

    fn bulk_transfer(&mut self, endpoint: u8, data: &[u8], timeout_ms: u32) -> i32 {
        let timeout = Duration::from_millis(u64::from(timeout_ms));
        let result = if endpoint & 0x80 != 0 {
            let mut buf = vec![0u8; data.len()];
            self.handle.read_bulk(endpoint, &mut buf, timeout)
        } else {
            self.handle.write_bulk(endpoint, data, timeout)
        };
        match result {
            Ok(transferred) => transferred as i32,
            Err(err) => {
                debug!("bulk transfer on 0x{:02x} failed: {}", endpoint, err);
                -1
            }
        }
    }

    fn claim_interface(&mut self, interface: u8, force: bool) -> bool {
        if force {
            if let Err(err) = self.handle.set_auto_detach_kernel_driver(true) {
                trace!("auto detach unsupported: {}", err);
            }
            if let Ok(true) = self.handle.kernel_driver_active(interface) {
                if let Err(err) = self.handle.detach_kernel_driver(interface) {
                    warn!("kernel driver detach failed: {}", err);
                }
            }
        }
        self.handle.claim_interface(interface).is_ok()
    }

    fn release_interface(&mut self, interface: u8) -> bool {
        self.handle.release_interface(interface).is_ok()
    }
}
