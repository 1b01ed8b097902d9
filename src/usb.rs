//! Host USB capability boundary.
//!
//! The core never talks to a platform USB stack directly. Everything it
//! needs from the host (enumeration, permission, open, control/bulk
//! transfers, interface claiming) goes through the [`UsbHost`] and
//! [`UsbHandle`] traits, implemented by a platform adapter (see
//! [`crate::rusb_host`] for the libusb one). Asynchronous host
//! notifications arrive as [`HostEvent`] values pushed into the bridge.

/// USB "Printer" interface class code.
pub const CLASS_PRINTER: u8 = 0x07;
/// Vendor-specific interface class code.
pub const CLASS_VENDOR_SPECIFIC: u8 = 0xff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointDirection {
    In,
    Out,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint of an interface descriptor.
#[derive(Clone, Debug)]
pub struct UsbEndpointInfo {
    /// Raw endpoint address, direction bit included.
    pub address: u8,
    pub direction: EndpointDirection,
    pub transfer: TransferKind,
}

#[derive(Clone, Debug)]
pub struct UsbInterfaceInfo {
    pub number: u8,
    pub class_code: u8,
    pub subclass: u8,
    pub endpoints: Vec<UsbEndpointInfo>,
}

/// Immutable snapshot of a device as enumerated by the host subsystem.
#[derive(Clone, Debug)]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Host-specific device name or path.
    pub name: String,
    pub serial: Option<String>,
    pub interfaces: Vec<UsbInterfaceInfo>,
}

/// Low-level operations on an open device.
///
/// Transfer methods follow the host convention of returning the byte
/// count on success and a negative code on failure; they never panic.
pub trait UsbHandle {
    fn control_transfer(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout_ms: u32,
    ) -> i32;

    fn bulk_transfer(&mut self, endpoint: u8, data: &[u8], timeout_ms: u32) -> i32;

    /// Claim exclusive ownership of an interface. With `force` the host
    /// is asked to detach any kernel driver currently bound to it.
    fn claim_interface(&mut self, interface: u8, force: bool) -> bool;

    fn release_interface(&mut self, interface: u8) -> bool;
}

/// Host USB subsystem as seen by the core.
pub trait UsbHost {
    type Handle: UsbHandle;

    fn list_devices(&self) -> Vec<UsbDeviceInfo>;

    fn has_permission(&self, device: &UsbDeviceInfo) -> bool;

    /// Ask the host to prompt for access. The answer comes back later as
    /// a [`HostEvent::PermissionGranted`] or [`HostEvent::PermissionDenied`].
    fn request_permission(&self, device: &UsbDeviceInfo);

    fn open(&self, device: &UsbDeviceInfo) -> Option<Self::Handle>;
}

/// Asynchronous notifications delivered by the host subsystem.
#[derive(Clone, Debug)]
pub enum HostEvent {
    PermissionGranted(UsbDeviceInfo),
    PermissionDenied,
    DeviceAttached(UsbDeviceInfo),
    DeviceDetached,
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted host/handle doubles for exercising acquisition paths
    //! without hardware.

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, MutexGuard};

    use super::*;

    #[derive(Debug, Default)]
    pub struct MockState {
        /// (request_type, request, value, index) of every control transfer.
        pub controls: Vec<(u8, u8, u16, u16)>,
        /// (endpoint, payload) of every bulk transfer.
        pub bulk: Vec<(u8, Vec<u8>)>,
        /// (interface, outcome) of every claim attempt.
        pub claims: Vec<(u8, bool)>,
        pub releases: Vec<u8>,
        /// Scripted claim outcomes, front first; exhausted script means success.
        pub claim_script: VecDeque<bool>,
        /// Scripted bulk return codes; exhausted script echoes the length.
        pub bulk_script: VecDeque<i32>,
        /// Scripted open outcomes; exhausted script means success.
        pub open_script: VecDeque<bool>,
        pub opens: usize,
        pub permission: bool,
        pub permission_requests: Vec<String>,
    }

    pub struct MockHost {
        pub devices: Vec<UsbDeviceInfo>,
        pub state: Arc<Mutex<MockState>>,
    }

    impl MockHost {
        pub fn new(devices: Vec<UsbDeviceInfo>) -> Self {
            let state = MockState {
                permission: true,
                ..MockState::default()
            };
            MockHost {
                devices,
                state: Arc::new(Mutex::new(state)),
            }
        }

        pub fn state(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap()
        }
    }

    impl UsbHost for MockHost {
        type Handle = MockHandle;

        fn list_devices(&self) -> Vec<UsbDeviceInfo> {
            self.devices.clone()
        }

        fn has_permission(&self, _device: &UsbDeviceInfo) -> bool {
            self.state().permission
        }

        fn request_permission(&self, device: &UsbDeviceInfo) {
            self.state().permission_requests.push(device.name.clone());
        }

        fn open(&self, _device: &UsbDeviceInfo) -> Option<MockHandle> {
            let mut state = self.state();
            state.opens += 1;
            if let Some(false) = state.open_script.pop_front() {
                return None;
            }
            Some(MockHandle {
                state: Arc::clone(&self.state),
            })
        }
    }

    #[derive(Debug)]
    pub struct MockHandle {
        pub state: Arc<Mutex<MockState>>,
    }

    impl UsbHandle for MockHandle {
        fn control_transfer(
            &mut self,
            request_type: u8,
            request: u8,
            value: u16,
            index: u16,
            _data: &[u8],
            _timeout_ms: u32,
        ) -> i32 {
            let mut state = self.state.lock().unwrap();
            state.controls.push((request_type, request, value, index));
            0
        }

        fn bulk_transfer(&mut self, endpoint: u8, data: &[u8], _timeout_ms: u32) -> i32 {
            let mut state = self.state.lock().unwrap();
            state.bulk.push((endpoint, data.to_vec()));
            state
                .bulk_script
                .pop_front()
                .unwrap_or(data.len() as i32)
        }

        fn claim_interface(&mut self, interface: u8, _force: bool) -> bool {
            let mut state = self.state.lock().unwrap();
            let outcome = state.claim_script.pop_front().unwrap_or(true);
            state.claims.push((interface, outcome));
            outcome
        }

        fn release_interface(&mut self, interface: u8) -> bool {
            let mut state = self.state.lock().unwrap();
            state.releases.push(interface);
            true
        }
    }

    /// A well-behaved printer: one printer-class interface with a bulk
    /// OUT and a bulk IN endpoint.
    pub fn printer_device(vendor_id: u16, product_id: u16) -> UsbDeviceInfo {
        UsbDeviceInfo {
            vendor_id,
            product_id,
            name: format!("usb:001/{:03}", product_id & 0xff),
            serial: Some("TEST-0001".to_string()),
            interfaces: vec![UsbInterfaceInfo {
                number: 0,
                class_code: CLASS_PRINTER,
                subclass: 1,
                endpoints: vec![
                    UsbEndpointInfo {
                        address: 0x01,
                        direction: EndpointDirection::Out,
                        transfer: TransferKind::Bulk,
                    },
                    UsbEndpointInfo {
                        address: 0x81,
                        direction: EndpointDirection::In,
                        transfer: TransferKind::Bulk,
                    },
                ],
            }],
        }
    }

    /// A device of an arbitrary interface class with no bulk endpoints.
    pub fn bare_device(vendor_id: u16, product_id: u16, class_code: u8) -> UsbDeviceInfo {
        UsbDeviceInfo {
            vendor_id,
            product_id,
            name: format!("usb:002/{:03}", product_id & 0xff),
            serial: None,
            interfaces: vec![UsbInterfaceInfo {
                number: 0,
                class_code,
                subclass: 0,
                endpoints: vec![UsbEndpointInfo {
                    address: 0x82,
                    direction: EndpointDirection::In,
                    transfer: TransferKind::Interrupt,
                }],
            }],
        }
    }
}
