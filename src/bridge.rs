//! Outward operation surface.
//!
//! [`PrinterBridge`] is what a UI or IPC layer talks to. Every operation
//! resolves to a structured outcome value (failures are data, never
//! panics or surfaced `Err`s), and state changes of interest are pushed
//! to subscribers as [`PrinterEvent`]s, mirroring the two notifications
//! (`printerConnected` / `printerDisconnected`) the host layer expects.
//!
//! The session lives behind a single mutex: permission grants and detach
//! notifications arrive asynchronously and must serialize against
//! foreground connects and prints.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use log::{debug, warn};
use serde::Serialize;

use crate::commands::{self, PrintCommand, TextStyle};
use crate::error::Error;
use crate::select;
use crate::session::{connect_with_retry, RetryPolicy, Session, SessionState};
use crate::usb::{HostEvent, UsbDeviceInfo, UsbHost};

/// Connection details reported to the caller.
#[derive(Clone, Debug, Serialize)]
pub struct PrinterInfo {
    pub connected: bool,
    pub model: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl PrinterInfo {
    fn disconnected() -> Self {
        PrinterInfo {
            connected: false,
            model: "Disconnected".to_string(),
            vendor_id: 0,
            product_id: 0,
            device_name: String::new(),
            serial_number: None,
        }
    }

    fn for_device(device: &UsbDeviceInfo) -> Self {
        PrinterInfo {
            connected: true,
            model: select::vendor_name(device.vendor_id),
            vendor_id: device.vendor_id,
            product_id: device.product_id,
            device_name: device.name.clone(),
            serial_number: device.serial.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrinterEvent {
    Connected { message: String },
    Disconnected { message: String },
}

/// Result of a connect-class operation.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectOutcome {
    pub success: bool,
    /// True while the host is prompting the user for USB access; the
    /// final answer arrives through [`PrinterBridge::handle_host_event`].
    pub pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub printer_info: Option<PrinterInfo>,
}

impl ConnectOutcome {
    fn connected(info: PrinterInfo) -> Self {
        ConnectOutcome {
            success: true,
            pending: false,
            error: None,
            printer_info: Some(info),
        }
    }

    fn pending() -> Self {
        ConnectOutcome {
            success: false,
            pending: true,
            error: None,
            printer_info: None,
        }
    }

    fn failure(error: impl ToString) -> Self {
        ConnectOutcome {
            success: false,
            pending: false,
            error: Some(error.to_string()),
            printer_info: None,
        }
    }
}

/// Result of a send-class operation.
#[derive(Clone, Debug, Serialize)]
pub struct SendOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_transferred: Option<usize>,
}

impl SendOutcome {
    fn from_result(result: Result<usize, Error>) -> Self {
        match result {
            Ok(bytes) => SendOutcome {
                success: true,
                error: None,
                bytes_transferred: Some(bytes),
            },
            Err(err) => SendOutcome {
                success: false,
                error: Some(err.to_string()),
                bytes_transferred: None,
            },
        }
    }
}

struct Inner<H: crate::usb::UsbHandle> {
    session: Session<H>,
    /// Device we asked the host permission for, if a grant is pending.
    pending: Option<UsbDeviceInfo>,
}

pub struct PrinterBridge<H: UsbHost> {
    host: H,
    retry: RetryPolicy,
    inner: Mutex<Inner<H::Handle>>,
    listeners: Mutex<Vec<Sender<PrinterEvent>>>,
}

impl<H: UsbHost> PrinterBridge<H> {
    pub fn new(host: H) -> Self {
        PrinterBridge::with_retry(host, RetryPolicy::default())
    }

    pub fn with_retry(host: H, retry: RetryPolicy) -> Self {
        PrinterBridge {
            host,
            retry,
            inner: Mutex::new(Inner {
                session: Session::new(),
                pending: None,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to connected/disconnected notifications.
    pub fn subscribe(&self) -> Receiver<PrinterEvent> {
        let (sender, receiver) = channel();
        self.listeners.lock().unwrap().push(sender);
        receiver
    }

    fn emit(&self, event: PrinterEvent) {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|sender| sender.send(event.clone()).is_ok());
    }

    /// Select the most plausible printer among enumerated devices and
    /// connect to it, prompting for permission when the host requires it.
    pub fn connect(&self) -> ConnectOutcome {
        let mut inner = self.inner.lock().unwrap();
        if let Some(outcome) = Self::busy_check(&inner) {
            return outcome;
        }

        let devices = self.host.list_devices();
        let device = match select::select_printer(&devices) {
            Some(device) => device.clone(),
            None => {
                return ConnectOutcome::failure(Error::NoDevicesFound {
                    scanned: devices.len(),
                })
            }
        };
        self.connect_device(&mut inner, device)
    }

    /// Connect to a specific vendor/product id; a zero `product_id`
    /// matches any product from the vendor.
    pub fn connect_usb(&self, vendor_id: u16, product_id: u16) -> ConnectOutcome {
        let mut inner = self.inner.lock().unwrap();
        if let Some(outcome) = Self::busy_check(&inner) {
            return outcome;
        }

        let devices = self.host.list_devices();
        let device = match select::find_by_ids(&devices, vendor_id, product_id) {
            Some(device) => device.clone(),
            None => {
                return ConnectOutcome::failure(format!(
                    "device VID:0x{:04x} not found ({} USB devices present)",
                    vendor_id,
                    devices.len()
                ))
            }
        };
        self.connect_device(&mut inner, device)
    }

    fn busy_check(inner: &Inner<H::Handle>) -> Option<ConnectOutcome> {
        if inner.pending.is_some() || inner.session.state() == SessionState::Connecting {
            return Some(ConnectOutcome::failure(Error::Busy));
        }
        None
    }

    fn connect_device(&self, inner: &mut Inner<H::Handle>, device: UsbDeviceInfo) -> ConnectOutcome {
        if !self.host.has_permission(&device) {
            debug!("requesting USB permission for {}", device.name);
            inner.session.begin_connecting();
            inner.pending = Some(device.clone());
            self.host.request_permission(&device);
            return ConnectOutcome::pending();
        }

        // Only one live session at a time; drop whatever came before.
        inner.session.disconnect();

        match connect_with_retry(&self.host, &device, &self.retry) {
            Ok(session) => {
                let info = PrinterInfo::for_device(&device);
                inner.session = session;
                self.emit(PrinterEvent::Connected {
                    message: "Connected".to_string(),
                });
                ConnectOutcome::connected(info)
            }
            Err(err) => ConnectOutcome::failure(err),
        }
    }

    /// Feed an asynchronous host notification into the bridge. When the
    /// event settles a pending connect (a permission grant or denial),
    /// the connect's outcome is returned so the embedder can resolve
    /// whatever call it parked.
    pub fn handle_host_event(&self, event: HostEvent) -> Option<ConnectOutcome> {
        match event {
            HostEvent::PermissionGranted(device) => {
                let mut inner = self.inner.lock().unwrap();
                if inner.pending.take().is_none() {
                    debug!("permission granted with no connect pending, ignoring");
                    return None;
                }
                let outcome = self.connect_device(&mut inner, device);
                if !outcome.success {
                    warn!(
                        "connect after permission grant failed: {}",
                        outcome.error.as_deref().unwrap_or("unknown")
                    );
                }
                Some(outcome)
            }
            HostEvent::PermissionDenied => {
                let mut inner = self.inner.lock().unwrap();
                if inner.pending.take().is_some() {
                    warn!("USB permission denied");
                    inner.session.disconnect();
                    return Some(ConnectOutcome::failure(Error::PermissionDenied));
                }
                None
            }
            HostEvent::DeviceAttached(device) => {
                debug!("device attached: {}", device.name);
                self.emit(PrinterEvent::Connected {
                    message: "Device attached".to_string(),
                });
                None
            }
            HostEvent::DeviceDetached => {
                let mut inner = self.inner.lock().unwrap();
                inner.pending = None;
                inner.session.on_detached();
                self.emit(PrinterEvent::Disconnected {
                    message: "Printer disconnected".to_string(),
                });
                None
            }
        }
    }

    pub fn disconnect(&self) -> SendOutcome {
        let mut inner = self.inner.lock().unwrap();
        inner.pending = None;
        inner.session.disconnect();
        SendOutcome {
            success: true,
            error: None,
            bytes_transferred: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().session.is_connected()
    }

    pub fn printer_info(&self) -> PrinterInfo {
        let inner = self.inner.lock().unwrap();
        match inner.session.device() {
            Some(device) if inner.session.is_connected() => PrinterInfo::for_device(device),
            _ => PrinterInfo::disconnected(),
        }
    }

    fn send_one(&self, command: PrintCommand) -> SendOutcome {
        let mut inner = self.inner.lock().unwrap();
        SendOutcome::from_result(inner.session.send(&command))
    }

    /// Send a sequence of transfers, reporting the outcome of the one at
    /// `report_index`. Earlier failures are logged, not surfaced; print
    /// operations are not idempotent and must not be silently retried.
    fn send_job(&self, commands: Vec<PrintCommand>, report_index: usize) -> SendOutcome {
        let mut inner = self.inner.lock().unwrap();
        if !inner.session.is_connected() {
            return SendOutcome::from_result(Err(Error::NotConnected));
        }

        let mut reported = Err(Error::NotConnected);
        for (index, command) in commands.iter().enumerate() {
            let result = inner.session.send(command);
            if let Err(err) = &result {
                debug!("transfer {} of job failed: {}", index, err);
            }
            if index == report_index {
                reported = result;
            }
        }
        SendOutcome::from_result(reported)
    }

    /// Raw ESC/POS payload, Latin-1 encoded as typed.
    pub fn send_raw(&self, command: &str) -> SendOutcome {
        match commands::encode_text(command) {
            Ok(bytes) => self.send_one(PrintCommand::new(bytes, commands::RAW_TIMEOUT_MS)),
            Err(err) => SendOutcome::from_result(Err(err)),
        }
    }

    pub fn print_text(&self, text: &str) -> SendOutcome {
        match commands::text_line(text) {
            Ok(bytes) => self.send_one(PrintCommand::new(bytes, commands::TEXT_TIMEOUT_MS)),
            Err(err) => SendOutcome::from_result(Err(err)),
        }
    }

    /// Styled line. Attribute transfers around the text are best-effort;
    /// only the text transfer's result is reported.
    pub fn print_formatted(&self, text: &str, style: TextStyle) -> SendOutcome {
        match commands::formatted(text, style) {
            Ok(job) => self.send_job(job.commands, job.text_index),
            Err(err) => SendOutcome::from_result(Err(err)),
        }
    }

    pub fn feed(&self, lines: u8) -> SendOutcome {
        self.send_one(PrintCommand::new(
            commands::feed(lines),
            commands::MECH_TIMEOUT_MS,
        ))
    }

    pub fn cut(&self, partial: bool) -> SendOutcome {
        let bytes: &[u8] = if partial {
            &commands::CUT_PARTIAL
        } else {
            &commands::CUT_FULL
        };
        self.send_one(PrintCommand::new(bytes, commands::MECH_TIMEOUT_MS))
    }

    pub fn open_drawer(&self) -> SendOutcome {
        self.send_one(PrintCommand::new(
            commands::DRAWER_KICK,
            commands::MECH_TIMEOUT_MS,
        ))
    }

    /// CODE128 barcode; the print frame's result is what gets reported.
    pub fn print_barcode(&self, data: &str, height: u8) -> SendOutcome {
        match commands::barcode_code128(data, height) {
            Ok(frames) => {
                let last = frames.len() - 1;
                self.send_job(frames, last)
            }
            Err(err) => SendOutcome::from_result(Err(err)),
        }
    }

    /// QR code; the print-trigger frame's result is what gets reported.
    pub fn print_qr(&self, data: &str, module_size: u8) -> SendOutcome {
        match commands::qr_code(data, module_size) {
            Ok(frames) => {
                let last = frames.len() - 1;
                self.send_job(frames, last)
            }
            Err(err) => SendOutcome::from_result(Err(err)),
        }
    }

    /// Print a self-test page with the connected device's details.
    pub fn test_print(&self) -> SendOutcome {
        let info = self.printer_info();
        if !info.connected {
            return SendOutcome::from_result(Err(Error::NotConnected));
        }
        match commands::test_page(&info.model, info.vendor_id, info.product_id) {
            Ok(job) => {
                let last = job.len() - 1;
                self.send_job(job, last)
            }
            Err(err) => SendOutcome::from_result(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Align, TextSize};
    use crate::usb::testing::{printer_device, MockHost};
    use std::time::Duration;

    fn bridge_with(devices: Vec<UsbDeviceInfo>) -> PrinterBridge<MockHost> {
        let host = MockHost::new(devices);
        PrinterBridge::with_retry(
            host,
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        )
    }

    #[test]
    fn connect_selects_and_reports_printer_info() {
        let bridge = bridge_with(vec![printer_device(0x0b1b, 0x0035)]);
        let events = bridge.subscribe();

        let outcome = bridge.connect();
        assert!(outcome.success);
        let info = outcome.printer_info.unwrap();
        assert_eq!(info.model, "Bematech");
        assert_eq!(info.vendor_id, 0x0b1b);
        assert!(bridge.is_connected());
        assert_eq!(
            events.try_recv().unwrap(),
            PrinterEvent::Connected {
                message: "Connected".to_string()
            }
        );
    }

    #[test]
    fn connect_with_no_devices_mentions_the_zero_count() {
        let bridge = bridge_with(vec![]);
        let outcome = bridge.connect();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("0"));
    }

    #[test]
    fn connect_usb_matches_requested_ids() {
        let bridge = bridge_with(vec![
            printer_device(0x0b1b, 0x0035),
            printer_device(0x04b8, 0x0202),
        ]);
        let outcome = bridge.connect_usb(0x04b8, 0);
        assert!(outcome.success);
        assert_eq!(outcome.printer_info.unwrap().vendor_id, 0x04b8);

        let missing = bridge_with(vec![printer_device(0x0b1b, 0x0035)]);
        let outcome = missing.connect_usb(0x1234, 0);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("1234"));
    }

    #[test]
    fn permission_flow_connects_on_grant() {
        let bridge = bridge_with(vec![printer_device(0x0b1b, 0x0035)]);
        bridge.host.state().permission = false;

        let outcome = bridge.connect();
        assert!(outcome.pending);
        assert!(!outcome.success);
        assert_eq!(bridge.host.state().permission_requests.len(), 1);

        // A second connect while the prompt is up is rejected.
        let busy = bridge.connect();
        assert!(busy.error.unwrap().contains("in progress"));

        let device = bridge.host.devices[0].clone();
        bridge.host.state().permission = true;
        bridge.handle_host_event(HostEvent::PermissionGranted(device));
        assert!(bridge.is_connected());
    }

    #[test]
    fn permission_denied_clears_the_pending_connect() {
        let bridge = bridge_with(vec![printer_device(0x0b1b, 0x0035)]);
        bridge.host.state().permission = false;
        assert!(bridge.connect().pending);

        bridge.handle_host_event(HostEvent::PermissionDenied);
        assert!(!bridge.is_connected());

        // And a new connect is allowed again.
        bridge.host.state().permission = true;
        assert!(bridge.connect().success);
    }

    #[test]
    fn detach_event_forces_disconnected_and_notifies() {
        let bridge = bridge_with(vec![printer_device(0x0b1b, 0x0035)]);
        let events = bridge.subscribe();
        assert!(bridge.connect().success);
        let _ = events.try_recv();

        bridge.handle_host_event(HostEvent::DeviceDetached);
        assert!(!bridge.is_connected());
        assert_eq!(
            events.try_recv().unwrap(),
            PrinterEvent::Disconnected {
                message: "Printer disconnected".to_string()
            }
        );
        assert!(!bridge.print_text("stale").success);
    }

    #[test]
    fn print_operations_fail_as_values_when_disconnected() {
        let bridge = bridge_with(vec![printer_device(0x0b1b, 0x0035)]);
        let outcome = bridge.print_text("hello");
        assert!(!outcome.success);
        assert_eq!(outcome.error.unwrap(), Error::NotConnected.to_string());
    }

    #[test]
    fn print_formatted_reports_the_text_transfer() {
        let bridge = bridge_with(vec![printer_device(0x0b1b, 0x0035)]);
        assert!(bridge.connect().success);

        // Fail the align and size attribute transfers; the text one works.
        bridge.host.state().bulk_script.extend([-1, -1]);
        let style = TextStyle {
            bold: false,
            align: Align::Center,
            size: TextSize::Double,
        };
        let outcome = bridge.print_formatted("TOTAL", style);
        assert!(outcome.success);
        assert_eq!(outcome.bytes_transferred, Some(6));
    }

    #[test]
    fn print_formatted_failure_of_text_is_reported() {
        let bridge = bridge_with(vec![printer_device(0x0b1b, 0x0035)]);
        assert!(bridge.connect().success);

        // Attributes fine, text transfer dies.
        bridge.host.state().bulk_script.extend([3, 3, -32]);
        let outcome = bridge.print_formatted("TOTAL", TextStyle::default());
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("-32"));
    }

    #[test]
    fn disconnect_twice_stays_successful() {
        let bridge = bridge_with(vec![printer_device(0x0b1b, 0x0035)]);
        assert!(bridge.connect().success);
        assert!(bridge.disconnect().success);
        assert!(bridge.disconnect().success);
        assert_eq!(bridge.host.state().releases, vec![0]);
    }

    #[test]
    fn outcomes_serialize_with_the_expected_shape() {
        let bridge = bridge_with(vec![]);
        let outcome = bridge.connect();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("no printer"));
        assert!(json.get("printer_info").is_none());
    }

    #[test]
    fn barcode_and_qr_send_all_frames() {
        let bridge = bridge_with(vec![printer_device(0x0b1b, 0x0035)]);
        assert!(bridge.connect().success);
        let before = bridge.host.state().bulk.len();

        assert!(bridge.print_barcode("12345", 80).success);
        assert!(bridge.print_qr("https://example.com", 6).success);

        let state = bridge.host.state();
        // 3 barcode frames + 5 QR frames on top of whatever connect sent.
        assert_eq!(state.bulk.len(), before + 8);
        let barcode_print = &state.bulk[before + 2].1;
        assert_eq!(
            barcode_print,
            &vec![0x1d, 0x6b, 0x49, 0x05, 0x31, 0x32, 0x33, 0x34, 0x35]
        );
    }
}
