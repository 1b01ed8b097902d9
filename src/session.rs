//! Connection session and the retry loop around acquisition.
//!
//! A [`Session`] owns the single open handle and claimed interface the
//! crate ever holds at a time, and does little more than send and
//! release. The decisions about which device and how to claim it live in
//! [`crate::select`] and [`crate::claim`]; [`connect_with_retry`]
//! stitches them together under a bounded, linearly backed-off retry
//! loop.

use std::thread::sleep;
use std::time::Duration;

use log::{debug, warn};

use crate::claim::{self, ClaimedInterface};
use crate::commands::PrintCommand;
use crate::error::{Error, Result};
use crate::usb::{UsbDeviceInfo, UsbHandle, UsbHost};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug)]
pub struct Session<H: UsbHandle> {
    state: SessionState,
    handle: Option<H>,
    claimed: Option<ClaimedInterface>,
    device: Option<UsbDeviceInfo>,
}

impl<H: UsbHandle> Default for Session<H> {
    fn default() -> Self {
        Session::new()
    }
}

impl<H: UsbHandle> Session<H> {
    pub fn new() -> Self {
        Session {
            state: SessionState::Disconnected,
            handle: None,
            claimed: None,
            device: None,
        }
    }

    fn connected(handle: H, claimed: ClaimedInterface, device: UsbDeviceInfo) -> Self {
        Session {
            state: SessionState::Connected,
            handle: Some(handle),
            claimed: Some(claimed),
            device: Some(device),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// The device this session is connected to, while it is.
    pub fn device(&self) -> Option<&UsbDeviceInfo> {
        self.device.as_ref()
    }

    pub fn claimed(&self) -> Option<&ClaimedInterface> {
        self.claimed.as_ref()
    }

    /// Mark a connect in flight (e.g. waiting on a permission grant).
    /// Cleared by [`Session::disconnect`] or a completed connect.
    pub(crate) fn begin_connecting(&mut self) {
        if self.state == SessionState::Disconnected {
            self.state = SessionState::Connecting;
        }
    }

    /// Send one encoded command over the claimed bulk OUT endpoint.
    /// Refuses without touching I/O unless actually connected.
    pub fn send(&mut self, command: &PrintCommand) -> Result<usize> {
        if self.state != SessionState::Connected {
            return Err(Error::NotConnected);
        }
        let (handle, claimed) = match (self.handle.as_mut(), self.claimed.as_ref()) {
            (Some(handle), Some(claimed)) => (handle, claimed),
            _ => return Err(Error::NotConnected),
        };

        let code = handle.bulk_transfer(claimed.endpoint_out, &command.bytes, command.timeout_ms);
        if code < 0 {
            warn!("bulk transfer of {} bytes failed: {}", command.bytes.len(), code);
            return Err(Error::TransferFailed { code });
        }
        Ok(code as usize)
    }

    /// Tear everything down. Safe to call in any state; releasing an
    /// already-released interface is a no-op, never an error.
    pub fn disconnect(&mut self) {
        if let (Some(handle), Some(claimed)) = (self.handle.as_mut(), self.claimed.as_ref()) {
            if !handle.release_interface(claimed.number) {
                warn!("release of interface {} reported failure", claimed.number);
            }
        }
        // Dropping the handle closes the device.
        self.handle = None;
        self.claimed = None;
        self.device = None;
        self.state = SessionState::Disconnected;
    }

    /// The host says the device is gone. Same cleanup as an explicit
    /// disconnect; later sends fail with `NotConnected`.
    pub fn on_detached(&mut self) {
        debug!("device detached, dropping session");
        self.disconnect();
    }
}

/// Bounds for the acquisition retry loop.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff between attempt n and n+1 is `n * base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

fn connect_once<H: UsbHost>(host: &H, device: &UsbDeviceInfo) -> Result<Session<H::Handle>> {
    let mut handle = host.open(device).ok_or(Error::OpenFailed)?;
    let claimed = claim::claim(device, &mut handle)?;
    Ok(Session::connected(handle, claimed, device.clone()))
}

/// Run the full acquisition (open, reset, endpoint discovery, claim
/// ladder) up to `policy.max_attempts` times. Attempts are independent:
/// each one starts from a freshly opened handle, and a failed attempt's
/// handle is dropped, along with any partial claim, before the next.
pub fn connect_with_retry<H: UsbHost>(
    host: &H,
    device: &UsbDeviceInfo,
    policy: &RetryPolicy,
) -> Result<Session<H::Handle>> {
    let mut last = String::from("no attempt made");

    for attempt in 1..=policy.max_attempts {
        debug!("connection attempt {}/{}", attempt, policy.max_attempts);
        match connect_once(host, device) {
            Ok(session) => {
                debug!("connected on attempt {}", attempt);
                return Ok(session);
            }
            Err(err) => {
                warn!("attempt {} failed: {}", attempt, err);
                last = err.to_string();
            }
        }
        if attempt < policy.max_attempts {
            sleep(policy.base_delay * attempt);
        }
    }

    Err(Error::RetriesExhausted {
        attempts: policy.max_attempts,
        last,
    })
}
