//! Interface acquisition.
//!
//! Claiming a receipt printer's interface is the flaky part of the whole
//! exercise: a kernel class driver, a stale session or the device's own
//! wake-up dance can all hold the interface hostage. The acquirer runs a
//! fixed ladder of strategies, each nudging the device with a standard
//! control transfer before retrying the force-claim, and stops at the
//! first one that sticks.

use std::thread::sleep;
use std::time::Duration;

use log::{debug, warn};

use crate::commands;
use crate::error::{Error, Result};
use crate::usb::{
    EndpointDirection, TransferKind, UsbDeviceInfo, UsbHandle, UsbInterfaceInfo, CLASS_PRINTER,
    CLASS_VENDOR_SPECIFIC,
};

// Standard control request encoding (bmRequestType / bRequest).
const DIR_OUT: u8 = 0x00;
const TYPE_STANDARD: u8 = 0x00;
const RECIP_DEVICE: u8 = 0x00;
const RECIP_INTERFACE: u8 = 0x01;
const REQUEST_CLEAR_FEATURE: u8 = 0x01;
const REQUEST_SET_CONFIGURATION: u8 = 0x09;
const REQUEST_SET_INTERFACE: u8 = 0x0b;

const CONTROL_TIMEOUT_MS: u32 = 1_000;
const RESET_SETTLE: Duration = Duration::from_millis(100);

/// The interface a session holds while connected: its number plus the
/// bulk endpoints picked from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClaimedInterface {
    pub number: u8,
    pub endpoint_out: u8,
    pub endpoint_in: Option<u8>,
}

fn bulk_endpoints(interface: &UsbInterfaceInfo) -> (Option<u8>, Option<u8>) {
    let mut out = None;
    let mut inp = None;
    for endpoint in &interface.endpoints {
        if endpoint.transfer != TransferKind::Bulk {
            continue;
        }
        match endpoint.direction {
            EndpointDirection::Out => out = out.or(Some(endpoint.address)),
            EndpointDirection::In => inp = inp.or(Some(endpoint.address)),
        }
    }
    (out, inp)
}

/// Locate the interface to claim. Printer-class, vendor-specific and
/// class-zero interfaces are preferred; failing those, any interface
/// with a bulk OUT endpoint will do.
pub fn find_bulk_out(device: &UsbDeviceInfo) -> Result<ClaimedInterface> {
    for interface in &device.interfaces {
        let preferred = matches!(
            interface.class_code,
            CLASS_PRINTER | CLASS_VENDOR_SPECIFIC | 0
        );
        if !preferred {
            continue;
        }
        if let (Some(endpoint_out), endpoint_in) = bulk_endpoints(interface) {
            debug!(
                "using interface {} (class 0x{:02x}) with bulk OUT 0x{:02x}",
                interface.number, interface.class_code, endpoint_out
            );
            return Ok(ClaimedInterface {
                number: interface.number,
                endpoint_out,
                endpoint_in,
            });
        }
    }

    // Fallback: take any interface exposing a bulk OUT, class be damned.
    for interface in &device.interfaces {
        if let (Some(endpoint_out), endpoint_in) = bulk_endpoints(interface) {
            debug!(
                "fallback to interface {} of class 0x{:02x}",
                interface.number, interface.class_code
            );
            return Ok(ClaimedInterface {
                number: interface.number,
                endpoint_out,
                endpoint_in,
            });
        }
    }

    Err(Error::NoEndpointFound)
}

/// Soft reset: a standard Set Configuration request that coaxes the
/// kernel into letting go of the device. Some devices reject or ignore
/// it, so the result is logged and never treated as fatal.
pub fn soft_reset<H: UsbHandle>(handle: &mut H) {
    let code = handle.control_transfer(
        DIR_OUT | TYPE_STANDARD | RECIP_DEVICE,
        REQUEST_SET_CONFIGURATION,
        1,
        0,
        &[],
        CONTROL_TIMEOUT_MS,
    );
    debug!("set configuration returned {}", code);
    sleep(RESET_SETTLE);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClaimStrategy {
    /// Force-claim directly, detaching whatever kernel driver is bound.
    Direct,
    /// Select alternate setting 0 first, then force-claim.
    SetInterface,
    /// Clear the interface feature first, then force-claim.
    ClearFeature,
}

/// Strategy ladder, tried in order; first success wins.
const STRATEGIES: [ClaimStrategy; 3] = [
    ClaimStrategy::Direct,
    ClaimStrategy::SetInterface,
    ClaimStrategy::ClearFeature,
];

impl ClaimStrategy {
    /// Control-transfer side effect before the claim attempt, plus the
    /// settle delay the device gets afterwards.
    fn prepare<H: UsbHandle>(self, handle: &mut H, interface: u8) {
        match self {
            ClaimStrategy::Direct => {}
            ClaimStrategy::SetInterface => {
                let code = handle.control_transfer(
                    DIR_OUT | TYPE_STANDARD | RECIP_INTERFACE,
                    REQUEST_SET_INTERFACE,
                    0,
                    interface as u16,
                    &[],
                    CONTROL_TIMEOUT_MS,
                );
                debug!("set interface returned {}", code);
                sleep(Duration::from_millis(50));
            }
            ClaimStrategy::ClearFeature => {
                let code = handle.control_transfer(
                    DIR_OUT | TYPE_STANDARD | RECIP_INTERFACE,
                    REQUEST_CLEAR_FEATURE,
                    0,
                    interface as u16,
                    &[],
                    CONTROL_TIMEOUT_MS,
                );
                debug!("clear feature returned {}", code);
                sleep(Duration::from_millis(100));
            }
        }
    }
}

/// Reset, locate endpoints, then walk the claim ladder. On success the
/// protocol-initialize bytes go out immediately: a claimed pipe that was
/// never written to proves nothing. A failed init write is logged only,
/// since some devices buffer the first packet while waking up, and the
/// claim itself is trusted.
pub fn claim<H: UsbHandle>(device: &UsbDeviceInfo, handle: &mut H) -> Result<ClaimedInterface> {
    let target = find_bulk_out(device)?;

    soft_reset(handle);

    for strategy in STRATEGIES {
        strategy.prepare(handle, target.number);
        if !handle.claim_interface(target.number, true) {
            debug!("claim via {:?} failed", strategy);
            continue;
        }
        debug!("interface {} claimed via {:?}", target.number, strategy);

        let sent = handle.bulk_transfer(
            target.endpoint_out,
            &commands::INIT,
            commands::INIT_TIMEOUT_MS,
        );
        if sent < 0 {
            warn!("init command not accepted (code {}), keeping claim", sent);
        }
        return Ok(target);
    }

    Err(Error::ClaimFailed)
}
