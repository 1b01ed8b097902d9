//! # posbridge
//!
//! USB ESC/POS receipt printer bridge.
//!
//! ## Scope
//!
//! Two jobs, done defensively:
//! - **Getting hold of the printer.** Receipt printers are notorious for
//!   having their bulk interface held by a kernel class driver or a
//!   half-dead previous session. The acquisition path picks a plausible
//!   device (vendor allow-list, printer class, first device), then walks
//!   a ladder of claim strategies under a bounded retry loop.
//! - **Talking ESC/POS.** Text, formatting, cut, feed, drawer kick,
//!   CODE128 and QR codes encoded as exact byte sequences.
//!
//! Platform USB access goes through the [`usb::UsbHost`] /
//! [`usb::UsbHandle`] capability traits; [`rusb_host::RusbHost`] is the
//! libusb adapter. Hosts with their own enumeration and permission model
//! implement the traits and feed notifications in as
//! [`usb::HostEvent`]s.
//!
//! ## Example
//!
//! ```ignore
//! use posbridge::{PrinterBridge, RusbHost, TextStyle, Align, TextSize};
//!
//! let bridge = PrinterBridge::new(RusbHost::new());
//! let events = bridge.subscribe();
//!
//! let outcome = bridge.connect();
//! if outcome.success {
//!     bridge.print_formatted("MY SHOP", TextStyle {
//!         bold: true,
//!         align: Align::Center,
//!         size: TextSize::Double,
//!     });
//!     bridge.print_text("Thanks for your purchase");
//!     bridge.feed(3);
//!     bridge.cut(false);
//! }
//! ```

pub mod bridge;
pub mod claim;
pub mod commands;
pub mod error;
pub mod rusb_host;
pub mod select;
pub mod session;
pub mod usb;

pub use bridge::{ConnectOutcome, PrinterBridge, PrinterEvent, PrinterInfo, SendOutcome};
pub use claim::ClaimedInterface;
pub use commands::{Align, PrintCommand, TextSize, TextStyle};
pub use error::{Error, Result};
pub use rusb_host::RusbHost;
pub use select::{find_by_ids, select_printer, vendor_name, KNOWN_PRINTER_VENDORS};
pub use session::{connect_with_retry, RetryPolicy, Session, SessionState};
pub use usb::{HostEvent, UsbDeviceInfo, UsbHandle, UsbHost};
