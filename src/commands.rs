//! ESC/POS command encoding.
//!
//! Pure mapping from print intents to the byte sequences the printer
//! consumes. Nothing in here touches USB; every function returns one or
//! more [`PrintCommand`]s that a session sends as independent bulk
//! transfers, each with the timeout the corresponding operation
//! tolerates (attribute changes are fast, cuts and feeds move hardware).

use byteorder::{LittleEndian, WriteBytesExt};
use encoding::all::ISO_8859_1;
use encoding::{EncoderTrap, Encoding};

use crate::error::{Error, Result};

/// ESC @ - initialize printer, reset print mode.
pub const INIT: [u8; 2] = [0x1b, 0x40];
/// GS V A - full cut.
pub const CUT_FULL: [u8; 4] = [0x1d, 0x56, 0x41, 0x10];
/// GS V B - partial cut.
pub const CUT_PARTIAL: [u8; 4] = [0x1d, 0x56, 0x42, 0x00];
/// ESC E - emphasis on/off.
pub const BOLD_ON: [u8; 3] = [0x1b, 0x45, 0x01];
pub const BOLD_OFF: [u8; 3] = [0x1b, 0x45, 0x00];
/// ESC a - justification.
pub const ALIGN_LEFT: [u8; 3] = [0x1b, 0x61, 0x00];
pub const ALIGN_CENTER: [u8; 3] = [0x1b, 0x61, 0x01];
pub const ALIGN_RIGHT: [u8; 3] = [0x1b, 0x61, 0x02];
/// ESC ! - double width+height, and back to normal.
pub const SIZE_DOUBLE: [u8; 3] = [0x1b, 0x21, 0x30];
pub const SIZE_NORMAL: [u8; 3] = [0x1b, 0x21, 0x00];
/// ESC p - drawer kick pulse on pin 2.
pub const DRAWER_KICK: [u8; 5] = [0x1b, 0x70, 0x00, 0x19, 0xfa];

/// Per-transfer timeouts, in milliseconds.
pub const ATTR_TIMEOUT_MS: u32 = 1_000;
pub const TEXT_TIMEOUT_MS: u32 = 5_000;
pub const MECH_TIMEOUT_MS: u32 = 3_000;
pub const RAW_TIMEOUT_MS: u32 = 10_000;
pub const INIT_TIMEOUT_MS: u32 = 3_000;

/// Default feed when the caller does not specify one.
pub const DEFAULT_FEED_LINES: u8 = 3;
/// Default CODE128 bar height in dots.
pub const DEFAULT_BARCODE_HEIGHT: u8 = 80;
/// Default QR module size in dots.
pub const DEFAULT_QR_MODULE_SIZE: u8 = 6;

/// One encoded transfer: opaque bytes plus the timeout to send them with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrintCommand {
    pub bytes: Vec<u8>,
    pub timeout_ms: u32,
}

impl PrintCommand {
    pub fn new(bytes: impl Into<Vec<u8>>, timeout_ms: u32) -> Self {
        PrintCommand {
            bytes: bytes.into(),
            timeout_ms,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

impl Align {
    pub fn bytes(self) -> [u8; 3] {
        match self {
            Align::Left => ALIGN_LEFT,
            Align::Center => ALIGN_CENTER,
            Align::Right => ALIGN_RIGHT,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextSize {
    #[default]
    Normal,
    Double,
}

impl TextSize {
    pub fn bytes(self) -> [u8; 3] {
        match self {
            TextSize::Normal => SIZE_NORMAL,
            TextSize::Double => SIZE_DOUBLE,
        }
    }
}

/// Styling for a formatted text line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextStyle {
    pub bold: bool,
    pub align: Align,
    pub size: TextSize,
}

/// Latin-1 encode, replacing anything the code page cannot express.
pub fn encode_text(text: &str) -> Result<Vec<u8>> {
    ISO_8859_1
        .encode(text, EncoderTrap::Replace)
        .map_err(|err| Error::Encoding(err.to_string()))
}

/// A newline-terminated text line in the printer code page.
pub fn text_line(text: &str) -> Result<Vec<u8>> {
    let mut bytes = encode_text(text)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// ESC d n - print and feed n lines.
pub fn feed(lines: u8) -> [u8; 3] {
    [0x1b, 0x64, lines]
}

/// A formatted line as the sequence of transfers to send, in order.
///
/// Composition is attribute set / text / attribute reset; `text_index`
/// marks the transfer whose outcome the caller reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormattedJob {
    pub commands: Vec<PrintCommand>,
    pub text_index: usize,
}

/// Compose a styled line: align, size, bold on (when asked), the text,
/// then undo bold, size and alignment so the next job starts clean.
pub fn formatted(text: &str, style: TextStyle) -> Result<FormattedJob> {
    let mut commands = Vec::with_capacity(7);
    commands.push(PrintCommand::new(style.align.bytes(), ATTR_TIMEOUT_MS));
    commands.push(PrintCommand::new(style.size.bytes(), ATTR_TIMEOUT_MS));
    if style.bold {
        commands.push(PrintCommand::new(BOLD_ON, ATTR_TIMEOUT_MS));
    }
    let text_index = commands.len();
    commands.push(PrintCommand::new(text_line(text)?, TEXT_TIMEOUT_MS));
    if style.bold {
        commands.push(PrintCommand::new(BOLD_OFF, ATTR_TIMEOUT_MS));
    }
    commands.push(PrintCommand::new(SIZE_NORMAL, ATTR_TIMEOUT_MS));
    commands.push(PrintCommand::new(ALIGN_LEFT, ATTR_TIMEOUT_MS));
    Ok(FormattedJob {
        commands,
        text_index,
    })
}

/// CODE128 barcode: height and width attribute frames, then the
/// GS k print frame with a one-byte length prefix (so data past 255
/// bytes is truncated).
pub fn barcode_code128(data: &str, height: u8) -> Result<Vec<PrintCommand>> {
    let mut payload = encode_text(data)?;
    payload.truncate(255);

    let mut print = Vec::with_capacity(4 + payload.len());
    print.extend_from_slice(&[0x1d, 0x6b, 0x49, payload.len() as u8]);
    print.extend_from_slice(&payload);

    Ok(vec![
        PrintCommand::new([0x1d, 0x68, height], ATTR_TIMEOUT_MS),
        PrintCommand::new([0x1d, 0x77, 0x02], ATTR_TIMEOUT_MS),
        PrintCommand::new(print, TEXT_TIMEOUT_MS),
    ])
}

/// QR code as the chained GS ( k frames: select model 2, module size,
/// error correction, store data, print.
pub fn qr_code(data: &str, module_size: u8) -> Result<Vec<PrintCommand>> {
    let payload = encode_text(data)?;
    let module_size = module_size.clamp(1, 16);

    let mut store = Vec::with_capacity(8 + payload.len());
    store.extend_from_slice(&[0x1d, 0x28, 0x6b]);
    // Store-data count covers the three function bytes plus the payload.
    store.write_u16::<LittleEndian>((payload.len() + 3) as u16)?;
    store.extend_from_slice(&[0x31, 0x50, 0x30]);
    store.extend_from_slice(&payload);

    Ok(vec![
        PrintCommand::new(
            [0x1d, 0x28, 0x6b, 0x04, 0x00, 0x31, 0x41, 0x32, 0x00],
            ATTR_TIMEOUT_MS,
        ),
        PrintCommand::new(
            [0x1d, 0x28, 0x6b, 0x03, 0x00, 0x31, 0x43, module_size],
            ATTR_TIMEOUT_MS,
        ),
        PrintCommand::new(
            [0x1d, 0x28, 0x6b, 0x03, 0x00, 0x31, 0x45, 0x31],
            ATTR_TIMEOUT_MS,
        ),
        PrintCommand::new(store, MECH_TIMEOUT_MS),
        PrintCommand::new(
            [0x1d, 0x28, 0x6b, 0x03, 0x00, 0x31, 0x51, 0x30],
            MECH_TIMEOUT_MS,
        ),
    ])
}

/// Self-test page: centered bold header, connection details, footer, cut.
pub fn test_page(model: &str, vendor_id: u16, product_id: u16) -> Result<Vec<PrintCommand>> {
    let info = format!(
        "Printer: {}\nVID: 0x{:04x}\nPID: 0x{:04x}\nStatus: CONNECTED\n",
        model, vendor_id, product_id
    );
    Ok(vec![
        PrintCommand::new(INIT, ATTR_TIMEOUT_MS),
        PrintCommand::new(ALIGN_CENTER, ATTR_TIMEOUT_MS),
        PrintCommand::new(BOLD_ON, ATTR_TIMEOUT_MS),
        PrintCommand::new(text_line("=== PRINTER TEST ===")?, MECH_TIMEOUT_MS),
        PrintCommand::new(BOLD_OFF, ATTR_TIMEOUT_MS),
        PrintCommand::new(ALIGN_LEFT, ATTR_TIMEOUT_MS),
        PrintCommand::new(encode_text(&info)?, MECH_TIMEOUT_MS),
        PrintCommand::new(ALIGN_CENTER, ATTR_TIMEOUT_MS),
        PrintCommand::new(text_line("\n====================\n\n")?, MECH_TIMEOUT_MS),
        PrintCommand::new(CUT_FULL, MECH_TIMEOUT_MS),
    ])
}
