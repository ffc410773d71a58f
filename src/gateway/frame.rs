//! Edge-bridge frame codec
//!
//! Pure translation between logical lamp/device operations and the short
//! ASCII frames the edge bridge forwards over radio. Frame grammar, keyed by
//! length and the second byte:
//!
//! - 2 bytes `<D><c>`: lamp control (`b d f h j l n p r` ON, `a c e g i k m o q`
//!   OFF, positions 1-9), or device-wide `*` (all on) / `!` (all off)
//! - 3 bytes `<D>R<n>`: route preset 0-9
//! - 3 bytes `<D><c>#`: lamp control with the flash marker
//! - 5 bytes `<D>M<hhh>`: 9-bit per-lamp mask, uppercase hex `000`-`1FF`
//!
//! `<D>` is the device letter `A`-`N`. No I/O lives here.

use std::fmt;
use thiserror::Error;

/// ON characters indexed by lamp position - 1.
const ON_CHARS: [u8; 9] = [b'b', b'd', b'f', b'h', b'j', b'l', b'n', b'p', b'r'];

/// OFF characters indexed by lamp position - 1.
const OFF_CHARS: [u8; 9] = [b'a', b'c', b'e', b'g', b'i', b'k', b'm', b'o', b'q'];

/// Number of field devices (`A`-`N`).
pub const DEVICE_COUNT: usize = 14;

/// Lamps per field device.
pub const LAMPS_PER_DEVICE: u8 = 9;

/// Total lamp actuators across the installation.
pub const LAMP_COUNT: u8 = 126;

/// Maximum 9-bit mask value.
const MASK_MAX: u16 = 0x1FF;

/// Codec validation errors. These never reach the transport; they are
/// reported to the immediate caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid device letter: {0:?} (expected A-N)")]
    InvalidDevice(char),

    #[error("invalid lamp id: {0} (expected 1-126)")]
    InvalidLamp(u16),

    #[error("invalid lamp position: {0} (expected 1-9)")]
    InvalidPosition(u8),

    #[error("invalid route preset: {0} (expected 0-9)")]
    InvalidRoute(u8),

    #[error("invalid mask: {0:?} (expected 3 hex chars, 000-1FF)")]
    InvalidMask(String),
}

/// One of the 14 field devices, addressed by its leading frame byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Device(u8);

impl Device {
    pub fn new(letter: char) -> Result<Self, FrameError> {
        let upper = letter.to_ascii_uppercase();
        if upper.is_ascii_uppercase() && upper <= 'N' {
            Ok(Device(upper as u8))
        } else {
            Err(FrameError::InvalidDevice(letter))
        }
    }

    /// All devices `A`-`N`, in address order.
    pub fn all() -> impl Iterator<Item = Device> {
        (b'A'..=b'N').map(Device)
    }

    pub fn letter(self) -> char {
        self.0 as char
    }

    fn byte(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Global lamp identifier, `1..=126`.
///
/// The id fixes both the device letter and the position within the device:
/// lamps 1-9 sit on device A, 10-18 on device B, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LampId(u8);

impl LampId {
    pub fn new(id: u16) -> Result<Self, FrameError> {
        if (1..=LAMP_COUNT as u16).contains(&id) {
            Ok(LampId(id as u8))
        } else {
            Err(FrameError::InvalidLamp(id))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Build a lamp id from a device letter and a position within it.
    pub fn from_parts(device: Device, position: u8) -> Result<Self, FrameError> {
        if !(1..=LAMPS_PER_DEVICE).contains(&position) {
            return Err(FrameError::InvalidPosition(position));
        }
        let device_index = device.byte() - b'A';
        Ok(LampId(device_index * LAMPS_PER_DEVICE + position))
    }

    pub fn device(self) -> Device {
        Device(b'A' + (self.0 - 1) / LAMPS_PER_DEVICE)
    }

    /// Position within the device, `1..=9`. Selects the ON/OFF character pair.
    pub fn position(self) -> u8 {
        (self.0 - 1) % LAMPS_PER_DEVICE + 1
    }
}

impl fmt::Display for LampId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated wire frame, at most 5 bytes, written to the socket in a
/// single indivisible write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; 5],
    len: u8,
}

impl Frame {
    fn from_slice(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 5];
        buf[..bytes.len()].copy_from_slice(bytes);
        Frame {
            bytes: buf,
            len: bytes.len() as u8,
        }
    }

    /// Single-lamp control frame, optionally carrying the flash marker.
    /// The flash marker is only meaningful on an ON command.
    pub fn lamp(lamp: LampId, on: bool, flash: bool) -> Self {
        let device = lamp.device().byte();
        let idx = (lamp.position() - 1) as usize;
        let cmd = if on { ON_CHARS[idx] } else { OFF_CHARS[idx] };
        if flash && on {
            Frame::from_slice(&[device, cmd, b'#'])
        } else {
            Frame::from_slice(&[device, cmd])
        }
    }

    /// Device-wide all-on (`*`) or all-off (`!`) frame.
    pub fn device_all(device: Device, on: bool) -> Self {
        let cmd = if on { b'*' } else { b'!' };
        Frame::from_slice(&[device.byte(), cmd])
    }

    /// Route preset frame `<D>R<n>`, `n` in `0..=9`.
    pub fn route(device: Device, route: u8) -> Result<Self, FrameError> {
        if route > 9 {
            return Err(FrameError::InvalidRoute(route));
        }
        Ok(Frame::from_slice(&[device.byte(), b'R', b'0' + route]))
    }

    /// Mask frame `<D>M<hhh>` from a 3-character hex string `000..=1FF`.
    /// The hex digits are normalized to uppercase.
    pub fn mask(device: Device, mask: &str) -> Result<Self, FrameError> {
        if mask.len() != 3 || !mask.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(FrameError::InvalidMask(mask.to_string()));
        }
        let value = u16::from_str_radix(mask, 16)
            .map_err(|_| FrameError::InvalidMask(mask.to_string()))?;
        if value > MASK_MAX {
            return Err(FrameError::InvalidMask(mask.to_string()));
        }
        let upper = mask.to_ascii_uppercase();
        let hex = upper.as_bytes();
        Ok(Frame::from_slice(&[device.byte(), b'M', hex[0], hex[1], hex[2]]))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Device letter the frame addresses (its leading byte).
    pub fn device_letter(&self) -> char {
        self.bytes[0] as char
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Frames are ASCII by construction.
        f.write_str(std::str::from_utf8(self.as_bytes()).unwrap_or("<invalid>"))
    }
}

/// Validate raw bytes against the frame grammar.
///
/// Rejects everything the bridge would not parse: wrong lengths, device
/// letters outside `A`-`N`, 3-byte frames whose second byte is neither `R`
/// nor a lamp character followed by `#`, non-hex or out-of-range masks.
pub fn is_valid_frame(bytes: &[u8]) -> bool {
    let Some(&device) = bytes.first() else {
        return false;
    };
    if !(b'A'..=b'N').contains(&device) {
        return false;
    }

    let is_lamp_char = |b: u8| (b'a'..=b'r').contains(&b);

    match bytes.len() {
        2 => is_lamp_char(bytes[1]) || bytes[1] == b'*' || bytes[1] == b'!',
        3 => {
            (bytes[1] == b'R' && bytes[2].is_ascii_digit())
                || (bytes[2] == b'#' && is_lamp_char(bytes[1]))
        }
        5 => {
            if bytes[1] != b'M' {
                return false;
            }
            let Ok(hex) = std::str::from_utf8(&bytes[2..5]) else {
                return false;
            };
            matches!(u16::from_str_radix(hex, 16), Ok(v) if v <= MASK_MAX)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lamp_id_maps_to_device_and_position() {
        let lamp = LampId::new(1).unwrap();
        assert_eq!(lamp.device().letter(), 'A');
        assert_eq!(lamp.position(), 1);

        let lamp = LampId::new(97).unwrap();
        assert_eq!(lamp.device().letter(), 'K');
        assert_eq!(lamp.position(), 7);

        let lamp = LampId::new(126).unwrap();
        assert_eq!(lamp.device().letter(), 'N');
        assert_eq!(lamp.position(), 9);

        assert!(LampId::new(0).is_err());
        assert!(LampId::new(127).is_err());
    }

    #[test]
    fn from_parts_inverts_device_and_position() {
        for id in 1..=126u16 {
            let lamp = LampId::new(id).unwrap();
            let rebuilt = LampId::from_parts(lamp.device(), lamp.position()).unwrap();
            assert_eq!(rebuilt, lamp);
        }
        let device = Device::new('A').unwrap();
        assert!(LampId::from_parts(device, 0).is_err());
        assert!(LampId::from_parts(device, 10).is_err());
    }

    #[test]
    fn lamp_frames_use_the_position_character_pair() {
        let on = Frame::lamp(LampId::new(1).unwrap(), true, false);
        assert_eq!(on.as_bytes(), b"Ab");
        let off = Frame::lamp(LampId::new(1).unwrap(), false, false);
        assert_eq!(off.as_bytes(), b"Aa");

        // Lamp 97: device K, position 7 -> 'n'
        let flashing = Frame::lamp(LampId::new(97).unwrap(), true, true);
        assert_eq!(flashing.as_bytes(), b"Kn#");

        // Flash is meaningless on OFF; the marker is dropped.
        let off_flash = Frame::lamp(LampId::new(97).unwrap(), false, true);
        assert_eq!(off_flash.as_bytes(), b"Km");
    }

    #[test]
    fn device_wide_frames() {
        let dev = Device::new('C').unwrap();
        assert_eq!(Frame::device_all(dev, true).as_bytes(), b"C*");
        assert_eq!(Frame::device_all(dev, false).as_bytes(), b"C!");
    }

    #[test]
    fn route_frames_accept_0_through_9() {
        let dev = Device::new('A').unwrap();
        assert_eq!(Frame::route(dev, 0).unwrap().as_bytes(), b"AR0");
        assert_eq!(Frame::route(dev, 9).unwrap().as_bytes(), b"AR9");
        assert_eq!(Frame::route(dev, 10), Err(FrameError::InvalidRoute(10)));
    }

    #[test]
    fn mask_frames_validate_the_nine_bit_range() {
        let dev = Device::new('A').unwrap();
        assert_eq!(Frame::mask(dev, "1FF").unwrap().as_bytes(), b"AM1FF");
        assert_eq!(Frame::mask(dev, "1ff").unwrap().as_bytes(), b"AM1FF");
        assert_eq!(Frame::mask(dev, "000").unwrap().as_bytes(), b"AM000");
        assert!(Frame::mask(dev, "200").is_err());
        assert!(Frame::mask(dev, "1GF").is_err());
        assert!(Frame::mask(dev, "FF").is_err());
        assert!(Frame::mask(dev, "01FF").is_err());
    }

    #[test]
    fn device_letters_outside_a_to_n_are_rejected() {
        assert!(Device::new('O').is_err());
        assert!(Device::new('Z').is_err());
        assert!(Device::new('1').is_err());
        assert_eq!(Device::new('n').unwrap().letter(), 'N');
        assert_eq!(Device::all().count(), DEVICE_COUNT);
    }

    #[test]
    fn frame_validator_matches_the_grammar() {
        assert!(is_valid_frame(b"Ab"));
        assert!(is_valid_frame(b"N!"));
        assert!(is_valid_frame(b"A*"));
        assert!(is_valid_frame(b"AR5"));
        assert!(is_valid_frame(b"Ab#"));
        assert!(is_valid_frame(b"AM1FF"));

        assert!(!is_valid_frame(b""));
        assert!(!is_valid_frame(b"A"));
        assert!(!is_valid_frame(b"Ob"));
        assert!(!is_valid_frame(b"Zb"));
        assert!(!is_valid_frame(b"AX1"));
        assert!(!is_valid_frame(b"Ab!"));
        assert!(!is_valid_frame(b"AM200"));
        assert!(!is_valid_frame(b"AMGGG"));
        assert!(!is_valid_frame(b"Abcd"));
        assert!(!is_valid_frame(b"AM1FF0"));
    }

    #[test]
    fn frames_render_as_ascii() {
        // Lamp 42: device E, position 6 -> 'l'
        let frame = Frame::lamp(LampId::new(42).unwrap(), true, false);
        assert_eq!(frame.to_string(), "El");
        assert_eq!(frame.device_letter(), 'E');
    }
}
