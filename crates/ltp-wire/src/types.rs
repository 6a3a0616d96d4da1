//! Protocol enumerations shared by both channels.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Pixel color format carried in the data channel frame header.
///
/// The wire value is a single byte; [`ColorFormat::bytes_per_pixel`] gives
/// the payload stride for RAW and RLE payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFormat {
    Rgb,
    Rgbw,
    Hsv,
    Grayscale,
}

impl ColorFormat {
    /// Convert from the wire byte. Returns `None` for unknown values.
    pub fn from_wire(val: u8) -> Option<Self> {
        match val {
            0x01 => Some(ColorFormat::Rgb),
            0x02 => Some(ColorFormat::Rgbw),
            0x03 => Some(ColorFormat::Hsv),
            0x04 => Some(ColorFormat::Grayscale),
            _ => None,
        }
    }

    /// Convert to the wire byte.
    pub fn as_wire(self) -> u8 {
        match self {
            ColorFormat::Rgb => 0x01,
            ColorFormat::Rgbw => 0x02,
            ColorFormat::Hsv => 0x03,
            ColorFormat::Grayscale => 0x04,
        }
    }

    /// Payload bytes per pixel for this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorFormat::Rgb | ColorFormat::Hsv => 3,
            ColorFormat::Rgbw => 4,
            ColorFormat::Grayscale => 1,
        }
    }

    /// Parse the lowercase name used in TXT records and JSON messages.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rgb" => Some(ColorFormat::Rgb),
            "rgbw" => Some(ColorFormat::Rgbw),
            "hsv" => Some(ColorFormat::Hsv),
            "grayscale" => Some(ColorFormat::Grayscale),
            _ => None,
        }
    }

    /// Lowercase name used in TXT records and JSON messages.
    pub fn name(self) -> &'static str {
        match self {
            ColorFormat::Rgb => "rgb",
            ColorFormat::Rgbw => "rgbw",
            ColorFormat::Hsv => "hsv",
            ColorFormat::Grayscale => "grayscale",
        }
    }
}

impl fmt::Display for ColorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload encoding carried in the data channel frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Pixels as-is, `pixel_count * bpp` bytes.
    Raw,
    /// Run-length encoded `{count: u8, color: bpp bytes}` runs.
    Rle,
    /// Reserved. Never produced; decoding it is an error.
    Delta,
}

impl Encoding {
    pub fn from_wire(val: u8) -> Option<Self> {
        match val {
            0x00 => Some(Encoding::Raw),
            0x01 => Some(Encoding::Rle),
            0x02 => Some(Encoding::Delta),
            _ => None,
        }
    }

    pub fn as_wire(self) -> u8 {
        match self {
            Encoding::Raw => 0x00,
            Encoding::Rle => 0x01,
            Encoding::Delta => 0x02,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Encoding::Raw => "raw",
            Encoding::Rle => "rle",
            Encoding::Delta => "delta",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Protocol error codes, shared by `error` messages and validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ErrorCode {
    Ok,
    InvalidFormat,
    Busy,
    RateLimit,
    NotFound,
    Internal,
    InvalidValue,
    Readonly,
}

impl ErrorCode {
    /// Upper-case name used in the `error` field of error messages.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Ok => "OK",
            ErrorCode::InvalidFormat => "INVALID_FORMAT",
            ErrorCode::Busy => "BUSY",
            ErrorCode::RateLimit => "RATE_LIMIT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::InvalidValue => "INVALID_VALUE",
            ErrorCode::Readonly => "READONLY",
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> u8 {
        match code {
            ErrorCode::Ok => 0,
            ErrorCode::InvalidFormat => 1,
            ErrorCode::Busy => 2,
            ErrorCode::RateLimit => 3,
            ErrorCode::NotFound => 4,
            ErrorCode::Internal => 5,
            ErrorCode::InvalidValue => 6,
            ErrorCode::Readonly => 7,
        }
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = ProtocolError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(ErrorCode::Ok),
            1 => Ok(ErrorCode::InvalidFormat),
            2 => Ok(ErrorCode::Busy),
            3 => Ok(ErrorCode::RateLimit),
            4 => Ok(ErrorCode::NotFound),
            5 => Ok(ErrorCode::Internal),
            6 => Ok(ErrorCode::InvalidValue),
            7 => Ok(ErrorCode::Readonly),
            _ => Err(ProtocolError::new(
                ErrorCode::InvalidFormat,
                format!("unknown error code: {val}"),
            )),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stream control actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamAction {
    Start,
    Stop,
    Pause,
}

/// Data source output modes, advertised in the `mode` TXT record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Stream,
    Static,
    Interactive,
}

impl SourceMode {
    pub fn name(self) -> &'static str {
        match self {
            SourceMode::Stream => "stream",
            SourceMode::Static => "static",
            SourceMode::Interactive => "interactive",
        }
    }
}

/// Scaling modes for route transforms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    None,
    #[default]
    Fit,
    Fill,
    Stretch,
    /// Pad a shorter source with black pixels.
    PadBlack,
    /// Tile the source pattern to fill the sink.
    PadRepeat,
    /// Truncate a longer source to fit the sink.
    Truncate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_format_wire_roundtrip() {
        for fmt in [
            ColorFormat::Rgb,
            ColorFormat::Rgbw,
            ColorFormat::Hsv,
            ColorFormat::Grayscale,
        ] {
            assert_eq!(ColorFormat::from_wire(fmt.as_wire()), Some(fmt));
        }
        assert_eq!(ColorFormat::from_wire(0x00), None);
        assert_eq!(ColorFormat::from_wire(0x05), None);
    }

    #[test]
    fn color_format_strides() {
        assert_eq!(ColorFormat::Rgb.bytes_per_pixel(), 3);
        assert_eq!(ColorFormat::Rgbw.bytes_per_pixel(), 4);
        assert_eq!(ColorFormat::Hsv.bytes_per_pixel(), 3);
        assert_eq!(ColorFormat::Grayscale.bytes_per_pixel(), 1);
    }

    #[test]
    fn color_format_names() {
        assert_eq!(ColorFormat::from_name("rgbw"), Some(ColorFormat::Rgbw));
        assert_eq!(ColorFormat::from_name("cmyk"), None);
        assert_eq!(ColorFormat::Rgb.name(), "rgb");
    }

    #[test]
    fn encoding_wire_roundtrip() {
        for enc in [Encoding::Raw, Encoding::Rle, Encoding::Delta] {
            assert_eq!(Encoding::from_wire(enc.as_wire()), Some(enc));
        }
        assert_eq!(Encoding::from_wire(0x03), None);
    }

    #[test]
    fn error_code_values_match_protocol() {
        assert_eq!(u8::from(ErrorCode::Ok), 0);
        assert_eq!(u8::from(ErrorCode::InvalidFormat), 1);
        assert_eq!(u8::from(ErrorCode::Busy), 2);
        assert_eq!(u8::from(ErrorCode::RateLimit), 3);
        assert_eq!(u8::from(ErrorCode::NotFound), 4);
        assert_eq!(u8::from(ErrorCode::Internal), 5);
        assert_eq!(u8::from(ErrorCode::InvalidValue), 6);
        assert_eq!(u8::from(ErrorCode::Readonly), 7);
    }

    #[test]
    fn error_code_json_is_numeric() {
        let json = serde_json::to_string(&ErrorCode::InvalidValue).unwrap();
        assert_eq!(json, "6");
        let back: ErrorCode = serde_json::from_str("6").unwrap();
        assert_eq!(back, ErrorCode::InvalidValue);
        assert!(serde_json::from_str::<ErrorCode>("42").is_err());
    }

    #[test]
    fn stream_action_json_names() {
        assert_eq!(
            serde_json::to_string(&StreamAction::Start).unwrap(),
            "\"start\""
        );
        let action: StreamAction = serde_json::from_str("\"pause\"").unwrap();
        assert_eq!(action, StreamAction::Pause);
    }

    #[test]
    fn scale_mode_json_names() {
        assert_eq!(
            serde_json::to_string(&ScaleMode::PadBlack).unwrap(),
            "\"pad_black\""
        );
        let mode: ScaleMode = serde_json::from_str("\"fit\"").unwrap();
        assert_eq!(mode, ScaleMode::Fit);
    }
}
