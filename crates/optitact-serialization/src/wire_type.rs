use optitact_structures::OptitactDataError;

/// Field encodings supported on the wire. The schema is fixed at
/// configuration time and must match on both ends; nothing in-band
/// describes it beyond this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    /// Dimensions followed by a row-major f64 payload
    Mat = 1,
    /// A single 8-byte float
    F64 = 2,
}

impl WireType {
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for WireType {
    type Error = OptitactDataError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(WireType::Mat),
            2 => Ok(WireType::F64),
            other => Err(OptitactDataError::DeserializationError(format!(
                "Unknown wire type tag {}!", other
            ))),
        }
    }
}

impl std::str::FromStr for WireType {
    type Err = OptitactDataError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "mat" => Ok(WireType::Mat),
            "f64" => Ok(WireType::F64),
            other => Err(OptitactDataError::BadParameters(format!(
                "Unknown wire type '{}', expected 'mat' or 'f64'!", other
            ))),
        }
    }
}
