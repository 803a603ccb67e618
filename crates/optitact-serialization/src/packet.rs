//! Frame packet layout.
//!
//! One packet per completed frame per sink. Global header (version, field
//! count, reserved byte), then each configured field in declared order:
//! a one-byte [`WireType`] tag followed by the payload. Matrices carry their
//! dimensions; everything is little-endian.

use byteorder::{ByteOrder, LittleEndian};
use ndarray::Array2;
use optitact_structures::{FieldStore, OptitactDataError};

use crate::WireType;

pub const CURRENT_SUPPORTED_VERSION: u8 = 1;
pub const GLOBAL_HEADER_BYTE_COUNT: usize = 4; // 1 u8 version, 1 u16 field count, 1 u8 reserved

/// A decoded wire field, produced by the conformance reader.
#[derive(Debug, Clone, PartialEq)]
pub enum WireField {
    Mat(Array2<f64>),
    F64(f64),
}

/// Serializes the named fields of a completed store in declared order.
///
/// A `mat` entry accepts a Matrix field; an `f64` entry accepts a Scalar.
/// Any missing field or variant mismatch is an error - the schema is fixed
/// at configuration time and a silent partial packet would desynchronize
/// the remote reader.
pub fn encode_packet(store: &FieldStore, fields: &[(String, WireType)]) -> Result<Vec<u8>, OptitactDataError> {
    if fields.len() > u16::MAX as usize {
        return Err(OptitactDataError::SerializationError(format!(
            "Cannot encode {} fields in one packet!", fields.len()
        )));
    }

    let mut bytes: Vec<u8> = Vec::with_capacity(GLOBAL_HEADER_BYTE_COUNT + fields.len() * 16);
    bytes.push(CURRENT_SUPPORTED_VERSION);
    let mut count = [0u8; 2];
    LittleEndian::write_u16(&mut count, fields.len() as u16);
    bytes.extend_from_slice(&count);
    bytes.push(0); // reserved

    for (name, wire_type) in fields {
        match wire_type {
            WireType::Mat => {
                let matrix = store.get_matrix(name).map_err(|e| {
                    OptitactDataError::SerializationError(format!("Field '{}': {}", name, e))
                })?;
                write_matrix(&mut bytes, matrix)?;
            }
            WireType::F64 => {
                let value = store.get_scalar(name).map_err(|e| {
                    OptitactDataError::SerializationError(format!("Field '{}': {}", name, e))
                })?;
                bytes.push(WireType::F64.as_byte());
                let mut buf = [0u8; 8];
                LittleEndian::write_f64(&mut buf, value);
                bytes.extend_from_slice(&buf);
            }
        }
    }
    Ok(bytes)
}

fn write_matrix(bytes: &mut Vec<u8>, matrix: &Array2<f64>) -> Result<(), OptitactDataError> {
    if matrix.nrows() > u32::MAX as usize || matrix.ncols() > u32::MAX as usize {
        return Err(OptitactDataError::SerializationError("Matrix dimensions exceed u32!".into()));
    }
    bytes.push(WireType::Mat.as_byte());
    let mut dims = [0u8; 8];
    LittleEndian::write_u32(&mut dims[0..4], matrix.nrows() as u32);
    LittleEndian::write_u32(&mut dims[4..8], matrix.ncols() as u32);
    bytes.extend_from_slice(&dims);
    let mut buf = [0u8; 8];
    for value in matrix.iter() {
        // ndarray default layout iterates row-major
        LittleEndian::write_f64(&mut buf, *value);
        bytes.extend_from_slice(&buf);
    }
    Ok(())
}

/// Decodes one packet back into its fields, in wire order.
///
/// This is the conforming reader used by consumers and by round-trip tests;
/// it never trusts a length without bounds-checking it first.
pub fn decode_packet(bytes: &[u8]) -> Result<Vec<WireField>, OptitactDataError> {
    if bytes.len() < GLOBAL_HEADER_BYTE_COUNT {
        return Err(OptitactDataError::DeserializationError(
            "Packet shorter than the global header!".into(),
        ));
    }
    if bytes[0] != CURRENT_SUPPORTED_VERSION {
        return Err(OptitactDataError::DeserializationError(format!(
            "Packet is version {} but this reader only supports version {}!",
            bytes[0], CURRENT_SUPPORTED_VERSION
        )));
    }
    let field_count = LittleEndian::read_u16(&bytes[1..3]) as usize;

    let mut fields = Vec::with_capacity(field_count);
    let mut cursor = GLOBAL_HEADER_BYTE_COUNT;
    for field_index in 0..field_count {
        if cursor >= bytes.len() {
            return Err(OptitactDataError::DeserializationError(format!(
                "Packet truncated before field {}!", field_index
            )));
        }
        let wire_type = WireType::try_from(bytes[cursor])?;
        cursor += 1;
        match wire_type {
            WireType::Mat => {
                if cursor + 8 > bytes.len() {
                    return Err(OptitactDataError::DeserializationError(format!(
                        "Packet truncated inside the dimensions of field {}!", field_index
                    )));
                }
                let rows = LittleEndian::read_u32(&bytes[cursor..cursor + 4]) as usize;
                let cols = LittleEndian::read_u32(&bytes[cursor + 4..cursor + 8]) as usize;
                cursor += 8;
                let payload_len = rows
                    .checked_mul(cols)
                    .and_then(|cells| cells.checked_mul(8))
                    .ok_or_else(|| OptitactDataError::DeserializationError(
                        "Matrix dimensions overflow!".into(),
                    ))?;
                if cursor + payload_len > bytes.len() {
                    return Err(OptitactDataError::DeserializationError(format!(
                        "Field {} declares a {}x{} matrix that runs past the packet end!",
                        field_index, rows, cols
                    )));
                }
                let mut values = Vec::with_capacity(rows * cols);
                for cell in 0..rows * cols {
                    let start = cursor + cell * 8;
                    values.push(LittleEndian::read_f64(&bytes[start..start + 8]));
                }
                cursor += payload_len;
                let matrix = Array2::from_shape_vec((rows, cols), values)
                    .map_err(|e| OptitactDataError::InternalError(e.to_string()))?;
                fields.push(WireField::Mat(matrix));
            }
            WireType::F64 => {
                if cursor + 8 > bytes.len() {
                    return Err(OptitactDataError::DeserializationError(format!(
                        "Packet truncated inside scalar field {}!", field_index
                    )));
                }
                fields.push(WireField::F64(LittleEndian::read_f64(&bytes[cursor..cursor + 8])));
                cursor += 8;
            }
        }
    }
    if cursor != bytes.len() {
        return Err(OptitactDataError::DeserializationError(format!(
            "Packet has {} trailing bytes after the declared fields!",
            bytes.len() - cursor
        )));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use optitact_structures::FieldValue;

    fn example_store() -> FieldStore {
        let mut store = FieldStore::new();
        store.insert("resultant_force", FieldValue::Matrix(array![[0.25, -1.5, 3.75]]));
        store.insert("initialize_progress", 1.0);
        store
    }

    #[test]
    fn round_trip_reproduces_values() {
        let store = example_store();
        let schema = vec![
            ("resultant_force".to_string(), WireType::Mat),
            ("initialize_progress".to_string(), WireType::F64),
        ];
        let bytes = encode_packet(&store, &schema).unwrap();
        let fields = decode_packet(&bytes).unwrap();
        assert_eq!(fields.len(), 2);
        match &fields[0] {
            WireField::Mat(m) => {
                assert_eq!(m, store.get_matrix("resultant_force").unwrap());
            }
            other => panic!("expected matrix, got {:?}", other),
        }
        assert_eq!(fields[1], WireField::F64(1.0));
    }

    #[test]
    fn missing_field_is_an_error() {
        let store = example_store();
        let schema = vec![("marker_forces".to_string(), WireType::Mat)];
        assert!(encode_packet(&store, &schema).is_err());
    }

    #[test]
    fn variant_mismatch_is_an_error() {
        let store = example_store();
        let schema = vec![("initialize_progress".to_string(), WireType::Mat)];
        assert!(encode_packet(&store, &schema).is_err());
    }

    #[test]
    fn truncated_packet_is_rejected() {
        let store = example_store();
        let schema = vec![("resultant_force".to_string(), WireType::Mat)];
        let bytes = encode_packet(&store, &schema).unwrap();
        assert!(decode_packet(&bytes[..bytes.len() - 1]).is_err());
        assert!(decode_packet(&bytes[..2]).is_err());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let store = example_store();
        let schema = vec![("initialize_progress".to_string(), WireType::F64)];
        let mut bytes = encode_packet(&store, &schema).unwrap();
        bytes[0] = 9;
        assert!(decode_packet(&bytes).is_err());
    }
}
