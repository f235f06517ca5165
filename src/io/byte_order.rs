//! Byte order (endianness) handling
//!
//! Encodes and decodes raster samples of every [`DataType`] in either byte
//! order, as stored by flat binary raster files.

use serde::{Deserialize, Serialize};

use crate::types::DataType;

/// Represents the byte order (endianness) of binary data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    /// Little-endian byte order (least significant byte first)
    #[default]
    LittleEndian,
    /// Big-endian byte order (most significant byte first)
    BigEndian,
}

macro_rules! decode_as {
    ($ty:ty, $order:expr, $bytes:expr) => {{
        let mut buf = [0u8; std::mem::size_of::<$ty>()];
        buf.copy_from_slice($bytes);
        match $order {
            ByteOrder::LittleEndian => <$ty>::from_le_bytes(buf) as f64,
            ByteOrder::BigEndian => <$ty>::from_be_bytes(buf) as f64,
        }
    }};
}

macro_rules! encode_as {
    ($ty:ty, $order:expr, $value:expr, $out:expr) => {{
        let value = $value as $ty;
        let bytes = match $order {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        $out.copy_from_slice(&bytes);
    }};
}

impl ByteOrder {
    /// Byte order of the running machine
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        }
    }

    /// Decodes one sample. `bytes` must be exactly `data_type.size()` long.
    pub fn decode(&self, data_type: DataType, bytes: &[u8]) -> f64 {
        match data_type {
            DataType::U8 => bytes[0] as f64,
            DataType::I8 => bytes[0] as i8 as f64,
            DataType::U16 => decode_as!(u16, self, bytes),
            DataType::I16 => decode_as!(i16, self, bytes),
            DataType::U32 => decode_as!(u32, self, bytes),
            DataType::I32 => decode_as!(i32, self, bytes),
            DataType::F32 => decode_as!(f32, self, bytes),
            DataType::F64 => decode_as!(f64, self, bytes),
        }
    }

    /// Encodes one sample, casting it to `data_type` first.
    /// `out` must be exactly `data_type.size()` long.
    pub fn encode(&self, data_type: DataType, value: f64, out: &mut [u8]) {
        match data_type {
            DataType::U8 => out[0] = value as u8,
            DataType::I8 => out[0] = value as i8 as u8,
            DataType::U16 => encode_as!(u16, self, value, out),
            DataType::I16 => encode_as!(i16, self, value, out),
            DataType::U32 => encode_as!(u32, self, value, out),
            DataType::I32 => encode_as!(i32, self, value, out),
            DataType::F32 => encode_as!(f32, self, value, out),
            DataType::F64 => encode_as!(f64, self, value, out),
        }
    }

    /// Decodes a run of samples
    pub fn decode_slice(&self, data_type: DataType, bytes: &[u8], out: &mut [f64]) {
        for (chunk, value) in bytes.chunks_exact(data_type.size()).zip(out.iter_mut()) {
            *value = self.decode(data_type, chunk);
        }
    }

    /// Encodes a run of samples
    pub fn encode_slice<I>(&self, data_type: DataType, values: I, out: &mut [u8])
    where
        I: IntoIterator<Item = f64>,
    {
        for (chunk, value) in out.chunks_exact_mut(data_type.size()).zip(values) {
            self.encode(data_type, value, chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u16_both_orders() {
        assert_eq!(ByteOrder::LittleEndian.decode(DataType::U16, &[0x34, 0x12]), 0x1234 as f64);
        assert_eq!(ByteOrder::BigEndian.decode(DataType::U16, &[0x12, 0x34]), 0x1234 as f64);
    }

    #[test]
    fn test_signed_values() {
        assert_eq!(ByteOrder::LittleEndian.decode(DataType::I8, &[0xFF]), -1.0);
        assert_eq!(ByteOrder::LittleEndian.decode(DataType::I16, &[0xFF, 0xFF]), -1.0);
        assert_eq!(ByteOrder::BigEndian.decode(DataType::I32, &[0xFF, 0xFF, 0xFF, 0xFE]), -2.0);
    }

    #[test]
    fn test_encode_casts_to_type() {
        let mut out = [0u8; 1];
        ByteOrder::LittleEndian.encode(DataType::U8, 4.9, &mut out);
        assert_eq!(out, [4]);
        ByteOrder::LittleEndian.encode(DataType::U8, 512.0, &mut out);
        assert_eq!(out, [255]);

        let mut out = [0u8; 2];
        ByteOrder::BigEndian.encode(DataType::I16, -2.0, &mut out);
        assert_eq!(out, [0xFF, 0xFE]);
    }

    #[test]
    fn test_float_slices() {
        let order = ByteOrder::BigEndian;
        let values = [1.5, -2.25, 1e10];
        let mut bytes = vec![0u8; values.len() * 8];
        order.encode_slice(DataType::F64, values.iter().copied(), &mut bytes);

        let mut decoded = [0.0; 3];
        order.decode_slice(DataType::F64, &bytes, &mut decoded);
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_native_matches_target() {
        let native = ByteOrder::native();
        let mut out = [0u8; 4];
        native.encode(DataType::U32, 7.0, &mut out);
        assert_eq!(out, 7u32.to_ne_bytes());
    }
}
