//! Core data types for rasterblock

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents pixel data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Unsigned 8-bit integer
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
    /// Signed 8-bit integer
    I8,
    /// Signed 16-bit integer
    I16,
    /// Signed 32-bit integer
    I32,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
}

impl DataType {
    /// Returns the size in bytes for this data type
    pub fn size(&self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }

    /// Returns the name of this data type
    pub fn name(&self) -> &'static str {
        match self {
            DataType::U8 => "U8",
            DataType::U16 => "U16",
            DataType::U32 => "U32",
            DataType::I8 => "I8",
            DataType::I16 => "I16",
            DataType::I32 => "I32",
            DataType::F32 => "F32",
            DataType::F64 => "F64",
        }
    }

    /// Parses a data type name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "U8" => Some(DataType::U8),
            "U16" => Some(DataType::U16),
            "U32" => Some(DataType::U32),
            "I8" => Some(DataType::I8),
            "I16" => Some(DataType::I16),
            "I32" => Some(DataType::I32),
            "F32" => Some(DataType::F32),
            "F64" => Some(DataType::F64),
            _ => None,
        }
    }

    /// Returns true for floating point types
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    /// Casts a value to this type and back to f64.
    ///
    /// Integer types truncate toward zero and saturate at their range; NaN
    /// becomes 0. Every backend stores samples through this function.
    pub fn quantize(&self, value: f64) -> f64 {
        match self {
            DataType::U8 => value as u8 as f64,
            DataType::U16 => value as u16 as f64,
            DataType::U32 => value as u32 as f64,
            DataType::I8 => value as i8 as f64,
            DataType::I16 => value as i16 as f64,
            DataType::I32 => value as i32 as f64,
            DataType::F32 => value as f32 as f64,
            DataType::F64 => value,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Represents image dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels
    pub width: usize,
    /// Height in pixels
    pub height: usize,
}

impl Dimensions {
    /// Creates new dimensions
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Returns the total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A rectangle of pixels, origin at the top-left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    /// Column of the left edge
    pub x: usize,
    /// Row of the top edge
    pub y: usize,
    /// Width in pixels
    pub width: usize,
    /// Height in pixels
    pub height: usize,
}

impl PixelRect {
    /// Creates a new rectangle
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Column one past the right edge
    pub fn x_end(&self) -> usize {
        self.x + self.width
    }

    /// Row one past the bottom edge
    pub fn y_end(&self) -> usize {
        self.y + self.height
    }

    /// Size of the rectangle
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Returns true if the rectangle lies inside an image of the given size
    pub fn fits_within(&self, size: Dimensions) -> bool {
        self.x_end() <= size.width && self.y_end() <= size.height
    }
}

impl fmt::Display for PixelRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}+{}, {}+{}]", self.x, self.width, self.y, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_size() {
        assert_eq!(DataType::U8.size(), 1);
        assert_eq!(DataType::U16.size(), 2);
        assert_eq!(DataType::U32.size(), 4);
        assert_eq!(DataType::F32.size(), 4);
        assert_eq!(DataType::F64.size(), 8);
    }

    #[test]
    fn test_data_type_name() {
        assert_eq!(DataType::U8.name(), "U8");
        assert_eq!(DataType::F32.name(), "F32");
        assert_eq!(DataType::from_name("i16"), Some(DataType::I16));
        assert_eq!(DataType::from_name("complex"), None);
    }

    #[test]
    fn test_quantize_truncates_and_saturates() {
        assert_eq!(DataType::U8.quantize(4.5), 4.0);
        assert_eq!(DataType::U8.quantize(300.0), 255.0);
        assert_eq!(DataType::U8.quantize(-3.0), 0.0);
        assert_eq!(DataType::I16.quantize(-7.9), -7.0);
        assert_eq!(DataType::F64.quantize(1.25), 1.25);
        assert_eq!(DataType::U8.quantize(f64::NAN), 0.0);
    }

    #[test]
    fn test_dimensions() {
        let dims = Dimensions::new(100, 200);
        assert_eq!(dims.width, 100);
        assert_eq!(dims.height, 200);
        assert_eq!(dims.pixel_count(), 20000);
        assert_eq!(dims.to_string(), "100x200");
    }

    #[test]
    fn test_pixel_rect() {
        let rect = PixelRect::new(4, 8, 4, 2);
        assert_eq!(rect.x_end(), 8);
        assert_eq!(rect.y_end(), 10);
        assert!(rect.fits_within(Dimensions::new(10, 10)));
        assert!(!rect.fits_within(Dimensions::new(7, 10)));
    }
}
