//! Pixel buffers exchanged with block callbacks

use ndarray::{s, Array2, Array3, ArrayView2, ArrayViewMut2, Axis};

use crate::error::{Error, Result};
use crate::types::{DataType, Dimensions};

/// A block of pixels laid out as (band, row, column).
///
/// Samples are held as `f64` regardless of `data_type`; the data type says
/// how the samples are stored on disk and is applied by [`DataType::quantize`]
/// when a block is written.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBlock {
    data_type: DataType,
    data: Array3<f64>,
}

impl RasterBlock {
    /// Wraps an existing (band, row, column) array
    pub fn new(data_type: DataType, data: Array3<f64>) -> Self {
        Self { data_type, data }
    }

    /// Creates a block with every sample set to `value`
    pub fn filled(data_type: DataType, bands: usize, size: Dimensions, value: f64) -> Self {
        Self::new(
            data_type,
            Array3::from_elem((bands, size.height, size.width), value),
        )
    }

    /// Creates a single-band block
    pub fn from_band(data_type: DataType, band: Array2<f64>) -> Self {
        Self::new(data_type, band.insert_axis(Axis(0)))
    }

    /// Builds a block from a list of equally sized bands
    pub fn from_bands(data_type: DataType, bands: Vec<Array2<f64>>) -> Result<Self> {
        let first = bands
            .first()
            .ok_or_else(|| Error::callback("a raster block needs at least one band"))?;
        let (rows, cols) = first.dim();

        let mut data = Array3::zeros((bands.len(), rows, cols));
        for (index, band) in bands.iter().enumerate() {
            if band.dim() != (rows, cols) {
                return Err(Error::callback(format!(
                    "band {} is {:?}, expected {:?}",
                    index + 1,
                    band.dim(),
                    (rows, cols)
                )));
            }
            data.index_axis_mut(Axis(0), index).assign(band);
        }

        Ok(Self::new(data_type, data))
    }

    /// Storage data type
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Number of bands
    pub fn band_count(&self) -> usize {
        self.data.dim().0
    }

    /// Width in pixels
    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    /// Height in pixels
    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    /// Pixel dimensions
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width(), self.height())
    }

    /// View of one band (zero-based)
    pub fn band(&self, index: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), index)
    }

    /// Mutable view of one band (zero-based)
    pub fn band_mut(&mut self, index: usize) -> ArrayViewMut2<'_, f64> {
        self.data.index_axis_mut(Axis(0), index)
    }

    /// All samples
    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    /// All samples, mutable
    pub fn data_mut(&mut self) -> &mut Array3<f64> {
        &mut self.data
    }

    /// Consumes the block and returns its samples
    pub fn into_data(self) -> Array3<f64> {
        self.data
    }

    /// Returns a copy converted to another data type
    pub fn cast(&self, data_type: DataType) -> Self {
        Self::new(data_type, self.data.mapv(|v| data_type.quantize(v)))
    }

    /// Removes `left`/`top`/`right`/`bottom` pixels from the edges
    pub fn trimmed(&self, left: usize, top: usize, right: usize, bottom: usize) -> Result<Self> {
        let (_, rows, cols) = self.data.dim();
        if left + right > cols || top + bottom > rows {
            return Err(Error::callback(format!(
                "cannot trim {}+{} columns and {}+{} rows from a {}x{} block",
                left, right, top, bottom, cols, rows
            )));
        }

        let view = self
            .data
            .slice(s![.., top..rows - bottom, left..cols - right]);
        Ok(Self::new(self.data_type, view.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_from_band() {
        let block = RasterBlock::from_band(DataType::U8, array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(block.band_count(), 1);
        assert_eq!(block.dimensions(), Dimensions::new(3, 2));
        assert_eq!(block.band(0)[[1, 2]], 6.0);
    }

    #[test]
    fn test_from_bands_rejects_mismatched_shapes() {
        let bands = vec![Array2::zeros((2, 2)), Array2::zeros((2, 3))];
        assert!(RasterBlock::from_bands(DataType::F32, bands).is_err());
        assert!(RasterBlock::from_bands(DataType::F32, vec![]).is_err());
    }

    #[test]
    fn test_trimmed() {
        let band = Array2::from_shape_fn((4, 5), |(r, c)| (r * 10 + c) as f64);
        let block = RasterBlock::from_band(DataType::I32, band);

        let inner = block.trimmed(1, 1, 2, 0).unwrap();
        assert_eq!(inner.dimensions(), Dimensions::new(2, 3));
        assert_eq!(inner.band(0)[[0, 0]], 11.0);
        assert_eq!(inner.band(0)[[2, 1]], 32.0);

        assert!(block.trimmed(3, 0, 3, 0).is_err());
    }

    #[test]
    fn test_cast() {
        let block = RasterBlock::from_band(DataType::F32, array![[1.7, -2.0], [300.0, 4.5]]);
        let bytes = block.cast(DataType::U8);
        assert_eq!(bytes.data_type(), DataType::U8);
        assert_eq!(bytes.band(0), array![[1.0, 0.0], [255.0, 4.0]]);
    }

    #[test]
    fn test_filled() {
        let block = RasterBlock::filled(DataType::U16, 3, Dimensions::new(2, 2), 9.0);
        assert_eq!(block.band_count(), 3);
        assert!(block.data().iter().all(|&v| v == 9.0));
    }
}
