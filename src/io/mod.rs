//! Raster I/O for rasterblock
//!
//! The engine talks to raster storage only through the [`RasterDriver`] and
//! [`RasterDataset`] traits. Two drivers ship with the crate: an in-memory
//! one and a flat binary one with a JSON header.

pub mod traits;
pub mod byte_order;
pub mod memory;
pub mod raw;

pub use traits::{CreateOptions, DatasetInfo, RasterDataset, RasterDriver};
pub use byte_order::ByteOrder;
pub use memory::{MemoryDataset, MemoryDriver};
pub use raw::{RawDataset, RawDriver, RawHeader};
