//! Flat binary raster files
//!
//! A raw raster is a band-sequential file of fixed-size samples with a JSON
//! header stored next to it as `<path>.json`. Pixel `(row, col)` of band `b`
//! lives at sample `((b - 1) * height + row) * width + col`.
//!
//! Read-only datasets are memory mapped. Writable datasets go through a
//! locked file handle using positioned reads and writes, and are never
//! truncated when reopened.

use log::{debug, warn};
use memmap2::Mmap;
use ndarray::{Array2, ArrayView2};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self as stdio, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::BandStatistics;
use crate::error::{Error, Result};
use crate::grid::GeoTransform;
use crate::io::byte_order::ByteOrder;
use crate::io::traits::{CreateOptions, DatasetInfo, RasterDataset, RasterDriver};
use crate::types::{DataType, Dimensions, PixelRect};

static HEADER_WRITES: AtomicU64 = AtomicU64::new(0);

/// Sidecar header of a raw raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHeader {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub data_type: DataType,
    #[serde(default)]
    pub byte_order: ByteOrder,
    pub geo_transform: [f64; 6],
    pub projection: String,
    /// One entry per band
    #[serde(default)]
    pub no_data: Vec<Option<f64>>,
}

impl RawHeader {
    fn from_options(options: &CreateOptions, byte_order: ByteOrder) -> Self {
        Self {
            width: options.size.width,
            height: options.size.height,
            bands: options.bands,
            data_type: options.data_type,
            byte_order,
            geo_transform: options.transform.coefficients(),
            projection: options.projection.clone(),
            no_data: vec![options.no_data; options.bands],
        }
    }

    fn size(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Expected length of the data file in bytes
    pub fn data_len(&self) -> u64 {
        (self.width * self.height * self.bands * self.data_type.size()) as u64
    }

    fn matches(&self, options: &CreateOptions) -> bool {
        self.size() == options.size && self.bands == options.bands && self.data_type == options.data_type
    }

    fn sample_offset(&self, band: usize, row: usize, col: usize) -> u64 {
        (((band - 1) * self.height + row) * self.width + col) as u64 * self.data_type.size() as u64
    }
}

/// Path of the JSON header belonging to `path`
pub fn header_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".json");
    PathBuf::from(name)
}

fn read_header(path: &Path) -> Result<RawHeader> {
    let sidecar = header_path(path);
    let text = fs::read_to_string(&sidecar)
        .map_err(|e| Error::raster(path, format!("cannot read header {}: {}", sidecar.display(), e)))?;
    serde_json::from_str(&text)
        .map_err(|e| Error::raster(path, format!("malformed header {}: {}", sidecar.display(), e)))
}

/// Writes the header through a temporary file and a rename so concurrent
/// readers never observe a partial header.
fn write_header(path: &Path, header: &RawHeader) -> Result<()> {
    let sidecar = header_path(path);
    let mut tmp = OsString::from(sidecar.as_os_str());
    tmp.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        HEADER_WRITES.fetch_add(1, Ordering::Relaxed)
    ));
    let tmp = PathBuf::from(tmp);

    let text = serde_json::to_string_pretty(header)
        .map_err(|e| Error::raster(path, format!("cannot encode header: {}", e)))?;
    fs::write(&tmp, text)?;
    fs::rename(&tmp, &sidecar)?;
    Ok(())
}

enum Storage {
    Mapped(Mmap),
    File(Mutex<File>),
}

/// An open raw raster
pub struct RawDataset {
    path: PathBuf,
    header: RwLock<RawHeader>,
    storage: Storage,
    writable: bool,
}

impl RawDataset {
    fn check_band(&self, header: &RawHeader, band: usize) -> Result<()> {
        if band == 0 || band > header.bands {
            return Err(Error::raster(
                &self.path,
                format!("band {} does not exist (1..={})", band, header.bands),
            ));
        }
        Ok(())
    }

    fn check_rect(&self, header: &RawHeader, rect: PixelRect) -> Result<()> {
        if !rect.fits_within(header.size()) {
            return Err(Error::raster(
                &self.path,
                format!("window {} outside {} raster", rect, header.size()),
            ));
        }
        Ok(())
    }
}

impl RasterDataset for RawDataset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn info(&self) -> DatasetInfo {
        let header = self.header.read();
        DatasetInfo {
            size: header.size(),
            bands: header.bands,
            data_type: header.data_type,
            transform: GeoTransform(header.geo_transform),
            projection: header.projection.clone(),
        }
    }

    fn read_window(&self, band: usize, rect: PixelRect) -> Result<Array2<f64>> {
        let header = self.header.read().clone();
        self.check_band(&header, band)?;
        self.check_rect(&header, rect)?;

        let sample = header.data_type.size();
        let row_bytes = rect.width * sample;
        let mut out = Array2::zeros((rect.height, rect.width));

        match &self.storage {
            Storage::Mapped(mmap) => {
                for (row, mut values) in out.rows_mut().into_iter().enumerate() {
                    let start = header.sample_offset(band, rect.y + row, rect.x) as usize;
                    let bytes = &mmap[start..start + row_bytes];
                    for (chunk, value) in bytes.chunks_exact(sample).zip(values.iter_mut()) {
                        *value = header.byte_order.decode(header.data_type, chunk);
                    }
                }
            }
            Storage::File(file) => {
                let mut file = file.lock();
                let mut buf = vec![0u8; row_bytes];
                for (row, mut values) in out.rows_mut().into_iter().enumerate() {
                    file.seek(SeekFrom::Start(header.sample_offset(band, rect.y + row, rect.x)))?;
                    file.read_exact(&mut buf)?;
                    for (chunk, value) in buf.chunks_exact(sample).zip(values.iter_mut()) {
                        *value = header.byte_order.decode(header.data_type, chunk);
                    }
                }
            }
        }

        Ok(out)
    }

    fn write_window(&self, band: usize, rect: PixelRect, data: ArrayView2<'_, f64>) -> Result<()> {
        let header = self.header.read().clone();
        self.check_band(&header, band)?;
        self.check_rect(&header, rect)?;
        if data.dim() != (rect.height, rect.width) {
            return Err(Error::raster(
                &self.path,
                format!("buffer {:?} does not match window {}", data.dim(), rect),
            ));
        }

        let file = match &self.storage {
            Storage::File(file) => file,
            Storage::Mapped(_) => {
                return Err(Error::raster(&self.path, "dataset was opened read-only"));
            }
        };

        let mut buf = vec![0u8; rect.width * header.data_type.size()];
        let mut file = file.lock();
        for (row, values) in data.rows().into_iter().enumerate() {
            header
                .byte_order
                .encode_slice(header.data_type, values.iter().copied(), &mut buf);
            file.seek(SeekFrom::Start(header.sample_offset(band, rect.y + row, rect.x)))?;
            file.write_all(&buf)?;
        }
        Ok(())
    }

    fn no_data_value(&self, band: usize) -> Result<Option<f64>> {
        let header = self.header.read();
        self.check_band(&header, band)?;
        Ok(header.no_data.get(band - 1).copied().flatten())
    }

    fn set_no_data_value(&self, band: usize, value: Option<f64>) -> Result<()> {
        let mut header = self.header.write();
        self.check_band(&header, band)?;
        let bands = header.bands;
        header.no_data.resize(bands, None);
        header.no_data[band - 1] = value;

        if self.writable {
            write_header(&self.path, &header)?;
        }
        Ok(())
    }

    fn compute_statistics(&self, band: usize, ignore_no_data: bool) -> Result<BandStatistics> {
        let size = self.header.read().size();
        let pixels = self.read_window(band, PixelRect::new(0, 0, size.width, size.height))?;
        let no_data = if ignore_no_data { self.no_data_value(band)? } else { None };

        BandStatistics::from_samples(pixels.iter().copied(), no_data).ok_or_else(|| {
            Error::raster(&self.path, format!("band {} has no valid pixels", band))
        })
    }
}

/// Driver for flat binary rasters with a JSON header
#[derive(Debug, Clone, Copy)]
pub struct RawDriver {
    byte_order: ByteOrder,
    use_mmap: bool,
}

impl Default for RawDriver {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::default(),
            use_mmap: true,
        }
    }
}

impl RawDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte order used for files this driver creates
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Whether read-only datasets are memory mapped
    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }

    fn check_length(path: &Path, header: &RawHeader, actual: u64) -> Result<()> {
        if actual != header.data_len() {
            return Err(Error::raster(
                path,
                format!("file holds {} bytes, header describes {}", actual, header.data_len()),
            ));
        }
        Ok(())
    }
}

impl RasterDriver for RawDriver {
    fn open_for_read(&self, path: &Path) -> Result<Arc<dyn RasterDataset>> {
        let header = read_header(path)?;
        let file = File::open(path).map_err(|e| Error::raster(path, e.to_string()))?;
        Self::check_length(path, &header, file.metadata()?.len())?;

        let storage = if self.use_mmap && header.data_len() > 0 {
            let mmap = unsafe { Mmap::map(&file)? };

            #[cfg(unix)]
            unsafe {
                libc::madvise(
                    mmap.as_ptr() as *mut libc::c_void,
                    mmap.len(),
                    libc::MADV_WILLNEED,
                );
            }

            Storage::Mapped(mmap)
        } else {
            Storage::File(Mutex::new(file))
        };

        debug!(
            "Opened {} for reading: {}x{}, {} band(s) of {}",
            path.display(),
            header.width,
            header.height,
            header.bands,
            header.data_type
        );

        Ok(Arc::new(RawDataset {
            path: path.to_path_buf(),
            header: RwLock::new(header),
            storage,
            writable: false,
        }))
    }

    fn open_for_write(&self, path: &Path, options: &CreateOptions) -> Result<Arc<dyn RasterDataset>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::raster(path, e.to_string()))?;

        let header = match read_header(path) {
            Ok(existing) if existing.matches(options) => existing,
            Ok(existing) => {
                return Err(Error::raster(
                    path,
                    format!(
                        "existing file is {} x {} bands of {}, expected {} x {} bands of {}",
                        existing.size(),
                        existing.bands,
                        existing.data_type,
                        options.size,
                        options.bands,
                        options.data_type
                    ),
                ));
            }
            Err(_) => {
                let header = RawHeader::from_options(options, self.byte_order);
                write_header(path, &header)?;
                header
            }
        };

        let len = file.metadata()?.len();
        if len == 0 {
            file.set_len(header.data_len())?;
        } else {
            Self::check_length(path, &header, len)?;
        }

        debug!("Opened {} for writing", path.display());

        Ok(Arc::new(RawDataset {
            path: path.to_path_buf(),
            header: RwLock::new(header),
            storage: Storage::File(Mutex::new(file)),
            writable: true,
        }))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        for target in [path.to_path_buf(), header_path(path)] {
            match fs::remove_file(&target) {
                Ok(()) => debug!("Removed {}", target.display()),
                Err(e) if e.kind() == stdio::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Could not remove {}: {}", target.display(), e);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}
