//! The common working grid shared by every input and output of a job

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::types::Dimensions;

/// Slack, in pixels, absorbed before rounding extents to whole pixels
const PIXEL_EPSILON: f64 = 1e-6;

/// Represents a world coordinate in the grid's projection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    /// Creates a new coordinate
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Affine transform between pixel (column, row) and world (x, y).
///
/// Coefficients `[a, b, c, d, e, f]` where:
/// x = a + b * col + c * row
/// y = d + e * col + f * row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// Builds a north-up transform from the top-left corner and pixel sizes
    pub fn north_up(x_min: f64, y_max: f64, x_res: f64, y_res: f64) -> Self {
        Self([x_min, x_res, 0.0, y_max, 0.0, -y_res])
    }

    /// Raw coefficients
    pub fn coefficients(&self) -> [f64; 6] {
        self.0
    }

    fn determinant(&self) -> f64 {
        let t = &self.0;
        t[1] * t[5] - t[2] * t[4]
    }

    /// Returns true if world coordinates can be mapped back to pixels
    pub fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det.abs() >= 1e-12 && self.0.iter().all(|v| v.is_finite())
    }

    /// Returns true if the transform has no rotation or shear terms
    pub fn is_north_up(&self) -> bool {
        self.0[2] == 0.0 && self.0[4] == 0.0 && self.0[1] > 0.0 && self.0[5] < 0.0
    }

    /// Converts pixel coordinates to world coordinates
    pub fn pixel_to_world(&self, col: f64, row: f64) -> Coordinate {
        let t = &self.0;
        Coordinate::new(
            t[0] + t[1] * col + t[2] * row,
            t[3] + t[4] * col + t[5] * row,
        )
    }

    /// Converts world coordinates to (fractional) pixel coordinates
    pub fn world_to_pixel(&self, coord: Coordinate) -> Result<(f64, f64)> {
        if !self.is_invertible() {
            return Err(Error::configuration(format!(
                "transform {:?} is not invertible",
                self.0
            )));
        }

        let t = &self.0;
        let det = self.determinant();
        let dx = coord.x - t[0];
        let dy = coord.y - t[3];

        let col = (t[5] * dx - t[2] * dy) / det;
        let row = (-t[4] * dx + t[1] * dy) / det;
        Ok((col, row))
    }
}

/// World-coordinate extent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Bounds {
    pub fn new(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Self {
        Self { x_min, x_max, y_min, y_max }
    }

    fn is_valid(&self) -> bool {
        self.x_max > self.x_min && self.y_max > self.y_min
    }

    fn union(&self, other: &Bounds) -> Bounds {
        Bounds::new(
            self.x_min.min(other.x_min),
            self.x_max.max(other.x_max),
            self.y_min.min(other.y_min),
            self.y_max.max(other.y_max),
        )
    }

    fn intersection(&self, other: &Bounds) -> Bounds {
        Bounds::new(
            self.x_min.max(other.x_min),
            self.x_max.min(other.x_max),
            self.y_min.max(other.y_min),
            self.y_max.min(other.y_max),
        )
    }
}

/// The grid of one input dataset
#[derive(Debug, Clone, PartialEq)]
pub struct GridInfo {
    pub bounds: Bounds,
    pub x_res: f64,
    pub y_res: f64,
    pub projection: String,
}

impl GridInfo {
    /// Describes a north-up raster of `size` pixels under `transform`
    pub fn from_transform(
        transform: &GeoTransform,
        size: Dimensions,
        projection: &str,
    ) -> Result<Self> {
        if !transform.is_invertible() {
            return Err(Error::configuration(format!(
                "transform {:?} is not invertible",
                transform.0
            )));
        }
        if !transform.is_north_up() {
            return Err(Error::configuration(format!(
                "rotated or flipped transform {:?} is not supported",
                transform.0
            )));
        }

        let t = transform.coefficients();
        let x_res = t[1];
        let y_res = -t[5];
        Ok(Self {
            bounds: Bounds::new(
                t[0],
                t[0] + x_res * size.width as f64,
                t[3] - y_res * size.height as f64,
                t[3],
            ),
            x_res,
            y_res,
            projection: projection.to_string(),
        })
    }
}

/// How the extents of several inputs combine into the working extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Footprint {
    /// Area covered by every input
    #[default]
    Intersection,
    /// Area covered by any input
    Union,
    /// Extent of the reference input
    Reference,
}

impl Footprint {
    /// Parses a footprint name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "intersection" => Some(Footprint::Intersection),
            "union" => Some(Footprint::Union),
            "reference" | "bounds_from_reference" => Some(Footprint::Reference),
            _ => None,
        }
    }
}

/// Common extent, resolution and projection of a job. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingGrid {
    bounds: Bounds,
    x_res: f64,
    y_res: f64,
    projection: String,
    size: Dimensions,
    transform: GeoTransform,
}

impl WorkingGrid {
    /// Creates a grid directly from an extent, resolution and projection
    pub fn new(bounds: Bounds, x_res: f64, y_res: f64, projection: impl Into<String>) -> Result<Self> {
        if !(x_res.is_finite() && y_res.is_finite() && x_res > 0.0 && y_res > 0.0) {
            return Err(Error::configuration(format!(
                "pixel resolution must be positive, got {} x {}",
                x_res, y_res
            )));
        }
        if !bounds.is_valid() {
            return Err(Error::configuration(format!(
                "empty working extent {:?}",
                bounds
            )));
        }

        let size = Dimensions::new(
            pixel_span(bounds.x_max - bounds.x_min, x_res),
            pixel_span(bounds.y_max - bounds.y_min, y_res),
        );
        let transform = GeoTransform::north_up(bounds.x_min, bounds.y_max, x_res, y_res);

        Ok(Self {
            bounds,
            x_res,
            y_res,
            projection: projection.into(),
            size,
            transform,
        })
    }

    /// Reconciles the grids of all inputs into one working grid.
    ///
    /// Resolution and projection come from `inputs[reference]`. The combined
    /// extent is snapped onto the reference pixel lattice: outward for a
    /// union, inward for an intersection.
    pub fn from_inputs(inputs: &[GridInfo], footprint: Footprint, reference: usize) -> Result<Self> {
        let reference_grid = inputs.get(reference).ok_or_else(|| {
            if inputs.is_empty() {
                Error::configuration("at least one input is required to build a working grid")
            } else {
                Error::configuration(format!(
                    "reference input {} out of range ({} inputs)",
                    reference,
                    inputs.len()
                ))
            }
        })?;

        let projection = reference_grid.projection.trim();
        for (index, grid) in inputs.iter().enumerate() {
            if grid.projection.trim() != projection {
                return Err(Error::configuration(format!(
                    "input {} projection {:?} does not match reference projection {:?}",
                    index, grid.projection, reference_grid.projection
                )));
            }
            if !(grid.x_res > 0.0 && grid.y_res > 0.0) || !grid.bounds.is_valid() {
                return Err(Error::configuration(format!(
                    "input {} has a degenerate grid {:?}",
                    index, grid
                )));
            }
        }

        let combined = match footprint {
            Footprint::Reference => reference_grid.bounds,
            Footprint::Union => inputs[1..]
                .iter()
                .fold(inputs[0].bounds, |acc, g| acc.union(&g.bounds)),
            Footprint::Intersection => inputs[1..]
                .iter()
                .fold(inputs[0].bounds, |acc, g| acc.intersection(&g.bounds)),
        };

        if !combined.is_valid() {
            return Err(Error::configuration(format!(
                "inputs do not overlap ({:?} footprint is empty)",
                footprint
            )));
        }

        let bounds = snap_to_lattice(&combined, reference_grid, footprint == Footprint::Union);
        let grid = Self::new(bounds, reference_grid.x_res, reference_grid.y_res, projection)?;

        debug!(
            "Working grid: {} pixels, res {} x {}, bounds {:?}",
            grid.size, grid.x_res, grid.y_res, grid.bounds
        );

        Ok(grid)
    }

    /// Extent in world coordinates
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Pixel size (x, y)
    pub fn resolution(&self) -> (f64, f64) {
        (self.x_res, self.y_res)
    }

    /// Projection descriptor
    pub fn projection(&self) -> &str {
        &self.projection
    }

    /// Total size in pixels
    pub fn size(&self) -> Dimensions {
        self.size
    }

    /// Pixel to world affine transform
    pub fn transform(&self) -> GeoTransform {
        self.transform
    }
}

impl fmt::Display for WorkingGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Working grid:")?;
        writeln!(f, "  Size: {}", self.size)?;
        writeln!(f, "  Pixel size: {} x {}", self.x_res, self.y_res)?;
        writeln!(
            f,
            "  Extent: ({}, {}) - ({}, {})",
            self.bounds.x_min, self.bounds.y_min, self.bounds.x_max, self.bounds.y_max
        )?;
        write!(f, "  Projection: {}", self.projection)
    }
}

/// Number of whole pixels needed to cover `extent`, at least one
fn pixel_span(extent: f64, res: f64) -> usize {
    let pixels = (extent / res - PIXEL_EPSILON).ceil();
    if pixels < 1.0 {
        1
    } else {
        pixels as usize
    }
}

fn snap_to_lattice(bounds: &Bounds, reference: &GridInfo, outward: bool) -> Bounds {
    let origin_x = reference.bounds.x_min;
    let origin_y = reference.bounds.y_max;
    let rx = reference.x_res;
    let ry = reference.y_res;

    let lo = |v: f64| if outward { snap_floor(v) } else { snap_ceil(v) };
    let hi = |v: f64| if outward { snap_ceil(v) } else { snap_floor(v) };

    Bounds::new(
        origin_x + lo((bounds.x_min - origin_x) / rx) * rx,
        origin_x + hi((bounds.x_max - origin_x) / rx) * rx,
        origin_y - hi((origin_y - bounds.y_min) / ry) * ry,
        origin_y - lo((origin_y - bounds.y_max) / ry) * ry,
    )
}

fn snap_floor(v: f64) -> f64 {
    (v + PIXEL_EPSILON).floor()
}

fn snap_ceil(v: f64) -> f64 {
    (v - PIXEL_EPSILON).ceil()
}
