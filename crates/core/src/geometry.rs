//! Annotation geometry: detection boxes and segmentation polygons.
//!
//! All coordinates are normalized to the `[0, 1]` range of the image they
//! belong to. Pixel conversion is left to the server, which receives the
//! image dimensions alongside every payload.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Minimum number of vertices in a segmentation polygon.
pub const MIN_POLYGON_POINTS: usize = 3;

/// Slack allowed on the unit-square bounds to absorb float rounding.
const BOUNDS_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// The two geometry collections the remote service keeps per image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    Detection,
    Segmentation,
}

impl GeometryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::Segmentation => "segmentation",
        }
    }

    /// Name of the remote collection holding this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Detection => "detections",
            Self::Segmentation => "segmentations",
        }
    }
}

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box anchored at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub points: Vec<Point>,
}

/// Exactly one geometry payload per annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Geometry {
    Detection(BoundingBox),
    Segmentation(Polygon),
}

impl Geometry {
    pub fn kind(&self) -> GeometryKind {
        match self {
            Self::Detection(_) => GeometryKind::Detection,
            Self::Segmentation(_) => GeometryKind::Segmentation,
        }
    }

    /// Validate that every coordinate is finite and inside the unit square.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::Detection(bbox) => validate_box(bbox),
            Self::Segmentation(polygon) => validate_polygon(polygon),
        }
    }
}

fn in_unit_range(value: f64) -> bool {
    value.is_finite() && (-BOUNDS_EPSILON..=1.0 + BOUNDS_EPSILON).contains(&value)
}

fn validate_box(bbox: &BoundingBox) -> Result<(), CoreError> {
    let BoundingBox {
        x,
        y,
        width,
        height,
    } = *bbox;
    if ![x, y, width, height].iter().all(|v| v.is_finite()) {
        return Err(CoreError::Validation(
            "bounding box coordinates must be finite".to_string(),
        ));
    }
    if width <= 0.0 || height <= 0.0 {
        return Err(CoreError::Validation(format!(
            "bounding box must have positive size, got {width}x{height}"
        )));
    }
    if !in_unit_range(x) || !in_unit_range(y) || !in_unit_range(x + width) || !in_unit_range(y + height)
    {
        return Err(CoreError::Validation(
            "bounding box must lie inside the normalized image area".to_string(),
        ));
    }
    Ok(())
}

fn validate_polygon(polygon: &Polygon) -> Result<(), CoreError> {
    if polygon.points.len() < MIN_POLYGON_POINTS {
        return Err(CoreError::Validation(format!(
            "polygon needs at least {MIN_POLYGON_POINTS} points, got {}",
            polygon.points.len()
        )));
    }
    for (i, point) in polygon.points.iter().enumerate() {
        if !in_unit_range(point.x) || !in_unit_range(point.y) {
            return Err(CoreError::Validation(format!(
                "polygon point {i} is outside the normalized image area"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
