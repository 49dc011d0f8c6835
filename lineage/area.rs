//! Area-under-curve shapes for frequency series.
//!
//! A series is drawn as the region between the x-axis (time) and the series
//! values, split into disjoint polygons wherever the series touches zero.
//! Pairwise areas (intersection, difference) are integrated exactly over the
//! shared timepoint axis, so no general polygon clipping is needed.

use thiserror::Error;

/// Heights at or below this value are flattened to zero before polygons are built.
/// Keeps shapes that merely graze the axis from producing sliver polygons; the value is
/// empirically tuned against a detection cutoff around 0.03.
pub const DEFAULT_AREA_EPSILON: f64 = 1.0e-4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("A shape needs one value per timepoint; got {values} values for {timepoints} timepoints.")]
    LengthMismatch { timepoints: usize, values: usize },
    #[error("Timepoints must be strictly increasing to form a simple polygon.")]
    NonIncreasingTimepoints,
    #[error("Polygon vertex has a non-finite coordinate ({0}).")]
    NonFinite(f64),
    #[error("Shapes compared with each other must share the same timepoint axis.")]
    AxisMismatch,
}

/// A closed polygon; the last vertex connects back to the first.
#[derive(Clone, Debug, PartialEq)]
pub struct Polygon {
    vertices: Vec<(f64, f64)>,
}

impl Polygon {
    pub fn vertices(&self) -> &[(f64, f64)] {
        &self.vertices
    }

    /// Shoelace area.
    pub fn area(&self) -> f64 {
        let n = self.vertices.len();
        if n < 3 {
            return 0.0;
        }
        let mut twice = 0.0;
        for i in 0..n {
            let (x0, y0) = self.vertices[i];
            let (x1, y1) = self.vertices[(i + 1) % n];
            twice += x0 * y1 - x1 * y0;
        }
        twice.abs() / 2.0
    }
}

/// The region under a frequency series.
#[derive(Clone, Debug)]
pub struct Shape {
    timepoints: Vec<f64>,
    heights: Vec<f64>,
    polygons: Vec<Polygon>,
}

impl Shape {
    /// Builds the shape bounded above by `values` and below by zero.
    pub fn under_curve(
        timepoints: &[f64],
        values: &[f64],
        epsilon: f64,
    ) -> Result<Self, GeometryError> {
        if timepoints.len() != values.len() {
            return Err(GeometryError::LengthMismatch {
                timepoints: timepoints.len(),
                values: values.len(),
            });
        }
        for &t in timepoints {
            if !t.is_finite() {
                return Err(GeometryError::NonFinite(t));
            }
        }
        if timepoints.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(GeometryError::NonIncreasingTimepoints);
        }

        let mut heights = Vec::with_capacity(values.len());
        for &value in values {
            if !value.is_finite() {
                return Err(GeometryError::NonFinite(value));
            }
            heights.push(if value <= epsilon { 0.0 } else { value });
        }

        let polygons = split_polygons(timepoints, &heights);
        Ok(Self {
            timepoints: timepoints.to_vec(),
            heights,
            polygons,
        })
    }

    /// Shape of `ceiling - series`, i.e. everything a series leaves unoccupied.
    pub fn complement(
        timepoints: &[f64],
        values: &[f64],
        ceiling: f64,
        epsilon: f64,
    ) -> Result<Self, GeometryError> {
        let inverted: Vec<f64> = values.iter().map(|&v| (ceiling - v).max(0.0)).collect();
        Self::under_curve(timepoints, &inverted, epsilon)
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn area(&self) -> f64 {
        self.polygons.iter().map(Polygon::area).sum()
    }

    pub fn intersection_area(&self, other: &Shape) -> Result<f64, GeometryError> {
        if self.timepoints != other.timepoints {
            return Err(GeometryError::AxisMismatch);
        }
        let mut total = 0.0;
        for i in 0..self.timepoints.len().saturating_sub(1) {
            let dt = self.timepoints[i + 1] - self.timepoints[i];
            total += segment_min_area(
                dt,
                (self.heights[i], self.heights[i + 1]),
                (other.heights[i], other.heights[i + 1]),
            );
        }
        Ok(total)
    }

    pub fn union_area(&self, other: &Shape) -> Result<f64, GeometryError> {
        let shared = self.intersection_area(other)?;
        Ok((self.area() + other.area() - shared).max(0.0))
    }

    /// Area of `self` that lies outside `other`.
    pub fn difference_area(&self, other: &Shape) -> Result<f64, GeometryError> {
        let shared = self.intersection_area(other)?;
        Ok((self.area() - shared).max(0.0))
    }

    pub fn symmetric_difference_area(&self, other: &Shape) -> Result<f64, GeometryError> {
        let shared = self.intersection_area(other)?;
        Ok((self.area() + other.area() - 2.0 * shared).max(0.0))
    }

    /// True when at most `tolerance` (a fraction of this shape's area) falls outside `other`.
    pub fn is_within(&self, other: &Shape, tolerance: f64) -> Result<bool, GeometryError> {
        let outside = self.difference_area(other)?;
        Ok(outside <= tolerance * self.area() + f64::EPSILON)
    }
}

/// One polygon per maximal run of non-zero heights. Each polygon is closed along
/// the axis at the neighbouring zero-valued timepoints.
fn split_polygons(timepoints: &[f64], heights: &[f64]) -> Vec<Polygon> {
    let n = heights.len();
    let mut polygons = Vec::new();
    let mut idx = 0;
    while idx < n {
        if heights[idx] <= 0.0 {
            idx += 1;
            continue;
        }
        let start = idx;
        while idx + 1 < n && heights[idx + 1] > 0.0 {
            idx += 1;
        }
        let end = idx;

        let left = if start > 0 {
            timepoints[start - 1]
        } else {
            timepoints[start]
        };
        let right = if end + 1 < n {
            timepoints[end + 1]
        } else {
            timepoints[end]
        };
        let mut vertices = Vec::with_capacity(end - start + 3);
        vertices.push((left, 0.0));
        for i in start..=end {
            vertices.push((timepoints[i], heights[i]));
        }
        vertices.push((right, 0.0));
        polygons.push(Polygon { vertices });
        idx += 1;
    }
    polygons
}

/// Exact integral of `min(a, b)` over one segment where both are linear.
fn segment_min_area(dt: f64, a: (f64, f64), b: (f64, f64)) -> f64 {
    let d0 = a.0 - b.0;
    let d1 = a.1 - b.1;
    if d0 * d1 >= 0.0 {
        let (lo0, lo1) = if d0 <= 0.0 && d1 <= 0.0 { a } else { b };
        return dt * (lo0 + lo1) / 2.0;
    }
    let crossing = d0 / (d0 - d1);
    let height = a.0 + crossing * (a.1 - a.0);
    let first = dt * crossing * (a.0.min(b.0) + height) / 2.0;
    let second = dt * (1.0 - crossing) * (height + a.1.min(b.1)) / 2.0;
    first + second
}
