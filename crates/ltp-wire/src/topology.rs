//! Pixel topologies: the spatial layout of a sink's pixels.
//!
//! A topology maps every pixel index in `[0, N)` to exactly one spatial
//! position, and (for matrices) back again. [`TopologyMapper`] materializes
//! that bijection, honoring the matrix origin corner, pixel ordering, and
//! serpentine wiring.

use serde::{Deserialize, Serialize};

/// Starting corner for matrix topologies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixOrigin {
    #[default]
    #[serde(rename = "top-left")]
    TopLeft,
    #[serde(rename = "top-right")]
    TopRight,
    #[serde(rename = "bottom-left")]
    BottomLeft,
    #[serde(rename = "bottom-right")]
    BottomRight,
}

/// Pixel ordering for matrix topologies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixOrder {
    #[default]
    #[serde(rename = "row-major")]
    RowMajor,
    #[serde(rename = "column-major")]
    ColumnMajor,
}

/// A single coordinate point for custom topologies. `x` and `y` are
/// normalized to `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub index: u32,
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f32>,
}

/// A sink's pixel layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topology", rename_all = "lowercase")]
pub enum Topology {
    Linear {
        dimensions: [u32; 1],
    },
    Matrix {
        dimensions: [u32; 2],
        #[serde(default)]
        origin: MatrixOrigin,
        #[serde(default)]
        order: MatrixOrder,
        #[serde(default)]
        serpentine: bool,
    },
    Custom {
        pixels: u32,
        coordinates: Vec<Coordinate>,
    },
}

impl Topology {
    /// A 1-D strip of `length` pixels.
    pub fn linear(length: u32) -> Self {
        Topology::Linear {
            dimensions: [length],
        }
    }

    /// A `width` x `height` matrix with default origin and ordering.
    pub fn matrix(width: u32, height: u32) -> Self {
        Topology::Matrix {
            dimensions: [width, height],
            origin: MatrixOrigin::default(),
            order: MatrixOrder::default(),
            serpentine: false,
        }
    }

    /// Build a topology for a dimensions list: 1 entry is linear, 2 is a
    /// matrix.
    pub fn from_dimensions(dims: &[u32]) -> Self {
        match dims {
            [w, h, ..] => Topology::matrix(*w, *h),
            [n] => Topology::linear(*n),
            [] => Topology::linear(0),
        }
    }

    /// Total pixel count.
    pub fn pixel_count(&self) -> usize {
        match self {
            Topology::Linear { dimensions } => dimensions[0] as usize,
            Topology::Matrix { dimensions, .. } => {
                dimensions[0] as usize * dimensions[1] as usize
            }
            Topology::Custom { pixels, .. } => *pixels as usize,
        }
    }

    /// Dimensions as a list (`[n]` or `[w, h]`; pixel count for custom).
    pub fn dimensions(&self) -> Vec<u32> {
        match self {
            Topology::Linear { dimensions } => dimensions.to_vec(),
            Topology::Matrix { dimensions, .. } => dimensions.to_vec(),
            Topology::Custom { pixels, .. } => vec![*pixels],
        }
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, Topology::Matrix { .. })
    }
}

/// Materialized index <-> position mapping for a [`Topology`].
#[derive(Clone, Debug)]
pub struct TopologyMapper {
    topology: Topology,
    /// Normalized (x, y) per pixel index.
    normalized: Vec<(f32, f32)>,
    /// Grid (col, row) per pixel index; matrix topologies only.
    grid: Vec<(u32, u32)>,
}

impl TopologyMapper {
    pub fn new(topology: Topology) -> Self {
        let mut mapper = Self {
            topology,
            normalized: Vec::new(),
            grid: Vec::new(),
        };
        mapper.build();
        mapper
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn pixel_count(&self) -> usize {
        self.topology.pixel_count()
    }

    fn build(&mut self) {
        match self.topology.clone() {
            Topology::Linear { dimensions } => {
                let length = dimensions[0] as usize;
                let span = (length.saturating_sub(1)).max(1) as f32;
                self.normalized = (0..length)
                    .map(|i| (i as f32 / span, 0.5))
                    .collect();
            }
            Topology::Matrix {
                dimensions,
                origin,
                order,
                serpentine,
            } => self.build_matrix(dimensions[0], dimensions[1], origin, order, serpentine),
            Topology::Custom { pixels, coordinates } => {
                self.normalized = vec![(0.0, 0.0); pixels as usize];
                for coord in &coordinates {
                    if let Some(slot) = self.normalized.get_mut(coord.index as usize) {
                        *slot = (coord.x, coord.y);
                    }
                }
            }
        }
    }

    fn build_matrix(
        &mut self,
        width: u32,
        height: u32,
        origin: MatrixOrigin,
        order: MatrixOrder,
        serpentine: bool,
    ) {
        let x_span = (width.saturating_sub(1)).max(1) as f32;
        let y_span = (height.saturating_sub(1)).max(1) as f32;

        let mut push = |slf: &mut Self, col: u32, row: u32| {
            slf.normalized
                .push((col as f32 / x_span, row as f32 / y_span));
            slf.grid.push((col, row));
        };

        let flip_rows = matches!(origin, MatrixOrigin::BottomLeft | MatrixOrigin::BottomRight);
        let flip_cols = matches!(origin, MatrixOrigin::TopRight | MatrixOrigin::BottomRight);

        let rows: Vec<u32> = if flip_rows {
            (0..height).rev().collect()
        } else {
            (0..height).collect()
        };
        let cols: Vec<u32> = if flip_cols {
            (0..width).rev().collect()
        } else {
            (0..width).collect()
        };

        match order {
            MatrixOrder::RowMajor => {
                for (walk_idx, &row) in rows.iter().enumerate() {
                    let reversed = serpentine && walk_idx % 2 == 1;
                    if reversed {
                        for &col in cols.iter().rev() {
                            push(self, col, row);
                        }
                    } else {
                        for &col in &cols {
                            push(self, col, row);
                        }
                    }
                }
            }
            MatrixOrder::ColumnMajor => {
                for (walk_idx, &col) in cols.iter().enumerate() {
                    let reversed = serpentine && walk_idx % 2 == 1;
                    if reversed {
                        for &row in rows.iter().rev() {
                            push(self, col, row);
                        }
                    } else {
                        for &row in &rows {
                            push(self, col, row);
                        }
                    }
                }
            }
        }
    }

    /// Normalized `(x, y)` position of a pixel index, `(0, 0)` if out of
    /// range.
    pub fn index_to_normalized(&self, index: usize) -> (f32, f32) {
        self.normalized.get(index).copied().unwrap_or((0.0, 0.0))
    }

    /// Grid `(col, row)` of a pixel index. `None` for non-matrix topologies
    /// or out-of-range indices.
    pub fn index_to_grid(&self, index: usize) -> Option<(u32, u32)> {
        self.grid.get(index).copied()
    }

    /// Pixel index at grid `(col, row)`. `None` for non-matrix topologies
    /// or out-of-range positions.
    pub fn grid_to_index(&self, col: u32, row: u32) -> Option<usize> {
        if self.grid.is_empty() {
            return None;
        }
        self.grid.iter().position(|&g| g == (col, row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn all_matrix_configs() -> Vec<(MatrixOrigin, MatrixOrder, bool)> {
        let mut configs = Vec::new();
        for origin in [
            MatrixOrigin::TopLeft,
            MatrixOrigin::TopRight,
            MatrixOrigin::BottomLeft,
            MatrixOrigin::BottomRight,
        ] {
            for order in [MatrixOrder::RowMajor, MatrixOrder::ColumnMajor] {
                for serpentine in [false, true] {
                    configs.push((origin, order, serpentine));
                }
            }
        }
        configs
    }

    #[test]
    fn matrix_mapping_is_a_bijection() {
        for (width, height) in [(4u32, 3u32), (1, 8), (8, 1), (5, 5)] {
            for (origin, order, serpentine) in all_matrix_configs() {
                let mapper = TopologyMapper::new(Topology::Matrix {
                    dimensions: [width, height],
                    origin,
                    order,
                    serpentine,
                });
                let count = (width * height) as usize;
                assert_eq!(mapper.pixel_count(), count);

                let cells: HashSet<(u32, u32)> = (0..count)
                    .map(|i| mapper.index_to_grid(i).unwrap())
                    .collect();
                assert_eq!(cells.len(), count, "{origin:?}/{order:?}/serp={serpentine}");
                for col in 0..width {
                    for row in 0..height {
                        assert!(cells.contains(&(col, row)));
                    }
                }

                for i in 0..count {
                    let (col, row) = mapper.index_to_grid(i).unwrap();
                    assert_eq!(mapper.grid_to_index(col, row), Some(i));
                }
            }
        }
    }

    #[test]
    fn top_left_row_major_is_identity_order() {
        let mapper = TopologyMapper::new(Topology::matrix(3, 2));
        assert_eq!(mapper.index_to_grid(0), Some((0, 0)));
        assert_eq!(mapper.index_to_grid(2), Some((2, 0)));
        assert_eq!(mapper.index_to_grid(3), Some((0, 1)));
        assert_eq!(mapper.index_to_grid(5), Some((2, 1)));
    }

    #[test]
    fn serpentine_reverses_odd_rows() {
        let mapper = TopologyMapper::new(Topology::Matrix {
            dimensions: [3, 2],
            origin: MatrixOrigin::TopLeft,
            order: MatrixOrder::RowMajor,
            serpentine: true,
        });
        assert_eq!(mapper.index_to_grid(2), Some((2, 0)));
        // Second row runs right to left.
        assert_eq!(mapper.index_to_grid(3), Some((2, 1)));
        assert_eq!(mapper.index_to_grid(5), Some((0, 1)));
    }

    #[test]
    fn bottom_right_starts_at_the_far_corner() {
        let mapper = TopologyMapper::new(Topology::Matrix {
            dimensions: [3, 2],
            origin: MatrixOrigin::BottomRight,
            order: MatrixOrder::RowMajor,
            serpentine: false,
        });
        assert_eq!(mapper.index_to_grid(0), Some((2, 1)));
        assert_eq!(mapper.index_to_grid(5), Some((0, 0)));
    }

    #[test]
    fn linear_normalizes_to_unit_range() {
        let mapper = TopologyMapper::new(Topology::linear(5));
        assert_eq!(mapper.index_to_normalized(0), (0.0, 0.5));
        assert_eq!(mapper.index_to_normalized(4), (1.0, 0.5));
        assert_eq!(mapper.index_to_grid(0), None);
    }

    #[test]
    fn single_pixel_strip_does_not_divide_by_zero() {
        let mapper = TopologyMapper::new(Topology::linear(1));
        assert_eq!(mapper.index_to_normalized(0), (0.0, 0.5));
    }

    #[test]
    fn custom_topology_uses_declared_coordinates() {
        let mapper = TopologyMapper::new(Topology::Custom {
            pixels: 3,
            coordinates: vec![
                Coordinate { index: 0, x: 0.0, y: 0.0, z: None },
                Coordinate { index: 2, x: 1.0, y: 1.0, z: None },
            ],
        });
        assert_eq!(mapper.index_to_normalized(0), (0.0, 0.0));
        // Undeclared index falls back to the origin.
        assert_eq!(mapper.index_to_normalized(1), (0.0, 0.0));
        assert_eq!(mapper.index_to_normalized(2), (1.0, 1.0));
    }

    #[test]
    fn json_tag_roundtrip() {
        let topo = Topology::Matrix {
            dimensions: [16, 16],
            origin: MatrixOrigin::BottomLeft,
            order: MatrixOrder::ColumnMajor,
            serpentine: true,
        };
        let json = serde_json::to_value(&topo).unwrap();
        assert_eq!(json["topology"], "matrix");
        assert_eq!(json["origin"], "bottom-left");
        assert_eq!(json["order"], "column-major");
        let back: Topology = serde_json::from_value(json).unwrap();
        assert_eq!(back, topo);
    }

    #[test]
    fn from_dimensions_picks_variant() {
        assert_eq!(Topology::from_dimensions(&[60]), Topology::linear(60));
        assert_eq!(Topology::from_dimensions(&[16, 8]), Topology::matrix(16, 8));
    }
}
