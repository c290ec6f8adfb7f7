use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::field::{Centering, Field, SENTINEL};
use crate::index_space::{Axis, Index, IndexSpace};




/**
 * An axis-aligned box in real space.
 */
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}




// ============================================================================
impl Bounds {

    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /**
     * Closed-interval overlap test: boxes that only touch at a face, edge or
     * corner intersect.
     */
    pub fn intersects(&self, other: &Bounds) -> bool {
        (0..3).all(|n| self.max[n] >= other.min[n] && self.min[n] <= other.max[n])
    }

    /**
     * Half-open containment test: inclusive at the lower edge and exclusive
     * at the upper edge of each axis.
     */
    pub fn contains(&self, point: [f64; 3]) -> bool {
        (0..3).all(|n| point[n] >= self.min[n] && point[n] < self.max[n])
    }

    pub fn extent(&self, axis: Axis) -> f64 {
        self.max[axis.index()] - self.min[axis.index()]
    }
}




/**
 * The point containment and donor cell lookup capabilities needed to use a
 * grid as a source of field data.
 */
pub trait PointLocator {
    /// Return true if the point is inside the grid's interior, lower faces
    /// included and upper faces excluded.
    fn contains(&self, point: [f64; 3]) -> bool;

    /// Return the index of the interior cell containing the point, if any.
    fn cell_index_of(&self, point: [f64; 3]) -> Option<Index>;
}




/**
 * A grid block is a uniform, axis-aligned array of cells at a single
 * refinement level, with field data attached to its cells or points. Cell
 * `(i, j, k)` spans `origin + spacing * (i, j, k)` to `origin + spacing * (i +
 * 1, j + 1, k + 1)`, so the origin is the position of index zero, which need
 * not lie inside the block.
 *
 * Blocks produced by ghost generation carry a number of ghost cells on each
 * side; the rest of the extent is the block's interior, and only interior
 * cells are ever used as a source of data.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridBlock {
    level: u32,
    origin: [f64; 3],
    spacing: [f64; 3],
    extent: IndexSpace,
    ghost_layers: [[i64; 2]; 3],
    fields: BTreeMap<String, Field>,
}




// ============================================================================
impl GridBlock {

    /**
     * Create a block with no fields and no ghost cells.
     */
    pub fn new(level: u32, origin: [f64; 3], spacing: [f64; 3], extent: IndexSpace) -> Self {
        Self {
            level,
            origin,
            spacing,
            extent,
            ghost_layers: [[0; 2]; 3],
            fields: BTreeMap::new(),
        }
    }

    /**
     * Create a block from rectilinear point coordinates along each axis. The
     * coordinates must be evenly spaced, otherwise the grid cannot be
     * represented as a uniform block.
     */
    pub fn from_coordinates(level: u32, coordinates: [&[f64]; 3]) -> Result<Self> {
        let mut origin = [0.0; 3];
        let mut spacing = [0.0; 3];
        let mut cells = [0; 3];

        for (n, x) in coordinates.iter().enumerate() {
            if x.len() < 2 {
                return Err(Error::NonUniformGrid {
                    block: format!("level {}", level),
                    reason: format!("axis {} has {} coordinates", n, x.len()),
                });
            }
            let h = x[1] - x[0];

            for w in x.windows(2) {
                if ((w[1] - w[0]) - h).abs() > 1e-9 * h.abs().max(1.0) {
                    return Err(Error::NonUniformGrid {
                        block: format!("level {}", level),
                        reason: format!("axis {} spacing varies from {} to {}", n, h, w[1] - w[0]),
                    });
                }
            }
            origin[n] = x[0];
            spacing[n] = h;
            cells[n] = x.len() as i64 - 1;
        }
        let block = Self::new(level, origin, spacing, IndexSpace::from_corners([0; 3], cells));
        block.validate(&format!("level {}", level))?;
        Ok(block)
    }

    /**
     * Builder-style method to attach a field whose values are computed from a
     * closure. The closure receives each cell (or point) index and writes the
     * tuple of components into the given slice.
     */
    pub fn with_field_function<F>(
        mut self,
        name: &str,
        centering: Centering,
        num_components: usize,
        f: F) -> Self
    where
        F: Fn(Index, &mut [f64])
    {
        let space = self.space(centering);
        let mut field = Field::filled(centering, num_components, space.len(), 0.0);

        for (n, index) in space.iter().enumerate() {
            f(index, field.tuple_mut(n))
        }
        self.fields.insert(name.to_string(), field);
        self
    }

    /**
     * Attach a field, checking that its size matches the block.
     */
    pub fn insert_field(&mut self, name: &str, field: Field) -> Result<()> {
        let expected = self.space(field.centering()).len();

        if field.len() != expected {
            return Err(Error::FieldMismatch {
                name: name.to_string(),
                reason: format!("has {} tuples, the block needs {}", field.len(), expected),
            });
        }
        self.fields.insert(name.to_string(), field);
        Ok(())
    }

    /**
     * Return a block with the same geometry and field layout as this one, over
     * a new extent, with every field value set to the sentinel.
     */
    pub fn allocate_like(&self, extent: IndexSpace, ghost_layers: [[i64; 2]; 3]) -> Self {
        let fields = self.fields
            .iter()
            .map(|(name, f)| {
                let len = match f.centering() {
                    Centering::Cell => extent.len(),
                    Centering::Point => extent.points().len(),
                };
                (name.clone(), Field::filled(f.centering(), f.num_components(), len, SENTINEL))
            })
            .collect();

        Self {
            level: self.level,
            origin: self.origin,
            spacing: self.spacing,
            extent,
            ghost_layers,
            fields,
        }
    }

    /**
     * Check that the spacing describes a uniform grid: positive and finite on
     * every axis.
     */
    pub fn validate(&self, name: &str) -> Result<()> {
        for n in 0..3 {
            let h = self.spacing[n];
            if !(h.is_finite() && h > 0.0) {
                return Err(Error::NonUniformGrid {
                    block: name.to_string(),
                    reason: format!("spacing {} on axis {}", h, n),
                });
            }
            if !self.origin[n].is_finite() {
                return Err(Error::NonUniformGrid {
                    block: name.to_string(),
                    reason: format!("origin {} on axis {}", self.origin[n], n),
                });
            }
        }
        Ok(())
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /**
     * Return the full cell extent, including ghost cells.
     */
    pub fn extent(&self) -> &IndexSpace {
        &self.extent
    }

    /**
     * Return the number of ghost cells on the `[lower, upper]` sides of each
     * axis.
     */
    pub fn ghost_layers(&self) -> [[i64; 2]; 3] {
        self.ghost_layers
    }

    /**
     * Return the cell extent with ghost cells removed.
     */
    pub fn interior(&self) -> IndexSpace {
        let g = &self.ghost_layers;
        self.extent.extend_sides(
            [-g[0][0], -g[1][0], -g[2][0]],
            [-g[0][1], -g[1][1], -g[2][1]])
    }

    /**
     * Return the cell or point index space, depending on the centering.
     */
    pub fn space(&self, centering: Centering) -> IndexSpace {
        match centering {
            Centering::Cell => self.extent.clone(),
            Centering::Point => self.extent.points(),
        }
    }

    /**
     * Return the interior cell or point index space.
     */
    pub fn interior_space(&self, centering: Centering) -> IndexSpace {
        match centering {
            Centering::Cell => self.interior(),
            Centering::Point => self.interior().points(),
        }
    }

    /**
     * Return the real-space bounds of the interior cells.
     */
    pub fn bounds(&self) -> Bounds {
        let interior = self.interior();
        let s = interior.start();
        let e = interior.end();
        Bounds {
            min: [0, 1, 2].map(|n| self.origin[n] + self.spacing[n] * s[n] as f64),
            max: [0, 1, 2].map(|n| self.origin[n] + self.spacing[n] * e[n] as f64),
        }
    }

    pub fn point_position(&self, index: Index) -> [f64; 3] {
        [0, 1, 2].map(|n| self.origin[n] + self.spacing[n] * index[n] as f64)
    }

    pub fn cell_center(&self, index: Index) -> [f64; 3] {
        [0, 1, 2].map(|n| self.origin[n] + self.spacing[n] * (index[n] as f64 + 0.5))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.get_mut(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.fields.iter()
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /**
     * Return the tuple of a field at the given cell (or point) index.
     */
    pub fn get_slice(&self, name: &str, index: Index) -> Option<&[f64]> {
        let field = self.fields.get(name)?;
        let space = self.space(field.centering());

        if space.contains(index) {
            Some(field.tuple(space.row_major_offset(index)))
        } else {
            None
        }
    }
}




// ============================================================================
impl PointLocator for GridBlock {

    fn contains(&self, point: [f64; 3]) -> bool {
        self.bounds().contains(point)
    }

    fn cell_index_of(&self, point: [f64; 3]) -> Option<Index> {
        if !self.contains(point) {
            return None;
        }
        let interior = self.interior();
        let s = interior.start();
        let e = interior.end();

        // Round-off can put a point just below an upper face into the next
        // cell, so clamp to the interior.
        Some([0, 1, 2].map(|n| {
            let i = ((point[n] - self.origin[n]) / self.spacing[n]).floor() as i64;
            i.max(s[n]).min(e[n] - 1)
        }))
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{Bounds, GridBlock, PointLocator};
    use crate::field::Centering;
    use crate::index_space::range3d;

    fn unit_block() -> GridBlock {
        GridBlock::new(0, [0.0; 3], [1.0; 3], range3d(0..4, 0..4, 0..4))
            .with_field_function("rho", Centering::Cell, 1, |[i, j, k], s| s[0] = (i + j + k) as f64)
    }

    #[test]
    fn cell_lookup_is_half_open() {
        let block = unit_block();
        assert_eq!(block.cell_index_of([0.0, 0.0, 0.0]), Some([0, 0, 0]));
        assert_eq!(block.cell_index_of([3.999, 1.5, 2.0]), Some([3, 1, 2]));
        assert_eq!(block.cell_index_of([4.0, 1.5, 2.0]), None);
        assert!(!block.contains([-0.1, 1.0, 1.0]));
    }

    #[test]
    fn ghost_cells_are_excluded_from_bounds() {
        let mut ghosted = unit_block().allocate_like(range3d(-1..4, 0..5, 0..4), [[1, 0], [0, 1], [0, 0]]);
        assert_eq!(ghosted.interior(), range3d(0..4, 0..4, 0..4));
        assert_eq!(ghosted.bounds(), Bounds::new([0.0; 3], [4.0; 3]));
        assert_eq!(ghosted.field("rho").unwrap().len(), 5 * 5 * 4);
        assert_eq!(ghosted.get_slice("rho", [-1, 0, 0]), Some(&[crate::SENTINEL][..]));
        ghosted.field_mut("rho").unwrap().set_component(0, 0, 1.0);
        assert_eq!(ghosted.get_slice("rho", [-1, 0, 0]), Some(&[1.0][..]));
    }

    #[test]
    fn field_function_visits_every_point() {
        let block = GridBlock::new(1, [0.0; 3], [0.5; 3], range3d(0..2, 0..2, 0..2))
            .with_field_function("x", Centering::Point, 3, |index, s| {
                for n in 0..3 {
                    s[n] = index[n] as f64
                }
            });
        assert_eq!(block.field("x").unwrap().len(), 27);
        assert_eq!(block.get_slice("x", [2, 1, 0]), Some(&[2.0, 1.0, 0.0][..]));
    }

    #[test]
    fn rectilinear_coordinates_must_be_even() {
        let x = [0.0, 0.5, 1.0];
        let bad = [0.0, 0.5, 1.5];
        let block = GridBlock::from_coordinates(2, [&x, &x, &x]).unwrap();
        assert_eq!(block.spacing(), [0.5; 3]);
        assert_eq!(block.extent().len(), 8);
        assert!(GridBlock::from_coordinates(2, [&x, &bad, &x]).is_err());
    }

    #[test]
    fn closed_bounds_touching_at_a_corner_intersect() {
        let a = Bounds::new([0.0; 3], [1.0; 3]);
        let b = Bounds::new([1.0; 3], [2.0; 3]);
        assert!(a.intersects(&b));
        assert!(!a.contains([1.0, 0.5, 0.5]));
    }
}
