use core::ops::Range;
use serde::{Deserialize, Serialize};




/**
 * A discrete 3D index, ordered (i, j, k).
 */
pub type Index = [i64; 3];




/**
 * Identifier for a Cartesian axis
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    I,
    J,
    K,
}




// ============================================================================
impl Axis {

    pub const ALL: [Axis; 3] = [Axis::I, Axis::J, Axis::K];

    pub fn index(self) -> usize {
        match self {
            Axis::I => 0,
            Axis::J => 1,
            Axis::K => 2,
        }
    }

    pub fn from_index(n: usize) -> Self {
        match n {
            0 => Axis::I,
            1 => Axis::J,
            2 => Axis::K,
            _ => panic!("axis index must be 0, 1, or 2 (got {})", n),
        }
    }
}




#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]


/**
 * Represents a rectangular region in a discrete 3D index space. Ranges are
 * half-open; an index space with a zero-length range on any axis is empty.
 */
pub struct IndexSpace {
    di: Range<i64>,
    dj: Range<i64>,
    dk: Range<i64>,
}




/**
 * Describes a rectangular index space. The index type is signed 64-bit integer.
 */
impl IndexSpace {


    pub fn new(di: Range<i64>, dj: Range<i64>, dk: Range<i64>) -> Self {

        assert!(
            di.start <= di.end && dj.start <= dj.end && dk.start <= dk.end,
            "index space has negative volume");

        Self { di, dj, dk }
    }


    /**
     * Construct an index space from start (inclusive) and end (exclusive)
     * corners.
     */
    pub fn from_corners(start: Index, end: Index) -> Self {
        Self::new(start[0]..end[0], start[1]..end[1], start[2]..end[2])
    }


    /**
     * Construct an index space from an inclusive extent, laid out as
     * `[i0, i1, j0, j1, k0, k1]`.
     */
    pub fn from_extent(extent: [i64; 6]) -> Self {
        Self::new(
            extent[0]..extent[1] + 1,
            extent[2]..extent[3] + 1,
            extent[4]..extent[5] + 1)
    }


    /**
     * Return the inclusive extent `[i0, i1, j0, j1, k0, k1]`. Not meaningful
     * for an empty index space.
     */
    pub fn to_extent(&self) -> [i64; 6] {
        [
            self.di.start, self.di.end - 1,
            self.dj.start, self.dj.end - 1,
            self.dk.start, self.dk.end - 1,
        ]
    }


    /**
     * Return the index range along an axis.
     */
    pub fn range(&self, axis: Axis) -> &Range<i64> {
        match axis {
            Axis::I => &self.di,
            Axis::J => &self.dj,
            Axis::K => &self.dk,
        }
    }


    /**
     * Return the number of indexes on each axis.
     */
    pub fn dim(&self) -> (usize, usize, usize) {
        ((self.di.end - self.di.start) as usize,
         (self.dj.end - self.dj.start) as usize,
         (self.dk.end - self.dk.start) as usize)
    }


    /**
     * Return the number of elements in this index space.
     */
    pub fn len(&self) -> usize {
        let (l, m, n) = self.dim();
        l * m * n
    }


    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }


    /**
     * Return the minimum index (inclusive).
     */
    pub fn start(&self) -> Index {
        [self.di.start, self.dj.start, self.dk.start]
    }


    /**
     * Return the maximum index (exclusive).
     */
    pub fn end(&self) -> Index {
        [self.di.end, self.dj.end, self.dk.end]
    }


    /**
     * Determine whether this index space contains the given index.
     */
    pub fn contains(&self, index: Index) -> bool {
        self.di.contains(&index[0]) && self.dj.contains(&index[1]) && self.dk.contains(&index[2])
    }


    /**
     * Determine whether another index space is a subset of this one. The
     * empty set is a subset of everything.
     */
    pub fn contains_space(&self, other: &Self) -> bool {
        other.is_empty() || (0..3).all(|n| {
            let axis = Axis::from_index(n);
            other.range(axis).start >= self.range(axis).start &&
            other.range(axis).end <= self.range(axis).end
        })
    }


    /**
     * Return the intersection of two index spaces, or `None` if they share no
     * elements.
     */
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let s0 = self.start();
        let s1 = other.start();
        let e0 = self.end();
        let e1 = other.end();
        let start = [s0[0].max(s1[0]), s0[1].max(s1[1]), s0[2].max(s1[2])];
        let end = [e0[0].min(e1[0]), e0[1].min(e1[1]), e0[2].min(e1[2])];

        if (0..3).all(|n| start[n] < end[n]) {
            Some(Self::from_corners(start, end))
        } else {
            None
        }
    }


    /**
     * Expand this index space by the given number of elements on each axis.
     */
    pub fn extend_all(&self, delta: i64) -> Self {
        self.extend_sides([delta; 3], [delta; 3])
    }


    /**
     * Trim this index space by the given number of elements on each axis.
     */
    pub fn trim_all(&self, delta: i64) -> Self {
        self.extend_all(-delta)
    }


    /**
     * Expand the lower and upper sides of each axis by separate amounts.
     */
    pub fn extend_sides(&self, lower: Index, upper: Index) -> Self {
        let s = self.start();
        let e = self.end();
        Self::from_corners(
            [s[0] - lower[0], s[1] - lower[1], s[2] - lower[2]],
            [e[0] + upper[0], e[1] + upper[1], e[2] + upper[2]])
    }


    /**
     * Extend just the upper elements of this index space by a certain amount
     * on the given axis.
     */
    pub fn extend_upper(&self, delta: i64, axis: Axis) -> Self {
        let mut upper = [0; 3];
        upper[axis.index()] = delta;
        self.extend_sides([0; 3], upper)
    }


    /**
     * Extend just the lower elements of this index space by a certain amount
     * on the given axis.
     */
    pub fn extend_lower(&self, delta: i64, axis: Axis) -> Self {
        let mut lower = [0; 3];
        lower[axis.index()] = delta;
        self.extend_sides(lower, [0; 3])
    }


    /**
     * Shift this index space by the given offset.
     */
    pub fn translate(&self, delta: Index) -> Self {
        let s = self.start();
        let e = self.end();
        Self::from_corners(
            [s[0] + delta[0], s[1] + delta[1], s[2] + delta[2]],
            [e[0] + delta[0], e[1] + delta[1], e[2] + delta[2]])
    }


    /**
     * Map this index space onto a finer one, where each element is split
     * into `factor` elements per axis.
     */
    pub fn refine(&self, factor: Index) -> Self {
        let s = self.start();
        let e = self.end();
        Self::from_corners(
            [s[0] * factor[0], s[1] * factor[1], s[2] * factor[2]],
            [e[0] * factor[0], e[1] * factor[1], e[2] * factor[2]])
    }


    /**
     * Map this index space onto a coarser one. The result is the smallest
     * coarse space covering every element of this one: the lower and the
     * inclusive upper indexes are floor-divided by the factor.
     */
    pub fn coarsen(&self, factor: Index) -> Self {
        let s = self.start();
        let e = self.end();
        Self::from_corners(
            [s[0].div_euclid(factor[0]), s[1].div_euclid(factor[1]), s[2].div_euclid(factor[2])],
            [(e[0] - 1).div_euclid(factor[0]) + 1,
             (e[1] - 1).div_euclid(factor[1]) + 1,
             (e[2] - 1).div_euclid(factor[2]) + 1])
    }


    /**
     * Return the space of vertices bounding the cells in this space.
     */
    pub fn points(&self) -> Self {
        self.extend_sides([0; 3], [1; 3])
    }


    /**
     * Return the linear offset for the given index, in a row-major memory
     * buffer aligned with the start of this index space.
     */
    pub fn row_major_offset(&self, index: Index) -> usize {
        let i = (index[0] - self.di.start) as usize;
        let j = (index[1] - self.dj.start) as usize;
        let k = (index[2] - self.dk.start) as usize;
        let (_, m, n) = self.dim();
        (i * m + j) * n + k
    }


    /**
     * Return an iterator which traverses the index space in row-major order
     * (C-like; the final index increases fastest).
     */
    pub fn iter(&self) -> impl Iterator<Item = Index> + '_ {
        self.di.clone().flat_map(move |i| {
            self.dj.clone().flat_map(move |j| self.dk.clone().map(move |k| [i, j, k]))
        })
    }
}




// ============================================================================
impl From<(Range<i64>, Range<i64>, Range<i64>)> for IndexSpace {
    fn from(range: (Range<i64>, Range<i64>, Range<i64>)) -> Self {
        Self::new(range.0, range.1, range.2)
    }
}

impl From<IndexSpace> for (Range<i64>, Range<i64>, Range<i64>) {
    fn from(space: IndexSpace) -> Self {
        (space.di, space.dj, space.dk)
    }
}




/**
 * Less imposing factory function to construct an IndexSpace object.
 */
pub fn range3d(di: Range<i64>, dj: Range<i64>, dk: Range<i64>) -> IndexSpace {
    IndexSpace::new(di, dj, dk)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{range3d, Axis, IndexSpace};

    #[test]
    fn inclusive_extent_converts_both_ways() {
        let space = IndexSpace::from_extent([0, 3, -2, 1, 5, 5]);
        assert_eq!(space, range3d(0..4, -2..2, 5..6));
        assert_eq!(space.to_extent(), [0, 3, -2, 1, 5, 5]);
        assert_eq!(space.len(), 16);
    }

    #[test]
    fn intersection_of_touching_spaces_is_none() {
        let a = range3d(0..3, 0..3, 0..3);
        let b = range3d(3..6, 0..3, 0..3);
        assert!(a.intersect(&b).is_none());
        assert_eq!(a.extend_all(1).intersect(&b), Some(range3d(3..4, 0..3, 0..3)));
    }

    #[test]
    fn coarsen_uses_floor_division() {
        let fine = range3d(-3..5, 2..4, 0..1);
        assert_eq!(fine.coarsen([2, 2, 2]), range3d(-2..3, 1..2, 0..1));
        assert_eq!(range3d(1..3, 0..1, 0..1).refine([2, 3, 1]), range3d(2..6, 0..3, 0..1));
    }

    #[test]
    fn row_major_traversal_matches_offsets() {
        let space = range3d(1..3, -1..1, 4..7);
        for (n, index) in space.iter().enumerate() {
            assert_eq!(space.row_major_offset(index), n);
        }
        assert_eq!(space.iter().count(), space.len());
    }

    #[test]
    fn one_sided_extension_works() {
        let space = range3d(0..2, 0..2, 0..2);
        assert_eq!(space.extend_upper(1, Axis::J), range3d(0..2, 0..3, 0..2));
        assert_eq!(space.extend_lower(2, Axis::K), range3d(0..2, 0..2, -2..2));
        assert_eq!(space.points(), range3d(0..3, 0..3, 0..3));
        assert!(space.extend_all(1).contains_space(&space));
    }

    #[test]
    fn axis_indexes_round_trip() {
        for axis in Axis::ALL {
            assert_eq!(Axis::from_index(axis.index()), axis);
        }
    }

    #[test]
    #[should_panic]
    fn axis_index_out_of_range_panics() {
        Axis::from_index(3);
    }
}
