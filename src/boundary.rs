//! Axis-aligned inclusive bounding box and ordered cell iteration.
//!
//! A [`Boundary`] is a minimum corner plus non-negative extents.  A box with
//! any zero extent is *empty*: it contains nothing and denotes "nothing
//! written yet".  Every operation returns a new value; boxes never mutate.
//!
//! Extents are `u64`: the widest box over the `i32` coordinate space spans
//! 2^32 cells per axis, which no narrower type can hold.
//!
//! # Linear order
//! Dense formats lay their cells out along an [`AxisOrder`].  The first axis
//! named is the slowest-varying one, so `YZX` (the Sponge/MCEdit layout)
//! gives `index = (y * dZ + z) * dX + x` relative to the minimum corner.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::VoxelError;
use crate::model::Position;

// ── Axis / AxisOrder ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    #[inline]
    fn of(self, p: Position) -> i32 {
        match self {
            Axis::X => p.x,
            Axis::Y => p.y,
            Axis::Z => p.z,
        }
    }
}

/// Cell iteration order, slowest axis first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum AxisOrder {
    XYZ,
    XZY,
    YXZ,
    #[default]
    YZX,
    ZXY,
    ZYX,
}

impl AxisOrder {
    pub const ALL: [AxisOrder; 6] = [
        AxisOrder::XYZ, AxisOrder::XZY, AxisOrder::YXZ,
        AxisOrder::YZX, AxisOrder::ZXY, AxisOrder::ZYX,
    ];

    /// Axes from slowest to fastest.
    pub fn axes(self) -> [Axis; 3] {
        use Axis::*;
        match self {
            AxisOrder::XYZ => [X, Y, Z],
            AxisOrder::XZY => [X, Z, Y],
            AxisOrder::YXZ => [Y, X, Z],
            AxisOrder::YZX => [Y, Z, X],
            AxisOrder::ZXY => [Z, X, Y],
            AxisOrder::ZYX => [Z, Y, X],
        }
    }

    /// Wire tag used by the VXL header.
    pub fn to_byte(self) -> u8 {
        match self {
            AxisOrder::XYZ => 0,
            AxisOrder::XZY => 1,
            AxisOrder::YXZ => 2,
            AxisOrder::YZX => 3,
            AxisOrder::ZXY => 4,
            AxisOrder::ZYX => 5,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        Self::ALL.get(b as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            AxisOrder::XYZ => "xyz",
            AxisOrder::XZY => "xzy",
            AxisOrder::YXZ => "yxz",
            AxisOrder::YZX => "yzx",
            AxisOrder::ZXY => "zxy",
            AxisOrder::ZYX => "zyx",
        }
    }
}

impl FromStr for AxisOrder {
    type Err = VoxelError;
    fn from_str(s: &str) -> Result<Self, VoxelError> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|o| o.name() == lower)
            .ok_or_else(|| VoxelError::invalid(format!("unknown axis order '{s}'")))
    }
}

impl fmt::Display for AxisOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Boundary ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Boundary {
    pub min_x: i32,
    pub min_y: i32,
    pub min_z: i32,
    pub d_x:   u64,
    pub d_y:   u64,
    pub d_z:   u64,
}

impl Boundary {
    pub const fn new(min: Position, d_x: u64, d_y: u64, d_z: u64) -> Self {
        Self { min_x: min.x, min_y: min.y, min_z: min.z, d_x, d_y, d_z }
    }

    /// Like [`new`](Self::new), but `None` when the box leaves the `i32`
    /// coordinate space or its volume does not fit a `u64`.  Decoders use
    /// this on header extents before trusting them.
    pub fn try_new(min: Position, d_x: u64, d_y: u64, d_z: u64) -> Option<Self> {
        let fits = |lo: i32, d: u64| {
            d == 0 || (lo as i128 + d as i128 - 1) <= i32::MAX as i128
        };
        if !(fits(min.x, d_x) && fits(min.y, d_y) && fits(min.z, d_z)) {
            return None;
        }
        let b = Self::new(min, d_x, d_y, d_z);
        b.checked_volume().map(|_| b)
    }

    /// The zero-volume box at the origin.
    pub const fn empty() -> Self {
        Self::new(Position::new(0, 0, 0), 0, 0, 0)
    }

    /// Smallest box containing both inclusive corners (in any order).
    pub fn from_min_and_max(a: Position, b: Position) -> Self {
        let span = |lo: i32, hi: i32| (hi as i64 - lo as i64 + 1) as u64;
        let min = Position::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z));
        let max = Position::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z));
        Self::new(min, span(min.x, max.x), span(min.y, max.y), span(min.z, max.z))
    }

    pub fn min(&self) -> Position {
        Position::new(self.min_x, self.min_y, self.min_z)
    }

    /// Inclusive maximum corner.  Meaningless for an empty box.
    pub fn max(&self) -> Position {
        Position::new(self.max_x(), self.max_y(), self.max_z())
    }

    pub fn max_x(&self) -> i32 { last(self.min_x, self.d_x) }
    pub fn max_y(&self) -> i32 { last(self.min_y, self.d_y) }
    pub fn max_z(&self) -> i32 { last(self.min_z, self.d_z) }

    /// Cell count, saturating at `u64::MAX`.
    pub fn volume(&self) -> u64 {
        self.d_x.saturating_mul(self.d_y).saturating_mul(self.d_z)
    }

    pub fn checked_volume(&self) -> Option<u64> {
        self.d_x.checked_mul(self.d_y)?.checked_mul(self.d_z)
    }

    pub fn is_empty(&self) -> bool {
        self.d_x == 0 || self.d_y == 0 || self.d_z == 0
    }

    pub fn contains(&self, p: Position) -> bool {
        let within = |v: i32, lo: i32, d: u64| {
            let off = v as i64 - lo as i64;
            off >= 0 && (off as u64) < d
        };
        within(p.x, self.min_x, self.d_x)
            && within(p.y, self.min_y, self.d_y)
            && within(p.z, self.min_z, self.d_z)
    }

    /// Smallest box containing `self` and `p`.  Never shrinks.
    pub fn expand_to_include(&self, p: Position) -> Self {
        if self.is_empty() {
            return Self::new(p, 1, 1, 1);
        }
        if self.contains(p) {
            return *self;
        }
        let lo = Position::new(self.min_x.min(p.x), self.min_y.min(p.y), self.min_z.min(p.z));
        let hi = Position::new(self.max_x().max(p.x), self.max_y().max(p.y), self.max_z().max(p.z));
        Self::from_min_and_max(lo, hi)
    }

    pub fn union(&self, other: &Boundary) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        self.expand_to_include(other.min()).expand_to_include(other.max())
    }

    fn extent(&self, axis: Axis) -> u64 {
        match axis {
            Axis::X => self.d_x,
            Axis::Y => self.d_y,
            Axis::Z => self.d_z,
        }
    }

    /// Linear cell index of `p` under `order`, or `None` outside the box.
    pub fn index_of(&self, p: Position, order: AxisOrder) -> Option<u64> {
        if !self.contains(p) {
            return None;
        }
        let min = self.min();
        let mut index = 0u64;
        for axis in order.axes() {
            let off = (axis.of(p) as i64 - axis.of(min) as i64) as u64;
            index = index.checked_mul(self.extent(axis))?.checked_add(off)?;
        }
        Some(index)
    }

    /// Inverse of [`index_of`](Self::index_of).  `index` must be below `volume()`.
    pub fn position_at(&self, mut index: u64, order: AxisOrder) -> Position {
        let mut offs = [0i64; 3];
        for axis in order.axes().into_iter().rev() {
            let d = self.extent(axis).max(1);
            let slot = match axis {
                Axis::X => 0,
                Axis::Y => 1,
                Axis::Z => 2,
            };
            offs[slot] = (index % d) as i64;
            index /= d;
        }
        Position::new(
            (self.min_x as i64 + offs[0]) as i32,
            (self.min_y as i64 + offs[1]) as i32,
            (self.min_z as i64 + offs[2]) as i32,
        )
    }

    /// Every cell in `order`.
    pub fn iter(&self, order: AxisOrder) -> BoundaryIter {
        BoundaryIter { boundary: *self, order, next: 0, end: self.volume() }
    }
}

/// Inclusive end of an axis clamped into `i32`.
fn last(lo: i32, d: u64) -> i32 {
    (lo as i128 + d as i128 - 1).clamp(i32::MIN as i128, i32::MAX as i128) as i32
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "boundary[min=({}, {}, {}) size={}x{}x{}]",
            self.min_x, self.min_y, self.min_z, self.d_x, self.d_y, self.d_z
        )
    }
}

pub struct BoundaryIter {
    boundary: Boundary,
    order:    AxisOrder,
    next:     u64,
    end:      u64,
}

impl Iterator for BoundaryIter {
    type Item = Position;

    fn next(&mut self) -> Option<Position> {
        if self.next >= self.end {
            return None;
        }
        let p = self.boundary.position_at(self.next, self.order);
        self.next += 1;
        Some(p)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.end - self.next) {
            Ok(left) => (left, Some(left)),
            Err(_) => (usize::MAX, None),
        }
    }
}
