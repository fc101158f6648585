//! Utility types, used throughout the crate.

/// A float which is finite - neither NaN nor infinite.
// Because of the preconditions invalidating many bitpatterns, this is not Pod.
#[derive(Copy, Clone, PartialEq, PartialOrd, bytemuck::NoUninit, bytemuck::Zeroable, Debug)]
#[repr(transparent)]
pub struct FiniteF32(f32);
impl FiniteF32 {
    pub const ZERO: Self = Self(0.0);
    pub const ONE: Self = Self(1.0);
    pub fn new(val: f32) -> Result<Self, FiniteF32Error> {
        if val.is_finite() {
            Ok(Self(val))
        } else {
            Err(FiniteF32Error::NotFinite)
        }
    }
    #[must_use]
    pub fn get(self) -> f32 {
        self.0
    }
}

impl Default for FiniteF32 {
    fn default() -> Self {
        Self::ZERO
    }
}

impl TryFrom<f32> for FiniteF32 {
    type Error = FiniteF32Error;
    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
impl From<FiniteF32> for f32 {
    fn from(value: FiniteF32) -> Self {
        value.get()
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiniteF32Error {
    #[error("not finite")]
    NotFinite,
}

/// An integer pixel rectangle, half-open on the right and bottom edges.
///
/// A rect where `right <= left` or `bottom <= top` covers no pixels, see [`Rect::is_empty`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}
impl Rect {
    #[must_use]
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }
    /// Construct from a top-left corner and a size.
    #[must_use]
    pub fn from_xywh(x: i32, y: i32, width: u32, height: u32) -> Self {
        let width: i32 = az::saturating_cast(width);
        let height: i32 = az::saturating_cast(height);
        Self {
            left: x,
            top: y,
            right: x.saturating_add(width),
            bottom: y.saturating_add(height),
        }
    }
    /// The smallest integer rect covering the float-space box `[min, max]`.
    /// None if any coordinate is non-finite or the box is degenerate.
    #[must_use]
    pub fn enclosing(min: [f32; 2], max: [f32; 2]) -> Option<Self> {
        if !min.iter().chain(max.iter()).all(|v| v.is_finite()) {
            return None;
        }
        // Finite checked above, saturating_cast won't see a NaN.
        let rect = Self {
            left: az::saturating_cast(min[0].floor()),
            top: az::saturating_cast(min[1].floor()),
            right: az::saturating_cast(max[0].ceil()),
            bottom: az::saturating_cast(max[1].ceil()),
        };
        (!rect.is_empty()).then_some(rect)
    }
    #[must_use]
    pub fn width(&self) -> u32 {
        // i64 to dodge overflow on huge rects.
        az::saturating_cast((i64::from(self.right) - i64::from(self.left)).max(0))
    }
    #[must_use]
    pub fn height(&self) -> u32 {
        az::saturating_cast((i64::from(self.bottom) - i64::from(self.top)).max(0))
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }
    #[must_use]
    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
    /// Check if `other` lies entirely within self. Empty rects are contained by everything.
    #[must_use]
    pub fn contains(&self, other: &Rect) -> bool {
        other.is_empty()
            || (other.left >= self.left
                && other.top >= self.top
                && other.right <= self.right
                && other.bottom <= self.bottom)
    }
    /// The overlapping region, or None if they do not overlap.
    #[must_use]
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let rect = Rect {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        };
        (!rect.is_empty()).then_some(rect)
    }
    #[must_use]
    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersect(other).is_some()
    }
    /// Smallest rect containing both. Empty rects are ignored.
    #[must_use]
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }
    /// Grow every edge outward by `by` pixels.
    #[must_use]
    pub fn outset(&self, by: i32) -> Rect {
        Rect {
            left: self.left.saturating_sub(by),
            top: self.top.saturating_sub(by),
            right: self.right.saturating_add(by),
            bottom: self.bottom.saturating_add(by),
        }
    }
    /// Iterate every pixel coordinate within, row by row.
    pub fn pixels(&self) -> impl Iterator<Item = (i32, i32)> {
        let Rect {
            left,
            top,
            right,
            bottom,
        } = *self;
        (top..bottom).flat_map(move |y| (left..right).map(move |x| (x, y)))
    }
}

/// Fold rects into their union, or None if there were none.
pub fn union_all(rects: impl IntoIterator<Item = Rect>) -> Option<Rect> {
    rects
        .into_iter()
        .filter(|rect| !rect.is_empty())
        .reduce(|a, b| a.union(&b))
}

#[cfg(test)]
mod test {
    use super::{union_all, FiniteF32, Rect};

    #[test]
    fn finite() {
        assert!(FiniteF32::new(f32::NAN).is_err());
        assert!(FiniteF32::new(f32::INFINITY).is_err());
        assert_eq!(FiniteF32::new(0.5).unwrap().get(), 0.5);
    }
    #[test]
    fn intersect_and_union() {
        let a = Rect::from_xywh(0, 0, 10, 10);
        let b = Rect::from_xywh(5, 5, 10, 10);
        assert_eq!(a.intersect(&b), Some(Rect::new(5, 5, 10, 10)));
        assert_eq!(a.union(&b), Rect::new(0, 0, 15, 15));
        // Touching edges do not overlap, half-open!
        let c = Rect::from_xywh(10, 0, 5, 5);
        assert_eq!(a.intersect(&c), None);
        assert!(a.union(&c).contains(&c));
    }
    #[test]
    fn enclosing_rounds_outward() {
        let rect = Rect::enclosing([-0.5, 0.25], [3.1, 4.0]).unwrap();
        assert_eq!(rect, Rect::new(-1, 0, 4, 4));
        assert!(Rect::enclosing([f32::NAN, 0.0], [1.0, 1.0]).is_none());
        assert!(Rect::enclosing([1.0, 1.0], [1.0, 2.0]).is_none());
    }
    #[test]
    fn union_of_nothing() {
        assert_eq!(union_all([]), None);
        assert_eq!(
            union_all([Rect::from_xywh(0, 0, 0, 0), Rect::from_xywh(2, 2, 1, 1)]),
            Some(Rect::from_xywh(2, 2, 1, 1))
        );
    }
    #[test]
    fn pixel_iteration() {
        let pixels: Vec<_> = Rect::from_xywh(-1, 3, 2, 2).pixels().collect();
        assert_eq!(pixels, [(-1, 3), (0, 3), (-1, 4), (0, 4)]);
    }
}
