//! Geometric primitives used throughout the render core.
//!
//! All coordinates are integer, output-local, with the origin in the top-left
//! corner and the y-axis pointing down. [`Region`] is the damage currency of the
//! frame pipeline; [`OutputTransform`] describes how a buffer's orientation
//! relates to the logical image it carries.

use glam::Mat4;
use std::fmt;

/// A 2D point in output-local pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A 2D size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Returns `true` when either dimension is zero or negative.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    /// Width and height exchanged.
    pub fn transposed(&self) -> Self {
        Self::new(self.height, self.width)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An axis-aligned rectangle. Empty when width or height is not positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn from_origin_and_size(origin: Point, size: Size) -> Self {
        Self::new(origin.x, origin.y, size.width, size.height)
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        self.size().area()
    }

    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.right() && p.y >= self.y && p.y < self.bottom()
    }

    /// Returns `true` when `other` lies entirely inside `self`.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        if other.is_empty() {
            return true;
        }
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersection(other).is_empty()
    }

    /// The overlapping part of two rectangles, or an empty rect.
    pub fn intersection(&self, other: &Rect) -> Rect {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        if x2 <= x1 || y2 <= y1 {
            Rect::default()
        } else {
            Rect::new(x1, y1, x2 - x1, y2 - y1)
        }
    }

    /// Smallest rectangle containing both. Empty inputs are ignored.
    pub fn bounding(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = self.right().max(other.right());
        let y2 = self.bottom().max(other.bottom());
        Rect::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// The rectangle covering both, if they share a whole edge.
    fn joined(&self, other: &Rect) -> Option<Rect> {
        let same_rows = self.y == other.y && self.height == other.height;
        let same_columns = self.x == other.x && self.width == other.width;
        let side_by_side = same_rows && (self.right() == other.x || other.right() == self.x);
        let stacked = same_columns && (self.bottom() == other.y || other.bottom() == self.y);
        (side_by_side || stacked).then(|| self.bounding(other))
    }

    /// Splits `self` minus `other` into at most four disjoint pieces.
    fn subtract_into(&self, other: &Rect, out: &mut Vec<Rect>) {
        let overlap = self.intersection(other);
        if overlap.is_empty() {
            out.push(*self);
            return;
        }
        // Full-width bands above and below the overlap, then the side slivers.
        if overlap.y > self.y {
            out.push(Rect::new(self.x, self.y, self.width, overlap.y - self.y));
        }
        if overlap.bottom() < self.bottom() {
            out.push(Rect::new(
                self.x,
                overlap.bottom(),
                self.width,
                self.bottom() - overlap.bottom(),
            ));
        }
        if overlap.x > self.x {
            out.push(Rect::new(self.x, overlap.y, overlap.x - self.x, overlap.height));
        }
        if overlap.right() < self.right() {
            out.push(Rect::new(
                overlap.right(),
                overlap.y,
                self.right() - overlap.right(),
                overlap.height,
            ));
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// A set of pixels, stored as disjoint rectangles.
///
/// Equality is by covered area, not by the particular decomposition.
#[derive(Debug, Clone, Default)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self { rects: Vec::new() }
    }

    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.add_rect(rect);
        region
    }

    pub fn from_rects<I: IntoIterator<Item = Rect>>(rects: I) -> Self {
        let mut region = Self::new();
        for rect in rects {
            region.add_rect(rect);
        }
        region
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn area(&self) -> i64 {
        self.rects.iter().map(Rect::area).sum()
    }

    pub fn bounding_rect(&self) -> Rect {
        self.rects
            .iter()
            .fold(Rect::default(), |acc, r| acc.bounding(r))
    }

    /// Adds `rect` to the region, keeping the stored rectangles disjoint.
    pub fn add_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let mut pieces = vec![rect];
        for existing in &self.rects {
            let mut next = Vec::with_capacity(pieces.len());
            for piece in &pieces {
                piece.subtract_into(existing, &mut next);
            }
            pieces = next;
            if pieces.is_empty() {
                return;
            }
        }
        self.rects.extend(pieces);
        self.coalesce();
    }

    /// Merges rectangles sharing a whole edge until no two do.
    fn coalesce(&mut self) {
        'scan: loop {
            for i in 0..self.rects.len() {
                for j in i + 1..self.rects.len() {
                    if let Some(joined) = self.rects[i].joined(&self.rects[j]) {
                        self.rects[i] = joined;
                        self.rects.swap_remove(j);
                        continue 'scan;
                    }
                }
            }
            break;
        }
    }

    pub fn union(&self, other: &Region) -> Region {
        let mut out = self.clone();
        out.union_with(other);
        out
    }

    pub fn union_with(&mut self, other: &Region) {
        for rect in &other.rects {
            self.add_rect(*rect);
        }
    }

    pub fn intersection(&self, other: &Region) -> Region {
        let mut rects = Vec::new();
        for a in &self.rects {
            for b in &other.rects {
                let overlap = a.intersection(b);
                if !overlap.is_empty() {
                    rects.push(overlap);
                }
            }
        }
        // Pairwise overlaps of two disjoint sets are themselves disjoint.
        Region { rects }
    }

    pub fn intersected_with_rect(&self, rect: &Rect) -> Region {
        self.intersection(&Region::from_rect(*rect))
    }

    pub fn subtracted(&self, other: &Region) -> Region {
        let mut current = self.rects.clone();
        for cut in &other.rects {
            let mut next = Vec::with_capacity(current.len());
            for rect in &current {
                rect.subtract_into(cut, &mut next);
            }
            current = next;
        }
        Region { rects: current }
    }

    pub fn intersects_rect(&self, rect: &Rect) -> bool {
        self.rects.iter().any(|r| r.intersects(rect))
    }

    pub fn contains_rect(&self, rect: &Rect) -> bool {
        Region::from_rect(*rect).subtracted(self).is_empty()
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Region {
        Region {
            rects: self.rects.iter().map(|r| r.translated(dx, dy)).collect(),
        }
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.area() == other.area()
            && self.subtracted(other).is_empty()
            && other.subtracted(self).is_empty()
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

/// Orientation of a buffer relative to the logical image it holds.
///
/// The rotations are counter-clockwise; the flipped variants mirror around the
/// vertical axis before rotating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputTransform {
    #[default]
    Normal,
    Rotated90,
    Rotated180,
    Rotated270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl OutputTransform {
    /// The 2x2 linear part acting on coordinates centred on the image,
    /// as `[[m00, m01], [m10, m11]]` with `x' = m00*x + m01*y`, `y' = m10*x + m11*y`.
    fn linear(self) -> [[i32; 2]; 2] {
        match self {
            OutputTransform::Normal => [[1, 0], [0, 1]],
            OutputTransform::Rotated90 => [[0, 1], [-1, 0]],
            OutputTransform::Rotated180 => [[-1, 0], [0, -1]],
            OutputTransform::Rotated270 => [[0, -1], [1, 0]],
            OutputTransform::Flipped => [[-1, 0], [0, 1]],
            OutputTransform::Flipped90 => [[0, 1], [1, 0]],
            OutputTransform::Flipped180 => [[1, 0], [0, -1]],
            OutputTransform::Flipped270 => [[0, -1], [-1, 0]],
        }
    }

    fn from_linear(m: [[i32; 2]; 2]) -> Self {
        const ALL: [OutputTransform; 8] = [
            OutputTransform::Normal,
            OutputTransform::Rotated90,
            OutputTransform::Rotated180,
            OutputTransform::Rotated270,
            OutputTransform::Flipped,
            OutputTransform::Flipped90,
            OutputTransform::Flipped180,
            OutputTransform::Flipped270,
        ];
        ALL.into_iter()
            .find(|t| t.linear() == m)
            .unwrap_or(OutputTransform::Normal)
    }

    /// Whether the transform exchanges width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            OutputTransform::Rotated90
                | OutputTransform::Rotated270
                | OutputTransform::Flipped90
                | OutputTransform::Flipped270
        )
    }

    pub fn inverted(self) -> Self {
        match self {
            OutputTransform::Rotated90 => OutputTransform::Rotated270,
            OutputTransform::Rotated270 => OutputTransform::Rotated90,
            other => other,
        }
    }

    /// `self` applied after `first`.
    pub fn combine(self, first: OutputTransform) -> Self {
        let a = self.linear();
        let b = first.linear();
        let mut m = [[0; 2]; 2];
        for (i, row) in m.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = a[i][0] * b[0][j] + a[i][1] * b[1][j];
            }
        }
        Self::from_linear(m)
    }

    pub fn map_size(self, size: Size) -> Size {
        if self.swaps_axes() {
            size.transposed()
        } else {
            size
        }
    }

    /// Maps a rectangle inside an image of `bounds` to the transformed image.
    pub fn map_rect(self, rect: Rect, bounds: Size) -> Rect {
        if self == OutputTransform::Normal || rect.is_empty() {
            return rect;
        }
        let m = self.linear();
        let target = self.map_size(bounds);
        // Work in doubled coordinates so half-pixel centres stay integral.
        let map = |px: i32, py: i32| -> (i32, i32) {
            let cx = 2 * px - bounds.width;
            let cy = 2 * py - bounds.height;
            let tx = m[0][0] * cx + m[0][1] * cy;
            let ty = m[1][0] * cx + m[1][1] * cy;
            ((tx + target.width) / 2, (ty + target.height) / 2)
        };
        let (ax, ay) = map(rect.x, rect.y);
        let (bx, by) = map(rect.right(), rect.bottom());
        Rect::new(ax.min(bx), ay.min(by), (ax - bx).abs(), (ay - by).abs())
    }

    pub fn map_region(self, region: &Region, bounds: Size) -> Region {
        Region::from_rects(region.rects().iter().map(|r| self.map_rect(*r, bounds)))
    }

    /// The transform as a matrix acting on centred coordinates.
    pub fn to_mat4(self) -> Mat4 {
        let m = self.linear();
        Mat4::from_cols_array(&[
            m[0][0] as f32,
            m[1][0] as f32,
            0.0,
            0.0,
            m[0][1] as f32,
            m[1][1] as f32,
            0.0,
            0.0,
            0.0,
            0.0,
            1.0,
            0.0,
            0.0,
            0.0,
            0.0,
            1.0,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn rect_intersection_and_bounding() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.intersection(&b), Rect::new(5, 5, 5, 5));
        assert_eq!(a.bounding(&b), Rect::new(0, 0, 15, 15));
        assert!(a.intersection(&Rect::new(20, 20, 1, 1)).is_empty());
    }

    #[test]
    fn region_union_keeps_rects_disjoint() {
        let mut region = Region::from_rect(Rect::new(0, 0, 10, 10));
        region.add_rect(Rect::new(5, 5, 10, 10));
        assert_eq!(region.area(), 100 + 100 - 25);
        for (i, a) in region.rects().iter().enumerate() {
            for b in region.rects().iter().skip(i + 1) {
                assert!(!a.intersects(b), "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn region_union_merges_adjacent_rects() {
        let side_by_side = Region::from_rects([Rect::new(0, 0, 10, 10), Rect::new(10, 0, 10, 10)]);
        assert_eq!(side_by_side.rects(), &[Rect::new(0, 0, 20, 10)]);

        let mut overlapping = Region::from_rect(Rect::new(0, 0, 10, 10));
        overlapping.add_rect(Rect::new(5, 0, 10, 10));
        assert_eq!(overlapping.rects(), &[Rect::new(0, 0, 15, 10)]);

        let rows = Region::from_rects((0..10).map(|y| Rect::new(0, y, 32, 1)));
        assert_eq!(rows.rects(), &[Rect::new(0, 0, 32, 10)]);
    }

    #[test]
    fn repeated_unions_stay_compact() {
        // A square sliding right one pixel per frame, every frame unioned in.
        let mut region = Region::new();
        for step in 0..10 {
            region.union_with(&Region::from_rect(Rect::new(step, 0, 4, 4)));
        }
        assert_eq!(region.rects(), &[Rect::new(0, 0, 13, 4)]);

        let mut diagonal = Region::new();
        for step in 0..10 {
            diagonal.union_with(&Region::from_rect(Rect::new(step, step, 4, 4)));
        }
        assert_eq!(diagonal.area(), 16 + 9 * 7);
        assert!(diagonal.rects().len() <= 13, "{} rects", diagonal.rects().len());
    }

    #[test]
    fn region_equality_ignores_decomposition() {
        let split = Region::from_rects([Rect::new(0, 0, 5, 10), Rect::new(5, 0, 5, 10)]);
        let whole = Region::from_rect(Rect::new(0, 0, 10, 10));
        assert_eq!(split, whole);
        assert_ne!(split, Region::from_rect(Rect::new(0, 0, 10, 9)));
    }

    #[test]
    fn region_subtraction_and_intersection() {
        let whole = Region::from_rect(Rect::new(0, 0, 10, 10));
        let hole = Region::from_rect(Rect::new(2, 2, 3, 3));
        let ring = whole.subtracted(&hole);
        assert_eq!(ring.area(), 91);
        assert!(ring.intersection(&hole).is_empty());
        assert_eq!(whole.intersection(&hole), hole);
    }

    #[test]
    fn transform_inverse_and_combine() {
        for t in [
            OutputTransform::Normal,
            OutputTransform::Rotated90,
            OutputTransform::Rotated180,
            OutputTransform::Rotated270,
            OutputTransform::Flipped,
            OutputTransform::Flipped90,
            OutputTransform::Flipped180,
            OutputTransform::Flipped270,
        ] {
            assert_eq!(t.inverted().combine(t), OutputTransform::Normal, "{t:?}");
        }
        assert_eq!(
            OutputTransform::Rotated90.combine(OutputTransform::Rotated90),
            OutputTransform::Rotated180
        );
    }

    #[test]
    fn transform_maps_rects_inside_bounds() {
        let bounds = Size::new(100, 50);
        let rect = Rect::new(0, 0, 10, 20);
        assert_eq!(OutputTransform::Rotated180.map_rect(rect, bounds), Rect::new(90, 30, 10, 20));
        let rotated = OutputTransform::Rotated90.map_rect(rect, bounds);
        assert_eq!(rotated.size(), Size::new(20, 10));
        assert!(Rect::from_size(Size::new(50, 100)).contains_rect(&rotated));
        assert_eq!(OutputTransform::Flipped.map_rect(rect, bounds), Rect::new(90, 0, 10, 20));
    }

    #[test]
    fn transform_matrix_matches_linear_part() {
        let v = OutputTransform::Rotated90.to_mat4() * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert_eq!((v.x, v.y), (0.0, -1.0));
        let v = OutputTransform::Flipped.to_mat4() * Vec4::new(1.0, 2.0, 0.0, 1.0);
        assert_eq!((v.x, v.y), (-1.0, 2.0));
    }
}
