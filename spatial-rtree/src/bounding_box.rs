use crate::rtree::RTreeBounds;

/// A 2D bounding box in double precision, as produced by the geometry layer.
///
/// `BoundingBox` defines a rectangular area using the minimum (min_x, min_y)
/// and maximum (max_x, max_y) corners. The index stores a single-precision
/// copy of it, see [`BoundingBox::to_index_bounds`].
///
/// # Examples
///
/// ```rust
/// use spatial_rtree::BoundingBox;
///
/// let bbox = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
/// assert!(bbox.contains_point(50.0, 50.0));
///
/// let bounds = bbox.to_index_bounds().unwrap();
/// assert_eq!(bounds.max_x, 100.0);
/// ```
#[derive(Clone, Copy, PartialEq, Default, Debug, serde::Deserialize, serde::Serialize)]
pub struct BoundingBox {
    /// Minimum X coordinate
    pub min_x: f64,
    /// Minimum Y coordinate
    pub min_y: f64,
    /// Maximum X coordinate
    pub max_x: f64,
    /// Maximum Y coordinate
    pub max_y: f64,
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BoundingBox({}, {}, {}, {})", self.min_x, self.min_y, self.max_x, self.max_y)
    }
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> BoundingBox {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Returns the width of the bounding box.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Returns the height of the bounding box.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Returns the area of the bounding box.
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Returns the center point of the bounding box.
    pub fn center(&self) -> (f64, f64) {
        ((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }

    /// Checks if this bounding box contains a point.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Checks if this bounding box contains another bounding box.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.min_x >= self.min_x && other.max_x <= self.max_x
            && other.min_y >= self.min_y && other.max_y <= self.max_y
    }

    /// Checks if this bounding box intersects another bounding box.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x && self.max_x >= other.min_x
            && self.min_y <= other.max_y && self.max_y >= other.min_y
    }

    /// Returns the union of this bounding box with another.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Checks if this bounding box is valid (min <= max, no NaN).
    pub fn is_valid(&self) -> bool {
        self.min_x <= self.max_x && self.min_y <= self.max_y
    }

    /// Single-precision index bounds fully containing this box.
    ///
    /// The minimum corner is rounded toward negative infinity and the maximum
    /// corner toward positive infinity. Coordinates outside the `f32` range
    /// saturate at `f32::MIN` / `f32::MAX`. Returns `None` for invalid boxes.
    pub fn to_index_bounds(&self) -> Option<RTreeBounds> {
        if !self.is_valid() {
            return None;
        }
        Some(RTreeBounds::new(
            round_down(self.min_x),
            round_down(self.min_y),
            round_up(self.max_x),
            round_up(self.max_y),
        ))
    }
}

/// Source of cached bounding boxes for indexed values.
///
/// Values without derivable bounds (empty geometries, missing caches) return
/// `None` and are left out of the index.
pub trait GeometryBounds {
    fn cached_bounds(&self) -> Option<BoundingBox>;
}

impl GeometryBounds for BoundingBox {
    fn cached_bounds(&self) -> Option<BoundingBox> {
        Some(*self)
    }
}

fn round_down(value: f64) -> f32 {
    if value >= f32::MAX as f64 {
        return f32::MAX;
    }
    if value <= f32::MIN as f64 {
        return f32::MIN;
    }
    let nearest = value as f32;
    if nearest as f64 > value {
        next_toward_neg_inf(nearest)
    } else {
        nearest
    }
}

fn round_up(value: f64) -> f32 {
    if value >= f32::MAX as f64 {
        return f32::MAX;
    }
    if value <= f32::MIN as f64 {
        return f32::MIN;
    }
    let nearest = value as f32;
    if (nearest as f64) < value {
        next_toward_pos_inf(nearest)
    } else {
        nearest
    }
}

fn next_toward_neg_inf(value: f32) -> f32 {
    if value == 0.0 {
        return -f32::from_bits(1);
    }
    let bits = value.to_bits();
    if value > 0.0 {
        f32::from_bits(bits - 1)
    } else {
        f32::from_bits(bits + 1)
    }
}

fn next_toward_pos_inf(value: f32) -> f32 {
    if value == 0.0 {
        return f32::from_bits(1);
    }
    let bits = value.to_bits();
    if value > 0.0 {
        f32::from_bits(bits + 1)
    } else {
        f32::from_bits(bits - 1)
    }
}
