use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-image pixel coordinates.
///
/// Edges are stored as given; nothing stops `right < left`. Such boxes
/// report non-positive width/height and are rejected by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Builds a box from center/size, the layout YOLO heads emit.
    #[must_use]
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            left: cx - w / 2.0,
            top: cy - h / 2.0,
            right: cx + w / 2.0,
            bottom: cy + h / 2.0,
        }
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    #[must_use]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    #[must_use]
    pub fn center(&self) -> (f32, f32) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        [self.left, self.top, self.right, self.bottom]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Clamps every edge into `[0, width] x [0, height]`.
    #[must_use]
    pub fn clamped(&self, width: f32, height: f32) -> Self {
        Self {
            left: self.left.max(0.0),
            top: self.top.max(0.0),
            right: self.right.min(width),
            bottom: self.bottom.min(height),
        }
    }

    /// Intersection over union.
    ///
    /// Disjoint or edge-touching boxes give exactly `0.0`; a degenerate union
    /// (both boxes empty) also gives `0.0` rather than NaN.
    #[must_use]
    pub fn iou(&self, other: &Self) -> f32 {
        let inter_left = self.left.max(other.left);
        let inter_top = self.top.max(other.top);
        let inter_right = self.right.min(other.right);
        let inter_bottom = self.bottom.min(other.bottom);

        if inter_left >= inter_right || inter_top >= inter_bottom {
            return 0.0;
        }

        let inter_area = (inter_right - inter_left) * (inter_bottom - inter_top);
        let union = self.area() + other.area() - inter_area;

        if union > f32::EPSILON {
            inter_area / union
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_from_center_round_trips_dimensions() {
        let b = BoundingBox::from_center(100.0, 50.0, 40.0, 20.0);
        assert_eq!(b, BoundingBox::new(80.0, 40.0, 120.0, 60.0));
        assert_eq!(b.center(), (100.0, 50.0));
        assert!((b.area() - 800.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_iou_identical_is_one() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint_is_exactly_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_touching_edges_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        // 50 / (100 + 100 - 50)
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_clamped_respects_bounds() {
        let b = BoundingBox::new(-5.0, -1.0, 120.0, 90.0).clamped(100.0, 80.0);
        assert_eq!(b, BoundingBox::new(0.0, 0.0, 100.0, 80.0));
    }

    proptest! {
        #[test]
        fn test_iou_is_symmetric_and_bounded(
            l1 in 0.0f32..500.0, t1 in 0.0f32..500.0, w1 in 1.0f32..300.0, h1 in 1.0f32..300.0,
            l2 in 0.0f32..500.0, t2 in 0.0f32..500.0, w2 in 1.0f32..300.0, h2 in 1.0f32..300.0,
        ) {
            let a = BoundingBox::new(l1, t1, l1 + w1, t1 + h1);
            let b = BoundingBox::new(l2, t2, l2 + w2, t2 + h2);
            let ab = a.iou(&b);
            let ba = b.iou(&a);
            prop_assert!((ab - ba).abs() < 1e-5);
            prop_assert!((0.0..=1.0 + 1e-5).contains(&ab));
        }
    }
}
