use tracing::debug;

use crate::config::GeometryLimits;
use crate::geometry::BoundingBox;

/// Whether a box is plausible as a bird in an `image_width x image_height` frame.
///
/// Pure and total: inverted, empty, non-finite or out-of-bounds boxes yield
/// `false`, never a panic.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn is_plausible(
    bbox: &BoundingBox,
    image_width: u32,
    image_height: u32,
    limits: &GeometryLimits,
) -> bool {
    if !bbox.is_finite() || image_width == 0 || image_height == 0 {
        return false;
    }

    let width = bbox.width();
    let height = bbox.height();

    if width < limits.min_box_size || height < limits.min_box_size {
        debug!(width, height, "rejected: too small");
        return false;
    }

    let aspect = width / height;
    if !(limits.min_aspect_ratio..=limits.max_aspect_ratio).contains(&aspect) {
        debug!(aspect, "rejected: aspect ratio");
        return false;
    }

    let img_w = image_width as f32;
    let img_h = image_height as f32;
    if bbox.left < 0.0 || bbox.top < 0.0 || bbox.right > img_w || bbox.bottom > img_h {
        debug!(?bbox, "rejected: outside image");
        return false;
    }

    let relative_area = (width * height) / (img_w * img_h);
    if relative_area < limits.min_relative_area {
        debug!(relative_area, "rejected: area too small relative to image");
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn limits() -> GeometryLimits {
        GeometryLimits::default()
    }

    #[test]
    fn test_accepts_reasonable_box() {
        let b = BoundingBox::new(100.0, 100.0, 300.0, 250.0);
        assert!(is_plausible(&b, 1000, 800, &limits()));
    }

    #[test]
    fn test_rejects_small_sides() {
        let b = BoundingBox::new(100.0, 100.0, 139.0, 300.0);
        assert!(!is_plausible(&b, 1000, 800, &limits()));
    }

    #[test]
    fn test_rejects_extreme_aspect() {
        // 400 x 100 -> 4.0
        let wide = BoundingBox::new(0.0, 0.0, 400.0, 100.0);
        // 50 x 200 -> 0.25
        let tall = BoundingBox::new(0.0, 0.0, 50.0, 200.0);
        assert!(!is_plausible(&wide, 1000, 800, &limits()));
        assert!(!is_plausible(&tall, 1000, 800, &limits()));
    }

    #[test]
    fn test_aspect_bounds_are_inclusive() {
        // 350 x 100 -> exactly 3.5
        let b = BoundingBox::new(0.0, 0.0, 350.0, 100.0);
        assert!(is_plausible(&b, 1000, 800, &limits()));
    }

    #[test]
    fn test_rejects_out_of_bounds() {
        let b = BoundingBox::new(-1.0, 10.0, 100.0, 110.0);
        assert!(!is_plausible(&b, 1000, 800, &limits()));
        let b = BoundingBox::new(900.0, 10.0, 1000.5, 110.0);
        assert!(!is_plausible(&b, 1000, 800, &limits()));
    }

    #[test]
    fn test_rejects_small_relative_area() {
        // 60 x 60 = 3600 < 1% of 4000 x 3000
        let b = BoundingBox::new(0.0, 0.0, 60.0, 60.0);
        assert!(!is_plausible(&b, 4000, 3000, &limits()));
        assert!(is_plausible(&b, 400, 300, &limits()));
    }

    #[test]
    fn test_inverted_and_non_finite_boxes_are_invalid() {
        let inverted = BoundingBox::new(300.0, 300.0, 100.0, 100.0);
        assert!(!is_plausible(&inverted, 1000, 800, &limits()));
        let nan = BoundingBox::new(f32::NAN, 0.0, 100.0, 100.0);
        assert!(!is_plausible(&nan, 1000, 800, &limits()));
        let inf = BoundingBox::new(0.0, 0.0, f32::INFINITY, 100.0);
        assert!(!is_plausible(&inf, 1000, 800, &limits()));
    }

    #[test]
    fn test_zero_sized_image_is_invalid() {
        let b = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        assert!(!is_plausible(&b, 0, 800, &limits()));
    }

    proptest! {
        #[test]
        fn test_verdict_is_idempotent(
            l in -100.0f32..1100.0, t in -100.0f32..900.0,
            w in -50.0f32..800.0, h in -50.0f32..800.0,
        ) {
            let b = BoundingBox::new(l, t, l + w, t + h);
            prop_assert_eq!(
                is_plausible(&b, 1000, 800, &limits()),
                is_plausible(&b, 1000, 800, &limits())
            );
        }

        #[test]
        fn test_inside_box_valid_until_shrunk_below_minimum(
            l in 0.0f32..400.0, t in 0.0f32..150.0,
            w in 150.0f32..300.0, aspect in 0.5f32..1.5,
        ) {
            let h = w / aspect;
            let b = BoundingBox::new(l, t, l + w, t + h);
            prop_assert!(is_plausible(&b, 1000, 800, &limits()));

            let shrunk = BoundingBox::new(l, t, l + 39.0, t + h);
            prop_assert!(!is_plausible(&shrunk, 1000, 800, &limits()));
        }
    }
}
