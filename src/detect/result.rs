use serde::{Deserialize, Serialize};

/// One detected box in image pixel coordinates.
///
/// `x`/`y` is the top-left corner. Width and height are expected to be
/// non-negative but are not validated; degenerate boxes flow through the
/// arithmetic as given.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectedBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub confidence: f64,
    pub label: String,
}

impl DetectedBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64, confidence: f64, label: impl Into<String>) -> Self {
        Self {
            x,
            y,
            w,
            h,
            confidence,
            label: label.into(),
        }
    }

    pub fn area(&self) -> f64 {
        self.w * self.h
    }

    /// Intersection over union with another box.
    ///
    /// Returns 0 for disjoint or edge-touching boxes and when the union is
    /// not positive.
    pub fn iou(&self, other: &DetectedBox) -> f64 {
        let inter_x_min = self.x.max(other.x);
        let inter_y_min = self.y.max(other.y);
        let inter_x_max = (self.x + self.w).min(other.x + other.w);
        let inter_y_max = (self.y + self.h).min(other.y + other.h);

        if inter_x_max <= inter_x_min || inter_y_max <= inter_y_min {
            return 0.0;
        }

        let inter_area = (inter_x_max - inter_x_min) * (inter_y_max - inter_y_min);
        let union_area = self.area() + other.area() - inter_area;
        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, side: f64) -> DetectedBox {
        DetectedBox::new(x, y, side, side, 0.9, "object")
    }

    #[test]
    fn identical_boxes_have_unit_iou() {
        let a = square(0.0, 0.0, 10.0);
        assert_eq!(a.iou(&a.clone()), 1.0);
    }

    #[test]
    fn disjoint_boxes_have_zero_iou() {
        assert_eq!(square(0.0, 0.0, 10.0).iou(&square(20.0, 20.0, 10.0)), 0.0);
    }

    #[test]
    fn touching_edges_do_not_overlap() {
        assert_eq!(square(0.0, 0.0, 10.0).iou(&square(10.0, 0.0, 10.0)), 0.0);
    }

    #[test]
    fn partial_overlap() {
        // 5x10 intersection, union 100 + 100 - 50.
        let iou = square(0.0, 0.0, 10.0).iou(&square(5.0, 0.0, 10.0));
        assert!((iou - 50.0 / 150.0).abs() < 1e-12);
    }

    #[test]
    fn iou_is_symmetric() {
        let boxes = [
            square(0.0, 0.0, 10.0),
            square(3.0, 4.0, 7.5),
            DetectedBox::new(1.0, 2.0, 30.0, 4.0, 0.4, "object"),
            DetectedBox::new(-5.0, -5.0, 8.0, 12.0, 0.4, "object"),
            square(100.0, 100.0, 1.0),
        ];
        for a in &boxes {
            for b in &boxes {
                assert_eq!(a.iou(b), b.iou(a));
            }
        }
    }

    #[test]
    fn zero_area_boxes_have_zero_iou() {
        let a = DetectedBox::new(0.0, 0.0, 0.0, 0.0, 0.5, "object");
        assert_eq!(a.iou(&a.clone()), 0.0);
    }

    #[test]
    fn contained_box() {
        let outer = square(0.0, 0.0, 10.0);
        let inner = square(2.0, 2.0, 5.0);
        assert!((outer.iou(&inner) - 0.25).abs() < 1e-12);
    }
}
