use serde::{Deserialize, Serialize};

/// Axis-aligned face box in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f64 {
        if self.width <= 0 || self.height <= 0 {
            return 0.0;
        }
        self.width as f64 * self.height as f64
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Euclidean distance between the two box centers.
    pub fn center_distance(&self, other: &BoundingBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Right edge, widened so boxes near `i32::MAX` cannot overflow.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Intersection-over-Union; degenerate boxes overlap nothing.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x.max(other.x) as i64;
        let y1 = self.y.max(other.y) as i64;
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) as f64 * (y2 - y1) as f64;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Exponential smoothing towards `target`, per coordinate, with sizes
    /// floored at one pixel.
    pub fn smoothed_towards(&self, target: &BoundingBox, alpha: f64) -> BoundingBox {
        let blend = |new: i32, prev: i32| -> i32 {
            (alpha * new as f64 + (1.0 - alpha) * prev as f64).round() as i32
        };
        BoundingBox {
            x: blend(target.x, self.x),
            y: blend(target.y, self.y),
            width: blend(target.width, self.width).max(1),
            height: blend(target.height, self.height).max(1),
        }
    }

    /// Clamp to a `frame_width` x `frame_height` image; `None` when nothing
    /// of the box is inside the frame.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x.max(0) as i64;
        let y1 = self.y.max(0) as i64;
        let x2 = self.right().min(frame_width as i64);
        let y2 = self.bottom().min(frame_height as i64);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
    }
}
