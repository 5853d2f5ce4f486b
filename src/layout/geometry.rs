use super::Axis;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub const fn zero() -> Self {
        Self {
            width: 0.0,
            height: 0.0,
        }
    }

    pub fn along(&self, axis: Axis) -> f32 {
        match axis {
            Axis::Horizontal => self.width,
            Axis::Vertical => self.height,
        }
    }

    pub fn set_along(&mut self, axis: Axis, value: f32) {
        match axis {
            Axis::Horizontal => self.width = value,
            Axis::Vertical => self.height = value,
        }
    }
}

impl Default for Size {
    fn default() -> Self {
        Self::zero()
    }
}

/// An axis-aligned box in the parent's coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Extent along an axis.
    pub fn extent(&self, axis: Axis) -> f32 {
        self.size().along(axis)
    }

    pub fn set_axis(&mut self, axis: Axis, origin: f32, extent: f32) {
        match axis {
            Axis::Horizontal => {
                self.x = origin;
                self.width = extent;
            }
            Axis::Vertical => {
                self.y = origin;
                self.height = extent;
            }
        }
    }
}

/// One-dimensional span used for per-axis bounding boxes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Span {
    pub start: f32,
    pub end: f32,
}

impl Span {
    pub fn extent(&self) -> f32 {
        (self.end - self.start).max(0.0)
    }

    pub fn union(a: Option<Span>, b: Span) -> Span {
        match a {
            Some(a) => Span {
                start: a.start.min(b.start),
                end: a.end.max(b.end),
            },
            None => b,
        }
    }
}
