//! Declarative geometry: size specs, alignment and reference modes, and the
//! resolver that turns them into concrete boxes.

pub mod geometry;
pub mod resolve;

pub use geometry::{Rect, Size};
pub use resolve::resolve;

use crate::tree::NodeId;

/// A layout axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Horizontal,
    Vertical,
}

impl Axis {
    pub const BOTH: [Axis; 2] = [Axis::Horizontal, Axis::Vertical];
}

/// Declared size along one axis.
///
/// # Examples
/// ```
/// use stagehand::layout::{percent, SizeSpec};
///
/// let fixed = SizeSpec::from(100.0);
/// assert_eq!(fixed, SizeSpec::Fixed(100.0));
/// assert_eq!(percent(50.0), SizeSpec::Percent(50.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SizeSpec {
    /// Exact size in pixels.
    Fixed(f32),
    /// Percentage of the reference box (parent or siblings).
    Percent(f32),
    /// Size derived from content or children.
    #[default]
    Auto,
}

/// Create a percentage size spec.
pub fn percent(pct: f32) -> SizeSpec {
    SizeSpec::Percent(pct)
}

/// f32 converts to a fixed size
impl From<f32> for SizeSpec {
    fn from(value: f32) -> Self {
        SizeSpec::Fixed(value)
    }
}

/// Placement of the resolved box inside the declared box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Align {
    #[default]
    Start,
    Center,
    End,
    /// The effective box equals the intrinsic size.
    Shrink,
}

/// What a percentage size is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reference {
    /// The parent's resolved box.
    #[default]
    Parent,
    /// The bounding box of all parent-referenced siblings.
    Siblings,
    /// The resolved box of one specific sibling.
    Sibling(NodeId),
}

impl Reference {
    pub fn is_parent(&self) -> bool {
        matches!(self, Reference::Parent)
    }
}

/// A value per axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PerAxis<T> {
    pub horizontal: T,
    pub vertical: T,
}

impl<T: Copy> PerAxis<T> {
    pub fn get(&self, axis: Axis) -> T {
        match axis {
            Axis::Horizontal => self.horizontal,
            Axis::Vertical => self.vertical,
        }
    }

    pub fn set(&mut self, axis: Axis, value: T) {
        match axis {
            Axis::Horizontal => self.horizontal = value,
            Axis::Vertical => self.vertical = value,
        }
    }
}
