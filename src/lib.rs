pub mod connection;
pub mod context;
pub mod error;
pub mod layout;
pub mod playback;
pub mod renderer;
pub mod stage;
pub mod sync;
pub mod tree;
pub mod value;

pub use context::{Binding, Context, Factory, FactoryRef};
pub use error::{ConnectError, LayoutError, Result, StageError, TransportError, TreeError};
pub use stage::{Stage, StageConfig, StageEvent};
pub use tree::{NodeId, Tree};
pub use value::Value;

pub mod prelude {
    pub use crate::connection::{Capabilities, ConnectionState};
    pub use crate::context::{Binding, Context, Factory, FactoryRef};
    pub use crate::layout::{Align, Axis, Rect, Reference, Size, SizeSpec, percent};
    pub use crate::playback::{Playback, PlaybackEvent};
    pub use crate::sync::{Batch, Command, WireId};
    pub use crate::tree::{NodeId, Tree, kinds};
    pub use crate::value::Value;
    pub use crate::{Stage, StageConfig, StageEvent};
}
