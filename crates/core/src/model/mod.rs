pub mod call_tree;
pub mod event;
pub mod frame;
pub mod profile;

pub use call_tree::{CallTree, CallTreeNode, NodeId};
pub use event::ProfilingEvent;
pub use frame::{Frame, FrameId, FrameInfo, FrameKey, FrameRegistry};
pub use profile::{Profile, ProfileError};
