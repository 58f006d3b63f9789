//! Incremental call tree construction and replay for sampled profiles.
//!
//! Feed [`Profile::append_sample`] a stream of `(stack, time_delta)` pairs
//! as they come out of a profiler and it folds each one into a shared,
//! deduplicated call tree in O(depth) per sample. Read the result back
//! either per sample ([`Profile::for_each_sample`]) or as the balanced
//! open/close interval stream a flame graph renders
//! ([`Profile::for_each_call`]).
//!
//! Parsing trace formats into `FrameInfo` stacks and rendering the interval
//! stream are both out of scope here; this crate is only the model between
//! the two.

pub mod model;

pub use model::{
    CallTree, CallTreeNode, Frame, FrameId, FrameInfo, FrameKey, FrameRegistry, NodeId, Profile,
    ProfileError, ProfilingEvent,
};
