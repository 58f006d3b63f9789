use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Caller-supplied identity for a stack location, unique within a profile.
///
/// Sample sources key frames however their format does — numeric node ids,
/// `name:file:line` strings, addresses rendered as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameKey {
    Num(u64),
    Name(String),
}

impl From<u64> for FrameKey {
    fn from(key: u64) -> Self {
        FrameKey::Num(key)
    }
}

impl From<&str> for FrameKey {
    fn from(key: &str) -> Self {
        FrameKey::Name(key.to_string())
    }
}

impl From<String> for FrameKey {
    fn from(key: String) -> Self {
        FrameKey::Name(key)
    }
}

/// Descriptor for one stack location as it arrives from a sample source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub key: FrameKey,
    /// Display name (function, method, symbol).
    pub name: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub col: Option<u32>,
}

impl FrameInfo {
    pub fn new(key: impl Into<FrameKey>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            file: None,
            line: None,
            col: None,
        }
    }
}

/// Index of a `Frame` in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(pub(crate) usize);

impl FrameId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A deduplicated stack location with profile-wide timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub key: FrameKey,
    pub name: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub col: Option<u32>,
    /// Time this frame spent as the leaf of a sampled stack (µs).
    pub self_time: f64,
    /// Time this frame spent anywhere on a sampled stack (µs).
    pub total_time: f64,
}

/// Owning store of frames, deduplicated by key.
///
/// Everything else in the profile refers to frames through `FrameId`;
/// timing accumulation happens at the profile layer, not here.
#[derive(Debug, Clone, Default)]
pub struct FrameRegistry {
    frames: Vec<Frame>,
    index: HashMap<FrameKey, FrameId>,
}

impl FrameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `info.key`, inserting a new frame on first sight.
    ///
    /// Only the first observed metadata for a key is retained: registering
    /// the same key again with a different name or location is a caller
    /// error and is not detected here.
    pub fn get_or_create(&mut self, info: &FrameInfo) -> FrameId {
        if let Some(&id) = self.index.get(&info.key) {
            return id;
        }
        let id = FrameId(self.frames.len());
        self.frames.push(Frame {
            key: info.key.clone(),
            name: info.name.clone(),
            file: info.file.clone(),
            line: info.line,
            col: info.col,
            self_time: 0.0,
            total_time: 0.0,
        });
        self.index.insert(info.key.clone(), id);
        id
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.0]
    }

    pub(crate) fn frame_mut(&mut self, id: FrameId) -> &mut Frame {
        &mut self.frames[id.0]
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// All registered frames in registry iteration order.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}
