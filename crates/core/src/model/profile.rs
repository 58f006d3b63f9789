use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::model::call_tree::{CallTree, CallTreeNode, NodeId};
use crate::model::event::ProfilingEvent;
use crate::model::frame::{Frame, FrameId, FrameInfo, FrameKey, FrameRegistry};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("time delta must be a finite, non-negative number of µs, got {0}")]
    InvalidTimeDelta(f64),
}

/// A sampled profile under incremental construction: the frame registry,
/// the merged call tree, and the ordered sample ledger, plus profile-level
/// metadata (fixed total duration, side-channel events).
///
/// Built once by repeated [`append_sample`](Profile::append_sample) calls,
/// then read through the traversals. There is no deletion or re-weighting
/// of an appended sample.
#[derive(Debug, Clone)]
pub struct Profile {
    duration: f64,
    registry: FrameRegistry,
    tree: CallTree,
    /// Leaf node per sample, in append order.
    samples: Vec<NodeId>,
    /// Elapsed µs since the previous sample; always `samples.len()` long.
    weights: Vec<f64>,
    events: Vec<ProfilingEvent>,
}

impl Profile {
    /// Create an empty profile with a fixed total duration (µs).
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            registry: FrameRegistry::new(),
            tree: CallTree::new(),
            samples: Vec::new(),
            weights: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn events(&self) -> &[ProfilingEvent] {
        &self.events
    }

    pub fn push_event(&mut self, event: ProfilingEvent) {
        self.events.push(event);
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        self.registry.frame(id)
    }

    pub fn node(&self, id: NodeId) -> &CallTreeNode {
        self.tree.node(id)
    }

    /// Root nodes of the call tree forest, in first-appearance order.
    pub fn roots(&self) -> &[NodeId] {
        self.tree.roots()
    }

    pub fn frame_count(&self) -> usize {
        self.registry.len()
    }

    pub fn node_count(&self) -> usize {
        self.tree.len()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Fold one sampled stack (root-to-leaf) into the profile.
    ///
    /// `time_delta` is the elapsed µs since the previous sample and must be
    /// finite and non-negative; anything else is rejected before any state
    /// is touched. An empty stack is silently dropped.
    ///
    /// The stack is merged against the most recently inserted path only
    /// (see [`CallTree::merge_stack`]), every node on the path and every
    /// distinct frame on the stack gains `time_delta` of total time, the
    /// leaf node and its frame gain it as self time, and the sample lands
    /// in the ledger.
    pub fn append_sample(
        &mut self,
        stack: &[FrameInfo],
        time_delta: f64,
    ) -> Result<(), ProfileError> {
        if !time_delta.is_finite() || time_delta < 0.0 {
            return Err(ProfileError::InvalidTimeDelta(time_delta));
        }
        if stack.is_empty() {
            return Ok(());
        }
        let ids: Vec<FrameId> = stack
            .iter()
            .map(|info| self.registry.get_or_create(info))
            .collect();
        self.append_resolved(&ids, time_delta);
        Ok(())
    }

    /// Merge an already-validated, non-empty stack of registered frames.
    /// Shared by `append_sample` and the sorted replay.
    fn append_resolved(&mut self, ids: &[FrameId], delta: f64) {
        let Some(leaf) = self.tree.merge_stack(ids, delta) else {
            return;
        };
        // A frame recurring within one stack still counts once: total time
        // is "time anywhere on the stack", not occurrence-weighted.
        let mut seen: HashSet<FrameId> = HashSet::with_capacity(ids.len());
        for &id in ids {
            if seen.insert(id) {
                self.registry.frame_mut(id).total_time += delta;
            }
        }
        let leaf_frame = self.tree.node(leaf).frame;
        self.registry.frame_mut(leaf_frame).self_time += delta;
        self.samples.push(leaf);
        self.weights.push(delta);
    }

    /// Visit every sample in append order as a (root-to-leaf stack, weight)
    /// pair.
    ///
    /// Stacks are memoized per distinct leaf node for the duration of one
    /// call; the cache is rebuilt on the next call, since the tree may have
    /// grown in between.
    pub fn for_each_sample<F>(&self, mut visitor: F)
    where
        F: FnMut(&[FrameId], f64),
    {
        let mut cache: HashMap<NodeId, Vec<FrameId>> = HashMap::new();
        for (&leaf, &weight) in self.samples.iter().zip(&self.weights) {
            let stack = cache
                .entry(leaf)
                .or_insert_with(|| self.tree.stack_of(leaf));
            visitor(stack, weight);
        }
    }

    /// Visit every registered frame, in registry iteration order.
    pub fn for_each_frame<F>(&self, mut visitor: F)
    where
        F: FnMut(&Frame),
    {
        for frame in self.registry.iter() {
            visitor(frame);
        }
    }

    /// Replay all samples as balanced open/close transitions over call tree
    /// nodes — the interval decomposition a flame graph renders.
    ///
    /// `value` passed to both callbacks is the sum of sample weights
    /// strictly before the transition, so the outermost open/close pair of
    /// a node brackets its entire coverage of the replay timeline. Opens
    /// for a sample's newly entered frames fire outer-to-inner, closes
    /// inner-to-outer, and consecutive samples sharing a stack prefix emit
    /// no transitions for the shared part.
    pub fn for_each_call<O, C>(&self, mut on_open: O, mut on_close: C)
    where
        O: FnMut(NodeId, f64),
        C: FnMut(NodeId, f64),
    {
        let mut prev_stack: Vec<NodeId> = Vec::new();
        let mut value = 0.0;
        for (&leaf, &weight) in self.samples.iter().zip(&self.weights) {
            // Deepest ancestor of the new leaf that is still open. The
            // `contains` scan is O(depth) per ancestor, fine at stack
            // heights.
            let mut converge: Option<NodeId> = None;
            let mut cursor = Some(leaf);
            while let Some(node) = cursor {
                if prev_stack.contains(&node) {
                    converge = Some(node);
                    break;
                }
                cursor = self.tree.node(node).parent;
            }

            // Close everything past the convergence point, innermost first.
            while prev_stack.last().copied() != converge {
                let Some(node) = prev_stack.pop() else {
                    break;
                };
                on_close(node, value);
            }

            // Collect newly entered nodes leaf-up, then open them
            // outer-to-inner.
            let mut to_open: Vec<NodeId> = Vec::new();
            let mut cursor = Some(leaf);
            while cursor != converge {
                let Some(node) = cursor else {
                    break;
                };
                to_open.push(node);
                cursor = self.tree.node(node).parent;
            }
            for &node in to_open.iter().rev() {
                on_open(node, value);
                prev_stack.push(node);
            }

            value += weight;
        }
        for &node in prev_stack.iter().rev() {
            on_close(node, value);
        }
    }

    /// A new profile with the same total duration whose samples are
    /// replayed in alphabetical stack order, so structurally identical
    /// stacks become adjacent and re-merge regardless of their original
    /// temporal order. Useful for diffing two profiles.
    ///
    /// Frames are re-keyed by display name during the replay, which also
    /// merges frames that arrived under distinct keys but share a name.
    /// The sort is stable (`slice::sort_by`), so samples with equal stacks
    /// keep their relative ledger order. Side-channel events are not
    /// carried over: they anchor node ids of this profile's tree.
    pub fn sorted_alphabetically(&self) -> Profile {
        let mut pairs: Vec<(String, Vec<FrameInfo>, f64)> =
            Vec::with_capacity(self.samples.len());
        self.for_each_sample(|stack, weight| {
            let infos: Vec<FrameInfo> = stack
                .iter()
                .map(|&id| {
                    let frame = self.registry.frame(id);
                    FrameInfo {
                        key: FrameKey::Name(frame.name.clone()),
                        name: frame.name.clone(),
                        file: frame.file.clone(),
                        line: frame.line,
                        col: frame.col,
                    }
                })
                .collect();
            let key = infos
                .iter()
                .map(|info| info.name.as_str())
                .collect::<Vec<_>>()
                .join("\0");
            pairs.push((key, infos, weight));
        });
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut sorted = Profile::new(self.duration);
        for (_, stack, weight) in pairs {
            let ids: Vec<FrameId> = stack
                .iter()
                .map(|info| sorted.registry.get_or_create(info))
                .collect();
            sorted.append_resolved(&ids, weight);
        }
        sorted
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    fn info(key: u64, name: &str) -> FrameInfo {
        FrameInfo::new(key, name)
    }

    /// Collect the (names, weight) view of every sample.
    fn materialize(profile: &Profile) -> Vec<(Vec<String>, f64)> {
        let mut out = Vec::new();
        profile.for_each_sample(|stack, weight| {
            let names = stack
                .iter()
                .map(|&id| profile.frame(id).name.clone())
                .collect();
            out.push((names, weight));
        });
        out
    }

    #[test]
    fn worked_example_totals_and_replay() {
        let mut profile = Profile::new(15.0);
        profile.append_sample(&[info(1, "a")], 10.0).unwrap();
        profile
            .append_sample(&[info(1, "a"), info(2, "b")], 5.0)
            .unwrap();

        assert_eq!(profile.roots().len(), 1);
        let a = profile.node(profile.roots()[0]);
        assert!((a.total_time - 15.0).abs() < f64::EPSILON);
        assert!((a.self_time - 10.0).abs() < f64::EPSILON);
        assert_eq!(a.children.len(), 1);
        let b = profile.node(a.children[0]);
        assert!((b.total_time - 5.0).abs() < f64::EPSILON);
        assert!((b.self_time - 5.0).abs() < f64::EPSILON);

        // Both callbacks append to one transition log, hence the RefCell.
        let log: RefCell<Vec<(&str, String, f64)>> = RefCell::new(Vec::new());
        let name = |node: NodeId| profile.frame(profile.node(node).frame).name.clone();
        profile.for_each_call(
            |node, value| log.borrow_mut().push(("open", name(node), value)),
            |node, value| log.borrow_mut().push(("close", name(node), value)),
        );
        let log = log.into_inner();
        let compact: Vec<(&str, &str, f64)> = log
            .iter()
            .map(|(kind, name, value)| (*kind, name.as_str(), *value))
            .collect();
        assert_eq!(
            compact,
            vec![
                ("open", "a", 0.0),
                ("open", "b", 10.0),
                ("close", "b", 15.0),
                ("close", "a", 15.0),
            ]
        );
    }

    #[test]
    fn nan_delta_rejected_without_mutation() {
        let mut profile = Profile::new(100.0);
        profile.append_sample(&[info(1, "a")], 10.0).unwrap();

        let err = profile.append_sample(&[info(2, "b")], f64::NAN);
        assert!(matches!(err, Err(ProfileError::InvalidTimeDelta(_))));
        assert_eq!(profile.frame_count(), 1);
        assert_eq!(profile.node_count(), 1);
        assert_eq!(profile.sample_count(), 1);
    }

    #[test]
    fn negative_and_infinite_deltas_rejected() {
        let mut profile = Profile::new(100.0);
        assert!(profile.append_sample(&[info(1, "a")], -1.0).is_err());
        assert!(
            profile
                .append_sample(&[info(1, "a")], f64::INFINITY)
                .is_err()
        );
        assert_eq!(profile.sample_count(), 0);
    }

    #[test]
    fn empty_stack_is_dropped() {
        let mut profile = Profile::new(100.0);
        profile.append_sample(&[], 10.0).unwrap();
        assert_eq!(profile.sample_count(), 0);
        assert_eq!(profile.node_count(), 0);
    }

    #[test]
    fn for_each_sample_is_idempotent_and_ordered() {
        let mut profile = Profile::new(100.0);
        profile
            .append_sample(&[info(1, "a"), info(2, "b")], 3.0)
            .unwrap();
        profile.append_sample(&[info(1, "a")], 4.0).unwrap();
        profile
            .append_sample(&[info(1, "a"), info(2, "b")], 5.0)
            .unwrap();

        let first = materialize(&profile);
        let second = materialize(&profile);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].0, vec!["a", "b"]);
        assert!((first[1].1 - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn recursion_counts_frame_total_once_per_sample() {
        let mut profile = Profile::new(100.0);
        profile
            .append_sample(&[info(1, "f"), info(1, "f")], 7.0)
            .unwrap();

        // Two nodes, one frame; the frame saw 7µs of stack time, not 14.
        assert_eq!(profile.node_count(), 2);
        assert_eq!(profile.frame_count(), 1);
        let mut frames = Vec::new();
        profile.for_each_frame(|frame| frames.push(frame.clone()));
        assert!((frames[0].total_time - 7.0).abs() < f64::EPSILON);
        assert!((frames[0].self_time - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn frame_totals_aggregate_across_distinct_paths() {
        let mut profile = Profile::new(100.0);
        profile
            .append_sample(&[info(1, "a"), info(3, "c")], 2.0)
            .unwrap();
        profile
            .append_sample(&[info(2, "b"), info(3, "c")], 3.0)
            .unwrap();

        // "c" backs two nodes under different parents but is one frame.
        assert_eq!(profile.node_count(), 4);
        let mut by_name: HashMap<String, (f64, f64)> = HashMap::new();
        profile.for_each_frame(|frame| {
            by_name.insert(frame.name.clone(), (frame.total_time, frame.self_time));
        });
        let (c_total, c_self) = by_name["c"];
        assert!((c_total - 5.0).abs() < f64::EPSILON);
        assert!((c_self - 5.0).abs() < f64::EPSILON);
        let (a_total, a_self) = by_name["a"];
        assert!((a_total - 2.0).abs() < f64::EPSILON);
        assert!((a_self - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn replay_converges_through_shared_prefix() {
        // a>b, a, a>c: "a" must stay open across all three samples.
        let mut profile = Profile::new(9.0);
        profile
            .append_sample(&[info(1, "a"), info(2, "b")], 2.0)
            .unwrap();
        profile.append_sample(&[info(1, "a")], 3.0).unwrap();
        profile
            .append_sample(&[info(1, "a"), info(3, "c")], 4.0)
            .unwrap();

        let mut opens = Vec::new();
        let mut closes = Vec::new();
        profile.for_each_call(
            |node, value| opens.push((profile.frame(profile.node(node).frame).name.clone(), value)),
            |node, value| closes.push((profile.frame(profile.node(node).frame).name.clone(), value)),
        );
        assert_eq!(
            opens,
            vec![
                ("a".to_string(), 0.0),
                ("b".to_string(), 0.0),
                ("c".to_string(), 5.0),
            ]
        );
        assert_eq!(
            closes,
            vec![
                ("b".to_string(), 2.0),
                ("c".to_string(), 9.0),
                ("a".to_string(), 9.0),
            ]
        );
    }

    #[test]
    fn sorted_alphabetically_merges_non_adjacent_stacks() {
        let mut profile = Profile::new(30.0);
        profile
            .append_sample(&[info(1, "a"), info(2, "b")], 10.0)
            .unwrap();
        profile.append_sample(&[info(3, "z")], 5.0).unwrap();
        profile
            .append_sample(&[info(1, "a"), info(2, "b")], 15.0)
            .unwrap();

        // Run-length merge keeps the a>b repeat as separate siblings.
        assert_eq!(profile.node_count(), 5);

        let sorted = profile.sorted_alphabetically();
        assert!((sorted.duration() - 30.0).abs() < f64::EPSILON);
        assert_eq!(sorted.sample_count(), 3);
        // Adjacent after the sort, so the repeat re-merges.
        assert_eq!(sorted.node_count(), 3);

        let materialized = {
            let mut out = Vec::new();
            sorted.for_each_sample(|stack, weight| {
                let names: Vec<String> = stack
                    .iter()
                    .map(|&id| sorted.frame(id).name.clone())
                    .collect();
                out.push((names, weight));
            });
            out
        };
        assert_eq!(materialized[0].0, vec!["a", "b"]);
        assert_eq!(materialized[1].0, vec!["a", "b"]);
        assert_eq!(materialized[2].0, vec!["z"]);
        // Stable sort keeps the 10µs sample before the 15µs one.
        assert!((materialized[0].1 - 10.0).abs() < f64::EPSILON);
        assert!((materialized[1].1 - 15.0).abs() < f64::EPSILON);

        // Timing sums survive the restructuring.
        let root_total: f64 = sorted
            .roots()
            .iter()
            .map(|&id| sorted.node(id).total_time)
            .sum();
        assert!((root_total - 30.0).abs() < f64::EPSILON);

        // Source profile untouched.
        assert_eq!(profile.node_count(), 5);
        assert_eq!(profile.sample_count(), 3);
    }

    #[test]
    fn sorted_alphabetically_rekeys_by_name() {
        // Same display name under two keys collapses in the sorted copy.
        let mut profile = Profile::new(5.0);
        profile.append_sample(&[info(1, "work")], 2.0).unwrap();
        profile.append_sample(&[info(2, "work")], 3.0).unwrap();
        assert_eq!(profile.frame_count(), 2);

        let sorted = profile.sorted_alphabetically();
        assert_eq!(sorted.frame_count(), 1);
        assert_eq!(sorted.node_count(), 1);
        let merged = sorted.node(sorted.roots()[0]);
        assert!((merged.total_time - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn events_are_stored_and_returned() {
        let mut profile = Profile::new(100.0);
        profile.push_event(ProfilingEvent::new("gc", 10.0, 20.0));
        assert_eq!(profile.events().len(), 1);
        assert_eq!(profile.events()[0].name, "gc");
        // Events do not survive the sorted replay.
        assert!(profile.sorted_alphabetically().events().is_empty());
    }
}
