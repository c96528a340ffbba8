use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::command::{MutationCommand, PropMap, ViewId};
use crate::error::{BridgeError, BridgeResult};
use crate::toolkit::{build_snapshot, NativeHandle, NativeOp, NativeToolkit, TreeSnapshot};

const ROOT_VIEW_TYPE: &str = "root";

/// One translated node and the native object backing it.
#[derive(Debug, Clone)]
pub struct ViewNode {
    pub id: ViewId,
    pub handle: NativeHandle,
    pub view_type: String,
    pub parent: Option<ViewId>,
    pub children: Vec<ViewId>,
    pub props: PropMap,
}

/// Outcome of applying one batch of commands.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub applied: usize,
    /// Commands that were rejected, with their position in the batch.
    pub dropped: Vec<(usize, BridgeError)>,
}

impl BatchReport {
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }
}

/// Applies mutation commands to a shadow tree and buffers the equivalent
/// native ops until [`ViewTreeTranslator::commit`].
///
/// Every command is validated against the shadow tree before anything is
/// touched, so a rejected command leaves both the shadow tree and the
/// pending ops exactly as they were.
pub struct ViewTreeTranslator {
    nodes: HashMap<ViewId, ViewNode>,
    pending: Vec<NativeOp>,
    /// Position of each object's buffered `SetProps` in `pending`.
    pending_props: HashMap<NativeHandle, usize>,
    root_handle: NativeHandle,
    torn_down: bool,
}

impl Default for ViewTreeTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewTreeTranslator {
    pub fn new() -> Self {
        let root_handle = NativeHandle::allocate();
        let root = ViewNode {
            id: ViewId::ROOT,
            handle: root_handle,
            view_type: ROOT_VIEW_TYPE.to_string(),
            parent: None,
            children: Vec::new(),
            props: PropMap::new(),
        };
        let mut nodes = HashMap::new();
        nodes.insert(ViewId::ROOT, root);
        Self {
            nodes,
            pending: vec![NativeOp::Create {
                handle: root_handle,
                id: ViewId::ROOT,
                view_type: ROOT_VIEW_TYPE.to_string(),
                props: PropMap::new(),
            }],
            pending_props: HashMap::new(),
            root_handle,
            torn_down: false,
        }
    }

    pub fn root_handle(&self) -> NativeHandle {
        self.root_handle
    }

    pub fn node(&self, id: ViewId) -> Option<&ViewNode> {
        self.nodes.get(&id)
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Validate and buffer one command.
    pub fn apply(&mut self, command: MutationCommand) -> BridgeResult<()> {
        if self.torn_down {
            return Err(BridgeError::Disposed);
        }
        match command {
            MutationCommand::Create {
                id,
                view_type,
                props,
            } => self.create(id, view_type, props),
            MutationCommand::Update { id, props } => self.update(id, props),
            MutationCommand::InsertChild {
                parent,
                child,
                index,
            } => self.insert_child(parent, child, index),
            MutationCommand::RemoveChild { parent, child } => self.remove_child(parent, child),
            MutationCommand::Delete { id } => self.delete(id),
        }
    }

    /// Apply a batch, dropping and logging whatever cannot be applied.
    pub fn apply_batch<I>(&mut self, commands: I) -> BatchReport
    where
        I: IntoIterator<Item = MutationCommand>,
    {
        let mut report = BatchReport::default();
        for (position, command) in commands.into_iter().enumerate() {
            let op = command.name();
            match self.apply(command) {
                Ok(()) => report.applied += 1,
                Err(err) if err.is_recoverable() => {
                    warn!(
                        target: "translator",
                        position,
                        op,
                        error = %err,
                        "dropped mutation command"
                    );
                    report.dropped.push((position, err));
                }
                Err(err) => {
                    debug!(target: "translator", position, op, error = %err, "translator closed");
                    report.dropped.push((position, err));
                }
            }
        }
        report
    }

    /// Drain the buffered native ops without committing them.
    pub fn take_pending(&mut self) -> Vec<NativeOp> {
        self.pending_props.clear();
        std::mem::take(&mut self.pending)
    }

    /// Hand all buffered ops to the toolkit as one visual update.
    pub fn commit<T: NativeToolkit + ?Sized>(&mut self, toolkit: &mut T) -> usize {
        let ops = self.take_pending();
        let count = ops.len();
        if count > 0 {
            toolkit.commit(ops);
            debug!(target: "translator", ops = count, "committed native batch");
        }
        count
    }

    /// Release every native object this translator owns. Returns the ops,
    /// preceded by anything still pending, so the caller can fold them into
    /// a larger commit.
    pub fn teardown(&mut self) -> Vec<NativeOp> {
        if self.torn_down {
            return Vec::new();
        }
        self.torn_down = true;

        let mut ops = self.take_pending();
        let mut order = Vec::with_capacity(self.nodes.len());
        self.collect_post_order(ViewId::ROOT, &mut order);
        let attached: HashSet<ViewId> = order.iter().copied().collect();
        // Detached nodes that were never deleted.
        let mut orphans: Vec<ViewId> = self
            .nodes
            .keys()
            .copied()
            .filter(|id| !attached.contains(id))
            .collect();
        orphans.sort();
        order.extend(orphans);

        for id in order {
            if let Some(node) = self.nodes.remove(&id) {
                ops.push(NativeOp::Release {
                    handle: node.handle,
                });
            }
        }
        ops
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        self.snapshot_of(ViewId::ROOT).unwrap_or_else(|| TreeSnapshot {
            id: ViewId::ROOT,
            view_type: ROOT_VIEW_TYPE.to_string(),
            props: PropMap::new(),
            children: Vec::new(),
        })
    }

    pub fn snapshot_of(&self, id: ViewId) -> Option<TreeSnapshot> {
        build_snapshot(id, |id| {
            let node = self.nodes.get(&id)?;
            let snapshot = TreeSnapshot {
                id: node.id,
                view_type: node.view_type.clone(),
                props: node.props.clone(),
                children: Vec::with_capacity(node.children.len()),
            };
            Some((snapshot, node.children.clone()))
        })
    }

    fn create(&mut self, id: ViewId, view_type: String, props: PropMap) -> BridgeResult<()> {
        if self.nodes.contains_key(&id) {
            return Err(BridgeError::DuplicateNode(id));
        }
        if view_type.is_empty() {
            return Err(BridgeError::InvalidCommand(format!(
                "create {id} without a view type"
            )));
        }

        let props: PropMap = props.into_iter().filter(|(_, v)| !v.is_null()).collect();
        let handle = NativeHandle::allocate();
        self.pending.push(NativeOp::Create {
            handle,
            id,
            view_type: view_type.clone(),
            props: props.clone(),
        });
        self.nodes.insert(
            id,
            ViewNode {
                id,
                handle,
                view_type,
                parent: None,
                children: Vec::new(),
                props,
            },
        );
        Ok(())
    }

    fn update(&mut self, id: ViewId, props: PropMap) -> BridgeResult<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(BridgeError::UnknownNode(id))?;

        for (key, value) in props {
            if value.is_null() {
                node.props.remove(&key);
            } else {
                node.props.insert(key, value);
            }
        }

        let handle = node.handle;
        let merged = node.props.clone();
        // Only the latest full property set per object matters.
        if let Some(&position) = self.pending_props.get(&handle) {
            if let Some(NativeOp::SetProps { props, .. }) = self.pending.get_mut(position) {
                *props = merged;
                return Ok(());
            }
        }
        self.pending_props.insert(handle, self.pending.len());
        self.pending.push(NativeOp::SetProps {
            handle,
            props: merged,
        });
        Ok(())
    }

    fn insert_child(&mut self, parent: ViewId, child: ViewId, index: usize) -> BridgeResult<()> {
        let parent_node = self
            .nodes
            .get(&parent)
            .ok_or(BridgeError::UnknownNode(parent))?;
        let child_node = self
            .nodes
            .get(&child)
            .ok_or(BridgeError::UnknownNode(child))?;

        if child.is_root() {
            return Err(BridgeError::InvalidCommand(
                "the root cannot be inserted as a child".into(),
            ));
        }
        if self.is_ancestor_or_self(child, parent) {
            return Err(BridgeError::InvalidCommand(format!(
                "inserting {child} into {parent} would create a cycle"
            )));
        }

        let previous_parent = child_node.parent;
        let available = match previous_parent {
            Some(existing) if existing == parent => parent_node.children.len() - 1,
            _ => parent_node.children.len(),
        };
        if index > available {
            return Err(BridgeError::InvalidCommand(format!(
                "index {index} out of range for {parent} with {available} children"
            )));
        }

        let parent_handle = parent_node.handle;
        let child_handle = child_node.handle;

        if let Some(existing) = previous_parent {
            self.detach(existing, child);
        }

        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.insert(index, child);
        }
        if let Some(child_node) = self.nodes.get_mut(&child) {
            child_node.parent = Some(parent);
        }
        self.pending.push(NativeOp::Insert {
            parent: parent_handle,
            child: child_handle,
            index,
        });
        Ok(())
    }

    fn remove_child(&mut self, parent: ViewId, child: ViewId) -> BridgeResult<()> {
        self.nodes
            .get(&parent)
            .ok_or(BridgeError::UnknownNode(parent))?;
        let child_node = self
            .nodes
            .get(&child)
            .ok_or(BridgeError::UnknownNode(child))?;
        if child_node.parent != Some(parent) {
            return Err(BridgeError::InvalidCommand(format!(
                "{child} is not a child of {parent}"
            )));
        }
        self.detach(parent, child);
        Ok(())
    }

    fn delete(&mut self, id: ViewId) -> BridgeResult<()> {
        let node = self.nodes.get(&id).ok_or(BridgeError::UnknownNode(id))?;
        if id.is_root() {
            return Err(BridgeError::InvalidCommand("the root cannot be deleted".into()));
        }

        if let Some(parent) = node.parent {
            self.detach(parent, id);
        }

        let mut doomed = Vec::new();
        self.collect_post_order(id, &mut doomed);
        for doomed_id in doomed {
            if let Some(node) = self.nodes.remove(&doomed_id) {
                self.pending_props.remove(&node.handle);
                self.pending.push(NativeOp::Release {
                    handle: node.handle,
                });
            }
        }
        Ok(())
    }

    /// Unlink `child` from `parent` in the shadow tree and buffer the
    /// native removal. Both ids must exist.
    fn detach(&mut self, parent: ViewId, child: ViewId) {
        let Some(parent_node) = self.nodes.get_mut(&parent) else {
            return;
        };
        parent_node.children.retain(|c| *c != child);
        let parent_handle = parent_node.handle;
        if let Some(child_node) = self.nodes.get_mut(&child) {
            child_node.parent = None;
            self.pending.push(NativeOp::Remove {
                parent: parent_handle,
                child: child_node.handle,
            });
        }
    }

    fn is_ancestor_or_self(&self, candidate: ViewId, mut node: ViewId) -> bool {
        let is_leaf = self
            .nodes
            .get(&candidate)
            .map_or(true, |n| n.children.is_empty());
        if is_leaf {
            return candidate == node;
        }
        loop {
            if node == candidate {
                return true;
            }
            match self.nodes.get(&node).and_then(|n| n.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// Children before parents, walked with an explicit stack.
    fn collect_post_order(&self, id: ViewId, out: &mut Vec<ViewId>) {
        if !self.nodes.contains_key(&id) {
            return;
        }
        let mut stack = vec![(id, 0usize)];
        while let Some((current, next)) = stack.last_mut() {
            let child = self
                .nodes
                .get(&*current)
                .and_then(|node| node.children.get(*next))
                .copied();
            match child {
                Some(child) => {
                    *next += 1;
                    if self.nodes.contains_key(&child) {
                        stack.push((child, 0));
                    }
                }
                None => {
                    out.push(*current);
                    stack.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::props;
    use crate::toolkit::MemoryToolkit;
    use serde_json::json;

    fn committed(translator: &mut ViewTreeTranslator) -> MemoryToolkit {
        let mut toolkit = MemoryToolkit::new();
        translator.commit(&mut toolkit);
        toolkit
    }

    #[test]
    fn create_insert_update_delete_restores_prior_tree() {
        let mut translator = ViewTreeTranslator::new();
        let before = translator.snapshot();

        let report = translator.apply_batch([
            MutationCommand::create(1, "box", PropMap::new()),
            MutationCommand::insert_child(ViewId::ROOT, 1, 0),
            MutationCommand::update(1, props([("color", json!("red"))])),
            MutationCommand::delete(1),
        ]);
        assert_eq!(report.applied, 4);
        assert_eq!(report.dropped_count(), 0);
        assert_eq!(translator.snapshot(), before);

        let toolkit = committed(&mut translator);
        assert_eq!(toolkit.snapshot(translator.root_handle()), Some(before));
        assert_eq!(toolkit.object_count(), 1);
        assert!(toolkit.violations().is_empty());
    }

    #[test]
    fn updates_in_one_batch_merge() {
        let mut translator = ViewTreeTranslator::new();
        translator.apply_batch([
            MutationCommand::create(7, "text", props([("color", json!("red"))])),
            MutationCommand::insert_child(ViewId::ROOT, 7, 0),
            MutationCommand::update(7, props([("size", json!(12)), ("weight", json!("bold"))])),
            MutationCommand::update(7, props([("size", json!(14))])),
        ]);

        let expected = props([
            ("color", json!("red")),
            ("size", json!(14)),
            ("weight", json!("bold")),
        ]);
        assert_eq!(translator.node(ViewId(7)).unwrap().props, expected);

        let toolkit = committed(&mut translator);
        let tree = toolkit.snapshot(translator.root_handle()).unwrap();
        assert_eq!(tree.children[0].props, expected);
    }

    #[test]
    fn null_resets_a_property() {
        let mut translator = ViewTreeTranslator::new();
        translator
            .apply(MutationCommand::create(
                2,
                "view",
                props([("opacity", json!(0.5)), ("hidden", json!(null))]),
            ))
            .unwrap();
        assert_eq!(
            translator.node(ViewId(2)).unwrap().props,
            props([("opacity", json!(0.5))])
        );
        translator
            .apply(MutationCommand::update(2, props([("opacity", json!(null))])))
            .unwrap();
        assert!(translator.node(ViewId(2)).unwrap().props.is_empty());
    }

    #[test]
    fn unknown_ids_leave_tree_unchanged() {
        let mut translator = ViewTreeTranslator::new();
        translator.apply_batch([
            MutationCommand::create(1, "box", PropMap::new()),
            MutationCommand::insert_child(ViewId::ROOT, 1, 0),
        ]);
        let mut toolkit = committed(&mut translator);
        let before = translator.snapshot();

        for command in [
            MutationCommand::update(9, props([("color", json!("blue"))])),
            MutationCommand::insert_child(ViewId::ROOT, 9, 0),
            MutationCommand::insert_child(9, 1, 0),
            MutationCommand::remove_child(ViewId::ROOT, 9),
            MutationCommand::delete(9),
        ] {
            let report = translator.apply_batch([command]);
            assert_eq!(report.dropped_count(), 1);
            assert!(matches!(report.dropped[0].1, BridgeError::UnknownNode(ViewId(9))));
        }

        assert_eq!(translator.snapshot(), before);
        assert!(!translator.has_pending());
        assert_eq!(translator.commit(&mut toolkit), 0);
    }

    #[test]
    fn deleted_ids_become_unknown() {
        let mut translator = ViewTreeTranslator::new();
        translator.apply_batch([
            MutationCommand::create(1, "box", PropMap::new()),
            MutationCommand::delete(1),
        ]);
        assert!(matches!(
            translator.apply(MutationCommand::update(1, PropMap::new())),
            Err(BridgeError::UnknownNode(ViewId(1)))
        ));
    }

    #[test]
    fn delete_releases_whole_subtree() {
        let mut translator = ViewTreeTranslator::new();
        translator.apply_batch([
            MutationCommand::create(1, "list", PropMap::new()),
            MutationCommand::create(2, "row", PropMap::new()),
            MutationCommand::create(3, "row", PropMap::new()),
            MutationCommand::insert_child(ViewId::ROOT, 1, 0),
            MutationCommand::insert_child(1, 2, 0),
            MutationCommand::insert_child(1, 3, 1),
        ]);
        let mut toolkit = committed(&mut translator);
        assert_eq!(toolkit.object_count(), 4);

        translator.apply(MutationCommand::delete(1)).unwrap();
        translator.commit(&mut toolkit);
        assert_eq!(translator.len(), 1);
        assert_eq!(toolkit.object_count(), 1);
        assert!(toolkit.violations().is_empty());
        assert!(translator.node(ViewId(3)).is_none());
    }

    #[test]
    fn insert_moves_between_parents() {
        let mut translator = ViewTreeTranslator::new();
        translator.apply_batch([
            MutationCommand::create(1, "a", PropMap::new()),
            MutationCommand::create(2, "b", PropMap::new()),
            MutationCommand::create(3, "leaf", PropMap::new()),
            MutationCommand::insert_child(ViewId::ROOT, 1, 0),
            MutationCommand::insert_child(ViewId::ROOT, 2, 1),
            MutationCommand::insert_child(1, 3, 0),
            MutationCommand::insert_child(2, 3, 0),
        ]);
        assert!(translator.node(ViewId(1)).unwrap().children.is_empty());
        assert_eq!(translator.node(ViewId(2)).unwrap().children, vec![ViewId(3)]);

        let toolkit = committed(&mut translator);
        assert!(toolkit.violations().is_empty());
        assert_eq!(
            toolkit.snapshot(translator.root_handle()),
            Some(translator.snapshot())
        );
    }

    #[test]
    fn reorders_within_same_parent() {
        let mut translator = ViewTreeTranslator::new();
        translator.apply_batch([
            MutationCommand::create(1, "a", PropMap::new()),
            MutationCommand::create(2, "b", PropMap::new()),
            MutationCommand::insert_child(ViewId::ROOT, 1, 0),
            MutationCommand::insert_child(ViewId::ROOT, 2, 1),
            MutationCommand::insert_child(ViewId::ROOT, 1, 1),
        ]);
        assert_eq!(
            translator.node(ViewId::ROOT).unwrap().children,
            vec![ViewId(2), ViewId(1)]
        );
        let toolkit = committed(&mut translator);
        assert_eq!(
            toolkit.snapshot(translator.root_handle()),
            Some(translator.snapshot())
        );
    }

    #[test]
    fn rejects_structural_violations() {
        let mut translator = ViewTreeTranslator::new();
        translator.apply_batch([
            MutationCommand::create(1, "outer", PropMap::new()),
            MutationCommand::create(2, "inner", PropMap::new()),
            MutationCommand::insert_child(ViewId::ROOT, 1, 0),
            MutationCommand::insert_child(1, 2, 0),
        ]);
        let before = translator.snapshot();

        let report = translator.apply_batch([
            MutationCommand::insert_child(2, 1, 0),
            MutationCommand::insert_child(1, 1, 0),
            MutationCommand::insert_child(1, ViewId::ROOT, 0),
            MutationCommand::delete(ViewId::ROOT),
            MutationCommand::create(ViewId::ROOT, "root", PropMap::new()),
            MutationCommand::create(2, "dup", PropMap::new()),
            MutationCommand::insert_child(ViewId::ROOT, 2, 5),
            MutationCommand::remove_child(ViewId::ROOT, 2),
        ]);
        assert_eq!(report.applied, 0);
        assert_eq!(report.dropped_count(), 8);
        assert!(matches!(report.dropped[5].1, BridgeError::DuplicateNode(ViewId(2))));
        assert_eq!(translator.snapshot(), before);
    }

    #[test]
    fn teardown_releases_attached_and_detached_nodes() {
        let mut translator = ViewTreeTranslator::new();
        translator.apply_batch([
            MutationCommand::create(1, "attached", PropMap::new()),
            MutationCommand::create(2, "detached", PropMap::new()),
            MutationCommand::insert_child(ViewId::ROOT, 1, 0),
        ]);
        let mut toolkit = committed(&mut translator);
        assert_eq!(toolkit.object_count(), 3);

        toolkit.commit(translator.teardown());
        assert_eq!(toolkit.object_count(), 0);
        assert!(toolkit.violations().is_empty());
        assert!(translator.teardown().is_empty());
        assert!(matches!(
            translator.apply(MutationCommand::create(5, "late", PropMap::new())),
            Err(BridgeError::Disposed)
        ));
    }

    fn chain(from: u64, depth: u64) -> Vec<MutationCommand> {
        let mut commands = Vec::with_capacity(depth as usize * 2);
        let mut parent = ViewId::ROOT;
        for id in from..from + depth {
            commands.push(MutationCommand::create(id, "box", PropMap::new()));
            commands.push(MutationCommand::insert_child(parent, id, 0));
            parent = ViewId(id);
        }
        commands
    }

    #[test]
    fn deep_chains_delete_and_tear_down_iteratively() {
        const DEPTH: u64 = 300_000;
        let mut translator = ViewTreeTranslator::new();
        let report = translator.apply_batch(chain(1, DEPTH));
        assert_eq!(report.dropped_count(), 0);
        translator.apply(MutationCommand::delete(1)).unwrap();
        assert_eq!(translator.len(), 1);

        let mut toolkit = committed(&mut translator);
        assert_eq!(toolkit.object_count(), 1);
        assert!(toolkit.violations().is_empty());

        translator.apply_batch(chain(DEPTH + 1, DEPTH));
        translator.commit(&mut toolkit);
        assert_eq!(toolkit.object_count(), DEPTH as usize + 1);

        toolkit.commit(translator.teardown());
        assert_eq!(toolkit.object_count(), 0);
        assert!(toolkit.violations().is_empty());
    }

    #[test]
    fn repeated_updates_keep_one_set_props() {
        let mut translator = ViewTreeTranslator::new();
        translator.apply(MutationCommand::create(1, "counter", PropMap::new())).unwrap();
        for value in 0..1_000 {
            translator
                .apply(MutationCommand::update(1, props([("value", json!(value))])))
                .unwrap();
        }
        let pending = translator.take_pending();
        let set_props: Vec<_> = pending
            .iter()
            .filter_map(|op| match op {
                NativeOp::SetProps { props, .. } => Some(props),
                _ => None,
            })
            .collect();
        assert_eq!(set_props, vec![&props([("value", json!(999))])]);

        translator
            .apply(MutationCommand::update(1, props([("value", json!("next"))])))
            .unwrap();
        assert!(matches!(
            translator.take_pending().as_slice(),
            [NativeOp::SetProps { .. }]
        ));
    }
}
