use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::command::{PropMap, ViewId};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Handle to a native toolkit object. Allocated by the translator, interpreted
/// by the toolkit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NativeHandle(u64);

impl NativeHandle {
    pub(crate) fn allocate() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native:{}", self.0)
    }
}

/// What the page currently exposes as its root visual object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentSlot {
    /// Shown until the first tree is committed.
    Placeholder,
    Root { handle: NativeHandle },
    /// Error content shown when the runtime could not be brought up.
    Fallback { message: String },
}

impl ContentSlot {
    pub fn root_handle(&self) -> Option<NativeHandle> {
        match self {
            ContentSlot::Root { handle } => Some(*handle),
            _ => None,
        }
    }
}

/// A single buffered native mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeOp {
    Create {
        handle: NativeHandle,
        id: ViewId,
        view_type: String,
        props: PropMap,
    },
    /// Replaces the object's full property set.
    SetProps {
        handle: NativeHandle,
        props: PropMap,
    },
    Insert {
        parent: NativeHandle,
        child: NativeHandle,
        index: usize,
    },
    Remove {
        parent: NativeHandle,
        child: NativeHandle,
    },
    Release {
        handle: NativeHandle,
    },
    SetContent(ContentSlot),
}

/// The host toolkit seam. A commit is one visual update: the toolkit must not
/// present any intermediate state of `ops`.
pub trait NativeToolkit {
    fn commit(&mut self, ops: Vec<NativeOp>);
}

impl<T: NativeToolkit + ?Sized> NativeToolkit for Box<T> {
    fn commit(&mut self, ops: Vec<NativeOp>) {
        (**self).commit(ops)
    }
}

/// Serializable view of a native subtree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeSnapshot {
    pub id: ViewId,
    pub view_type: String,
    pub props: PropMap,
    pub children: Vec<TreeSnapshot>,
}

impl Drop for TreeSnapshot {
    // Flatten before dropping so a deep chain does not recurse.
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

/// Build a nested snapshot from `root` without recursing. `visit` returns a
/// node with no children yet, plus the keys of its children in order.
pub(crate) fn build_snapshot<K, F>(root: K, mut visit: F) -> Option<TreeSnapshot>
where
    F: FnMut(K) -> Option<(TreeSnapshot, Vec<K>)>,
{
    let (node, children) = visit(root)?;
    let mut stack = vec![(node, children.into_iter())];
    while let Some((_, pending)) = stack.last_mut() {
        if let Some(child) = pending.next() {
            if let Some((node, children)) = visit(child) {
                stack.push((node, children.into_iter()));
            }
            continue;
        }
        let (finished, _) = stack.pop()?;
        match stack.last_mut() {
            Some((parent, _)) => parent.children.push(finished),
            None => return Some(finished),
        }
    }
    None
}

#[derive(Debug, Clone)]
struct NativeObject {
    id: ViewId,
    view_type: String,
    props: PropMap,
    parent: Option<NativeHandle>,
    children: Vec<NativeHandle>,
}

/// Retained in-memory toolkit used by the headless host and the tests.
///
/// Records the content slot each time a commit changes it so observers can
/// check that content never passes through an intermediate state.
#[derive(Debug, Default)]
pub struct MemoryToolkit {
    objects: HashMap<NativeHandle, NativeObject>,
    content: Option<ContentSlot>,
    commits: usize,
    content_history: Vec<ContentSlot>,
    violations: Vec<String>,
}

impl MemoryToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> ContentSlot {
        self.content.clone().unwrap_or(ContentSlot::Placeholder)
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Every distinct content slot a commit left behind, in order. Commits
    /// that leave the slot as it was add nothing.
    pub fn content_history(&self) -> &[ContentSlot] {
        &self.content_history
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn contains(&self, handle: NativeHandle) -> bool {
        self.objects.contains_key(&handle)
    }

    /// Ops the toolkit could not make sense of (double parenting, dangling
    /// handles). Always empty when the translator is behaving.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    pub fn snapshot(&self, handle: NativeHandle) -> Option<TreeSnapshot> {
        build_snapshot(handle, |handle| {
            let object = self.objects.get(&handle)?;
            let node = TreeSnapshot {
                id: object.id,
                view_type: object.view_type.clone(),
                props: object.props.clone(),
                children: Vec::with_capacity(object.children.len()),
            };
            Some((node, object.children.clone()))
        })
    }

    /// Snapshot of whatever is attached to the content slot.
    pub fn content_tree(&self) -> Option<TreeSnapshot> {
        self.content().root_handle().and_then(|h| self.snapshot(h))
    }

    fn apply(&mut self, op: NativeOp) {
        match op {
            NativeOp::Create {
                handle,
                id,
                view_type,
                props,
            } => {
                if self.objects.contains_key(&handle) {
                    self.violations.push(format!("{handle} created twice"));
                    return;
                }
                self.objects.insert(
                    handle,
                    NativeObject {
                        id,
                        view_type,
                        props,
                        parent: None,
                        children: Vec::new(),
                    },
                );
            }
            NativeOp::SetProps { handle, props } => match self.objects.get_mut(&handle) {
                Some(object) => object.props = props,
                None => self.violations.push(format!("set props on missing {handle}")),
            },
            NativeOp::Insert {
                parent,
                child,
                index,
            } => {
                let child_parent = match self.objects.get(&child) {
                    Some(object) => object.parent,
                    None => {
                        self.violations.push(format!("insert of missing {child}"));
                        return;
                    }
                };
                if let Some(existing) = child_parent {
                    self.violations
                        .push(format!("{child} inserted while still parented by {existing}"));
                    return;
                }
                let Some(parent_object) = self.objects.get_mut(&parent) else {
                    self.violations.push(format!("insert into missing {parent}"));
                    return;
                };
                let index = index.min(parent_object.children.len());
                parent_object.children.insert(index, child);
                if let Some(child_object) = self.objects.get_mut(&child) {
                    child_object.parent = Some(parent);
                }
            }
            NativeOp::Remove { parent, child } => {
                let Some(parent_object) = self.objects.get_mut(&parent) else {
                    self.violations.push(format!("remove from missing {parent}"));
                    return;
                };
                let before = parent_object.children.len();
                parent_object.children.retain(|h| *h != child);
                if parent_object.children.len() == before {
                    self.violations
                        .push(format!("{child} is not a child of {parent}"));
                    return;
                }
                if let Some(child_object) = self.objects.get_mut(&child) {
                    child_object.parent = None;
                }
            }
            NativeOp::Release { handle } => {
                let Some(object) = self.objects.remove(&handle) else {
                    self.violations.push(format!("release of missing {handle}"));
                    return;
                };
                if let Some(parent) = object.parent {
                    if let Some(parent_object) = self.objects.get_mut(&parent) {
                        parent_object.children.retain(|h| *h != handle);
                    }
                }
                for child in object.children {
                    if let Some(child_object) = self.objects.get_mut(&child) {
                        child_object.parent = None;
                    }
                }
            }
            NativeOp::SetContent(slot) => {
                if let Some(handle) = slot.root_handle() {
                    if !self.objects.contains_key(&handle) {
                        self.violations
                            .push(format!("content set to missing {handle}"));
                    }
                }
                self.content = Some(slot);
            }
        }
    }
}

impl NativeToolkit for MemoryToolkit {
    fn commit(&mut self, ops: Vec<NativeOp>) {
        for op in ops {
            self.apply(op);
        }
        self.commits += 1;
        let content = self.content();
        if self.content_history.last() != Some(&content) {
            self.content_history.push(content);
        }
    }
}
