use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Property bag carried by `Create` and `Update`.
pub type PropMap = BTreeMap<String, JsonValue>;

/// Runtime-assigned identity of a view node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(pub u64);

impl ViewId {
    /// The pre-existing content root of every session, exposed to scripts as
    /// `UIManager.rootTag`.
    pub const ROOT: ViewId = ViewId(0);

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for ViewId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// One instruction in the ordered stream the runtime emits.
///
/// The JSON form is tagged by `op`:
/// `{"op":"insert_child","parent":0,"child":1,"index":0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationCommand {
    Create {
        id: ViewId,
        view_type: String,
        #[serde(default)]
        props: PropMap,
    },
    Update {
        id: ViewId,
        #[serde(default)]
        props: PropMap,
    },
    InsertChild {
        parent: ViewId,
        child: ViewId,
        index: usize,
    },
    RemoveChild {
        parent: ViewId,
        child: ViewId,
    },
    Delete {
        id: ViewId,
    },
}

impl MutationCommand {
    pub fn create(id: impl Into<ViewId>, view_type: impl Into<String>, props: PropMap) -> Self {
        Self::Create {
            id: id.into(),
            view_type: view_type.into(),
            props,
        }
    }

    pub fn update(id: impl Into<ViewId>, props: PropMap) -> Self {
        Self::Update {
            id: id.into(),
            props,
        }
    }

    pub fn insert_child(parent: impl Into<ViewId>, child: impl Into<ViewId>, index: usize) -> Self {
        Self::InsertChild {
            parent: parent.into(),
            child: child.into(),
            index,
        }
    }

    pub fn remove_child(parent: impl Into<ViewId>, child: impl Into<ViewId>) -> Self {
        Self::RemoveChild {
            parent: parent.into(),
            child: child.into(),
        }
    }

    pub fn delete(id: impl Into<ViewId>) -> Self {
        Self::Delete { id: id.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MutationCommand::Create { .. } => "create",
            MutationCommand::Update { .. } => "update",
            MutationCommand::InsertChild { .. } => "insert_child",
            MutationCommand::RemoveChild { .. } => "remove_child",
            MutationCommand::Delete { .. } => "delete",
        }
    }
}

/// Build a [`PropMap`] from `(key, value)` pairs.
pub fn props<K, I>(pairs: I) -> PropMap
where
    K: Into<String>,
    I: IntoIterator<Item = (K, JsonValue)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
