use std::collections::BTreeMap;

use loadmaster::command::props;
use loadmaster::{
    BridgeError, MemoryToolkit, MutationCommand, NativeToolkit, PropMap, TreeSnapshot, ViewId,
    ViewTreeTranslator,
};
use serde_json::json;

/// Small deterministic generator so failures reproduce.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}

#[derive(Debug, PartialEq)]
enum Outcome {
    Applied,
    UnknownNode,
    Rejected,
}

impl Outcome {
    fn of(result: &Result<(), BridgeError>) -> Self {
        match result {
            Ok(()) => Outcome::Applied,
            Err(BridgeError::UnknownNode(_)) => Outcome::UnknownNode,
            Err(_) => Outcome::Rejected,
        }
    }
}

#[derive(Debug, Clone)]
struct ModelNode {
    view_type: String,
    props: PropMap,
    parent: Option<ViewId>,
    children: Vec<ViewId>,
}

/// Plain tree of ids that applies the command rules directly, used to check
/// what the toolkit ends up showing.
struct ModelTree {
    nodes: BTreeMap<ViewId, ModelNode>,
}

impl ModelTree {
    fn new(root_type: &str) -> Self {
        let root = ModelNode {
            view_type: root_type.to_string(),
            props: PropMap::new(),
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: BTreeMap::from([(ViewId::ROOT, root)]),
        }
    }

    fn apply(&mut self, command: &MutationCommand) -> Outcome {
        match command {
            MutationCommand::Create {
                id,
                view_type,
                props,
            } => {
                if self.nodes.contains_key(id) || view_type.is_empty() {
                    return Outcome::Rejected;
                }
                let props = props
                    .iter()
                    .filter(|(_, value)| !value.is_null())
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                let node = ModelNode {
                    view_type: view_type.clone(),
                    props,
                    parent: None,
                    children: Vec::new(),
                };
                self.nodes.insert(*id, node);
            }
            MutationCommand::Update { id, props } => {
                let Some(node) = self.nodes.get_mut(id) else {
                    return Outcome::UnknownNode;
                };
                for (key, value) in props {
                    if value.is_null() {
                        node.props.remove(key);
                    } else {
                        node.props.insert(key.clone(), value.clone());
                    }
                }
            }
            MutationCommand::InsertChild {
                parent,
                child,
                index,
            } => {
                if !self.nodes.contains_key(parent) || !self.nodes.contains_key(child) {
                    return Outcome::UnknownNode;
                }
                if child.is_root() || self.path_to_root(*parent).contains(child) {
                    return Outcome::Rejected;
                }
                let siblings = self.nodes[parent]
                    .children
                    .iter()
                    .filter(|sibling| *sibling != child)
                    .count();
                if *index > siblings {
                    return Outcome::Rejected;
                }
                self.unlink(*child);
                self.node_mut(*parent).children.insert(*index, *child);
                self.node_mut(*child).parent = Some(*parent);
            }
            MutationCommand::RemoveChild { parent, child } => {
                if !self.nodes.contains_key(parent) || !self.nodes.contains_key(child) {
                    return Outcome::UnknownNode;
                }
                if self.nodes[child].parent != Some(*parent) {
                    return Outcome::Rejected;
                }
                self.unlink(*child);
            }
            MutationCommand::Delete { id } => {
                if !self.nodes.contains_key(id) {
                    return Outcome::UnknownNode;
                }
                if id.is_root() {
                    return Outcome::Rejected;
                }
                self.unlink(*id);
                let mut doomed = vec![*id];
                while let Some(next) = doomed.pop() {
                    if let Some(node) = self.nodes.remove(&next) {
                        doomed.extend(node.children);
                    }
                }
            }
        }
        Outcome::Applied
    }

    fn node_mut(&mut self, id: ViewId) -> &mut ModelNode {
        self.nodes.get_mut(&id).expect("node exists")
    }

    /// `id` followed by each of its ancestors.
    fn path_to_root(&self, mut id: ViewId) -> Vec<ViewId> {
        let mut path = vec![id];
        while let Some(parent) = self.nodes[&id].parent {
            path.push(parent);
            id = parent;
        }
        path
    }

    fn unlink(&mut self, child: ViewId) {
        if let Some(parent) = self.node_mut(child).parent.take() {
            self.node_mut(parent).children.retain(|sibling| *sibling != child);
        }
    }

    fn snapshot(&self, id: ViewId) -> TreeSnapshot {
        let node = &self.nodes[&id];
        TreeSnapshot {
            id,
            view_type: node.view_type.clone(),
            props: node.props.clone(),
            children: node.children.iter().map(|child| self.snapshot(*child)).collect(),
        }
    }
}

fn random_command(rng: &mut Lcg) -> MutationCommand {
    let id = rng.below(12);
    match rng.below(6) {
        0 | 1 => {
            let view_type = if rng.below(10) == 0 { "" } else { "View" };
            MutationCommand::create(id, view_type, props([("label", json!(format!("v{id}")))]))
        }
        2 => {
            let value = if rng.below(4) == 0 {
                json!(null)
            } else {
                json!(rng.below(100))
            };
            MutationCommand::update(id, props([("value", value)]))
        }
        3 => MutationCommand::insert_child(rng.below(12), id, rng.below(4) as usize),
        4 => MutationCommand::remove_child(rng.below(12), id),
        _ => MutationCommand::delete(id),
    }
}

#[test]
fn native_tree_matches_reference_model_after_every_commit() {
    for seed in 1..=20 {
        let mut rng = Lcg(seed);
        let mut translator = ViewTreeTranslator::new();
        let mut toolkit = MemoryToolkit::new();
        let mut model = ModelTree::new(&translator.snapshot().view_type);

        for _ in 0..30 {
            for _ in 0..rng.below(8) + 1 {
                let command = random_command(&mut rng);
                let shadow_before = translator.snapshot();
                let actual = Outcome::of(&translator.apply(command.clone()));
                let expected = model.apply(&command);
                assert_eq!(actual, expected, "seed {seed}: {command:?}");
                if expected != Outcome::Applied {
                    assert_eq!(translator.snapshot(), shadow_before, "seed {seed}: {command:?}");
                }
            }
            translator.commit(&mut toolkit);

            let native = toolkit
                .snapshot(translator.root_handle())
                .expect("root exists natively");
            assert_eq!(native, model.snapshot(ViewId::ROOT), "seed {seed}");
            let violations = toolkit.violations();
            assert!(violations.is_empty(), "seed {seed}: {violations:?}");
        }

        toolkit.commit(translator.teardown());
        assert_eq!(toolkit.object_count(), 0, "seed {seed}");
        let violations = toolkit.violations();
        assert!(violations.is_empty(), "seed {seed}: {violations:?}");
    }
}

#[test]
fn rejected_commands_leave_tree_unchanged() {
    let mut translator = ViewTreeTranslator::new();
    let mut toolkit = MemoryToolkit::new();
    translator.apply_batch(vec![
        MutationCommand::create(1, "StackPanel", props([("padding", json!(4))])),
        MutationCommand::insert_child(ViewId::ROOT, 1, 0),
    ]);
    translator.commit(&mut toolkit);
    let before = translator.snapshot();
    let commits = toolkit.commit_count();

    let rejected = [
        MutationCommand::update(7, props([("text", json!("x"))])),
        MutationCommand::insert_child(7, 1, 0),
        MutationCommand::remove_child(ViewId::ROOT, 7),
        MutationCommand::delete(7),
    ];
    for command in rejected {
        match translator.apply(command) {
            Err(BridgeError::UnknownNode(id)) => assert_eq!(id, ViewId(7)),
            other => panic!("expected unknown node, got {other:?}"),
        }
    }

    assert_eq!(translator.snapshot(), before);
    assert!(!translator.has_pending());
    assert_eq!(translator.commit(&mut toolkit), 0);
    assert_eq!(toolkit.commit_count(), commits);
}

#[test]
fn list_scenario_produces_expected_native_tree() {
    let mut translator = ViewTreeTranslator::new();
    let mut toolkit = MemoryToolkit::new();
    let report = translator.apply_batch(vec![
        MutationCommand::create(1, "StackPanel", props([("orientation", json!("vertical"))])),
        MutationCommand::insert_child(ViewId::ROOT, 1, 0),
        MutationCommand::create(2, "TextBlock", props([("text", json!("a"))])),
        MutationCommand::create(3, "TextBlock", props([("text", json!("b"))])),
        MutationCommand::insert_child(1, 3, 0),
        MutationCommand::insert_child(1, 2, 0),
        MutationCommand::update(3, props([("text", json!("c"))])),
        MutationCommand::update(3, props([("color", json!("red"))])),
    ]);
    assert_eq!(report.applied, 8);
    assert_eq!(report.dropped_count(), 0);
    translator.commit(&mut toolkit);

    let tree = toolkit
        .snapshot(translator.root_handle())
        .expect("root exists natively");
    let panel = &tree.children[0];
    assert_eq!(panel.view_type, "StackPanel");
    let texts: Vec<_> = panel
        .children
        .iter()
        .map(|child| child.props["text"].clone())
        .collect();
    assert_eq!(texts, vec![json!("a"), json!("c")]);
    assert_eq!(panel.children[1].props["color"], json!("red"));

    translator.apply(MutationCommand::delete(1)).expect("delete panel");
    translator.commit(&mut toolkit);
    // Root only.
    assert_eq!(toolkit.object_count(), 1);
    assert!(toolkit.violations().is_empty());
}
