use proptest::collection::vec;
use proptest::prelude::*;
use serde_json::json;
use treesync::{
    Applied, NodeId, Operation, OperationRange, OperationType, SyncTree, object_path, transform,
};

/// Each entry picks the parent of the next node among the nodes built so far.
fn tree_shape() -> impl Strategy<Value = Vec<prop::sample::Index>> {
    vec(any::<prop::sample::Index>(), 0..40)
}

fn build_tree(shape: &[prop::sample::Index]) -> (SyncTree, Vec<NodeId>) {
    let mut tree = SyncTree::root(json!("root"));
    let mut ids = vec![tree.root_id()];
    for (n, parent) in shape.iter().enumerate() {
        let parent = ids[parent.index(ids.len())];
        let id = tree.add_child(parent, json!(format!("node-{n}"))).unwrap();
        ids.push(id);
    }
    (tree, ids)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(proptest_config::cases()))]
    #[test]
    fn prop_path_round_trip(shape in tree_shape()) {
        let (tree, ids) = build_tree(&shape);
        for id in ids {
            let path = tree.path_from_root(id).unwrap();
            prop_assert_eq!(tree.find_node(&path).unwrap(), Some(id));
            let data_path = tree.data_path_from_root(id, &object_path!["x", 1]).unwrap();
            prop_assert_eq!(tree.find_node(&data_path).unwrap(), Some(id));
        }
    }

    #[test]
    fn prop_snapshot_round_trip(shape in tree_shape()) {
        let (tree, ids) = build_tree(&shape);
        let snapshot = tree.to_snapshot().unwrap();
        let restored = treesync::SyncTree::from_snapshot(&snapshot).unwrap();

        prop_assert_eq!(restored.to_snapshot().unwrap(), snapshot);
        prop_assert_eq!(restored.node_count(), tree.node_count());
        for id in ids {
            let original = tree.node(id).unwrap();
            let copy = restored.node(id).unwrap();
            prop_assert_eq!(copy.parent(), original.parent());
            prop_assert_eq!(copy.children(), original.children());
            prop_assert_eq!(copy.data(), original.data());
        }
    }

    #[test]
    fn prop_insert_bounds(text in "[a-zé\u{1F600} ]{0,16}", start in -40i64..40, fragment in "[A-Z]{1,4}") {
        let mut tree = SyncTree::root(json!(text.clone()));
        let root = tree.root_id();
        let op = Operation::new(OperationType::Insert, object_path!["data"], root)
            .with_range(OperationRange::starting_at(start))
            .with_data(json!(fragment.clone()));
        transform(&mut tree, &op).unwrap();

        let result = tree.payload(root).unwrap().and_then(|value| value.as_str()).unwrap().to_string();
        let units: Vec<u16> = text.encode_utf16().collect();
        let len = units.len() as i64;
        if start <= 0 {
            prop_assert_eq!(result, format!("{fragment}{text}"));
        } else if start >= len {
            prop_assert_eq!(result, format!("{text}{fragment}"));
        } else {
            let mut cut = start as usize;
            // Never split a surrogate pair.
            if (0xDC00..=0xDFFF).contains(&units[cut]) {
                cut += 1;
            }
            let split = String::from_utf16(&units[..cut]).unwrap();
            prop_assert_eq!(result, format!("{split}{fragment}{}", &text[split.len()..]));
        }
    }

    #[test]
    fn prop_full_replacement_idempotent(shape in tree_shape(), pick in any::<prop::sample::Index>(), value in any::<i64>()) {
        let (mut tree, ids) = build_tree(&shape);
        let target = ids[pick.index(ids.len())];
        let op = tree.create_replacement(target, json!({ "value": value })).unwrap();

        transform(&mut tree, &op).unwrap();
        let once = tree.to_snapshot().unwrap();
        transform(&mut tree, &op).unwrap();
        prop_assert_eq!(tree.to_snapshot().unwrap(), once);
    }

    #[test]
    fn prop_replayed_delete_is_stale(shape in vec(any::<prop::sample::Index>(), 1..40), pick in any::<prop::sample::Index>()) {
        let (mut tree, ids) = build_tree(&shape);
        // Skip the root, which cannot be deleted.
        let target = ids[1 + pick.index(ids.len() - 1)];
        let deletion = tree.create_node_deletion(target).unwrap();

        prop_assert_eq!(transform(&mut tree, &deletion).unwrap(), Applied::Applied);
        prop_assert!(!tree.contains(target));
        let after = tree.to_snapshot().unwrap();
        prop_assert_eq!(transform(&mut tree, &deletion).unwrap(), Applied::Stale);
        prop_assert_eq!(tree.to_snapshot().unwrap(), after);
    }
}
