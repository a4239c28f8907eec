//! Integration tests for the outline arena

use trellis_outline::{Gnx, GnxGenerator, Outline, OutlineError, Position, Snapshot};

fn gnx(s: &str) -> Gnx {
    Gnx::new(s).unwrap()
}

#[test]
fn test_build_and_walk_outline() {
    let mut gen = GnxGenerator::with_timestamp("t", "20240101000000");
    let mut outline = Outline::new();

    let root = outline
        .add_root(gen.next_gnx(), "@file main.py", vec!["@others".into()])
        .unwrap();
    let a = outline.new_node(gen.next_gnx(), "def a", vec!["def a(): pass".into()]).unwrap();
    let b = outline.new_node(gen.next_gnx(), "def b", vec!["def b(): pass".into()]).unwrap();
    outline.append_child(root, a).unwrap();
    outline.insert_child(root, 0, b).unwrap();

    assert_eq!(outline.children(root).unwrap(), [b, a]);
    assert_eq!(outline.subtree(root).unwrap(), vec![root, b, a]);
    assert_eq!(outline.len(), 3);
    assert_eq!(outline.roots(), [root]);
}

#[test]
fn test_duplicate_gnx_rejected() {
    let mut outline = Outline::new();
    outline.add_root(gnx("x"), "one", vec![]).unwrap();
    let err = outline.new_node(gnx("x"), "two", vec![]).unwrap_err();
    assert_eq!(err, OutlineError::DuplicateGnx("x".into()));
}

#[test]
fn test_bad_index_rejected() {
    let mut outline = Outline::new();
    let root = outline.add_root(gnx("r"), "root", vec![]).unwrap();
    let a = outline.new_node(gnx("a"), "a", vec![]).unwrap();
    assert!(matches!(
        outline.insert_child(root, 3, a),
        Err(OutlineError::BadChildIndex { index: 3, .. })
    ));
    assert!(outline.remove_child(root, 0).is_err());
}

#[test]
fn test_deep_cycle_rejected() {
    let mut outline = Outline::new();
    let root = outline.add_root(gnx("r"), "root", vec![]).unwrap();
    let a = outline.new_node(gnx("a"), "a", vec![]).unwrap();
    let b = outline.new_node(gnx("b"), "b", vec![]).unwrap();
    outline.append_child(root, a).unwrap();
    outline.append_child(a, b).unwrap();

    assert!(matches!(
        outline.append_child(b, a),
        Err(OutlineError::Cycle { .. })
    ));
    assert!(outline.is_ancestor(root, b));
    assert!(!outline.is_ancestor(b, root));
}

#[test]
fn test_position_walk() {
    let mut outline = Outline::new();
    let root = outline.add_root(gnx("r"), "root", vec![]).unwrap();
    let a = outline.new_node(gnx("a"), "a", vec![]).unwrap();
    let b = outline.new_node(gnx("b"), "b", vec![]).unwrap();
    outline.append_child(root, a).unwrap();
    outline.append_child(a, b).unwrap();

    let pos = Position::root(root).child(a).child(b);
    assert_eq!(pos.level(), 3);
    assert_eq!(pos.node(), b);
    assert_eq!(pos.parent(), Some(a));
    assert_eq!(pos.ancestors().collect::<Vec<_>>(), vec![a, root]);
    assert!(pos.contains(root));
    assert!(Position::from_path(vec![]).is_none());
}

#[test]
fn test_snapshot_serializes() {
    let mut outline = Outline::new();
    let root = outline.add_root(gnx("r"), "root", vec!["body".into()]).unwrap();
    let snap = Snapshot::capture(&outline, root).unwrap();

    let json = serde_json::to_string(&snap).unwrap();
    let back: Snapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(snap, back);
    assert_eq!(back.len(), 1);

    outline.set_headline(root, "renamed").unwrap();
    assert!(back.outline_changed(&outline, root).unwrap());
}
