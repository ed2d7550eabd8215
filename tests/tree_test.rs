//! Tests for Newick parsing, normalization and annotation on realistic trees

use rstest::rstest;

use haptime::domain::{annotate, parse_newick, CalibrationParser, DomainError, PhyloTree};

fn normalized(newick: &str) -> PhyloTree {
    let mut tree = parse_newick(newick).unwrap();
    tree.normalize().unwrap();
    tree
}

fn has_unary(tree: &PhyloTree) -> bool {
    tree.iter().any(|(_, node)| node.children.len() == 1)
}

#[rstest]
#[case("((A,B),C);")]
#[case("(((A,B)),C);")]
#[case("((((A))),(B,C));")]
#[case("(((((A,B)))));")]
#[case("((A,(B,(C,((D,E))))),((F)));")]
#[case("(A:0.1,(B:0.2,C:0.3)x:0.05)root;")]
fn given_tree_when_normalizing_then_leaves_kept_and_no_unnamed_unary(#[case] newick: &str) {
    let original = parse_newick(newick).unwrap();
    let mut tree = original.clone();

    let leaves = tree.normalize().unwrap();

    assert_eq!(leaves, original.leaf_count());
    assert_eq!(tree.leaf_labels(), original.leaf_labels());
    assert!(!has_unary(&tree), "{}", tree.to_newick());
}

#[rstest]
#[case("(((A,B)),C);")]
#[case("((((A))),(B,C));")]
#[case("(((((A,B)))));")]
fn given_normalized_tree_when_normalizing_again_then_unchanged(#[case] newick: &str) {
    let mut tree = normalized(newick);
    let once = tree.to_newick();

    tree.normalize().unwrap();

    assert_eq!(tree.to_newick(), once);
}

#[test]
fn given_named_unary_node_when_normalizing_then_kept() {
    let tree = normalized("((A,B)R1b,(C)R1a);");

    assert_eq!(tree.to_newick(), "((A,B)R1b,(C)R1a);");
}

#[test]
fn given_single_leaf_tree_when_normalizing_then_degenerate_error() {
    let mut tree = parse_newick("((A));").unwrap();

    assert_eq!(tree.normalize(), Err(DomainError::DegenerateTree { leaves: 1 }));
}

#[rstest]
#[case("((A,B),C")]
#[case("((A,B),C);x")]
#[case("")]
#[case("(A,B:abc);")]
fn given_malformed_newick_when_parsing_then_syntax_error(#[case] newick: &str) {
    assert!(matches!(
        parse_newick(newick),
        Err(DomainError::NewickSyntax { .. })
    ));
}

#[test]
fn given_quoted_labels_when_round_tripping_then_preserved() {
    let tree = parse_newick("('R1b M269',(B,'it''s'))root;").unwrap();

    assert_eq!(tree.leaf_labels(), vec!["R1b M269", "B", "it's"]);
    assert_eq!(tree.to_newick(), "('R1b M269',(B,'it''s'))root;");
}

#[test]
fn given_leaf_calibration_when_annotating_then_leaf_replaced_by_prior() {
    let tree = normalized("((A,(B,C)),D);");
    let calibrations = CalibrationParser::new().parse_lines(&["B:100-200"]).unwrap();

    let annotated = annotate(tree, &calibrations).unwrap();

    let newick = annotated.tree.to_newick();
    assert!(newick.contains("B(100, 200)"), "{newick}");
    assert_eq!(annotated.root_age, None);
    assert_eq!(annotated.leaf_count, 4);
}

#[test]
fn given_stray_label_on_unary_chain_when_annotating_then_repruned() {
    // Cleared label on a named unary node leaves an unnamed unary node behind
    let tree = normalized("(((A,B)K)IJK,C)root;");
    let annotated = annotate(tree, &[]).unwrap();

    assert_eq!(annotated.tree.to_newick(), "((A,B),C)root;");
    assert!(!has_unary(&annotated.tree));
}

#[test]
fn given_same_node_twice_when_parsing_calibrations_then_duplicate_error() {
    let result = CalibrationParser::new().parse_lines(&["R1:<10", "R1:>5"]);

    assert_eq!(result, Err(DomainError::DuplicateCalibration("R1".into())));
}

#[test]
fn given_original_and_normalized_tree_then_qualifying_nodes_match() {
    let original = parse_newick("((((A,B)),(C,D)x)y,E)root;").unwrap();
    let tree = normalized("((((A,B)),(C,D)x)y,E)root;");

    let labels = |t: &PhyloTree| -> Vec<Option<String>> {
        t.qualifying_internal_nodes()
            .into_iter()
            .map(|idx| t.get_node(idx).and_then(|n| n.label.clone()))
            .collect()
    };
    assert_eq!(labels(&original), labels(&tree));
    assert_eq!(labels(&tree).len(), 4);
}
