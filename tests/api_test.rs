use jsonnet_analysis::ast::{BinaryOp, NodeKind};
use jsonnet_analysis::cursor::find_node_at;
use jsonnet_analysis::lexer::lex;
use jsonnet_analysis::location::Location;
use jsonnet_analysis::parser::parse;
use jsonnet_analysis::visitor::AnnotatedAst;
use jsonnet_analysis::{analyze, CompletionKind};

fn tree(source: &str) -> AnnotatedAst {
    parse(lex("test.jsonnet", source).unwrap()).unwrap()
}

#[test]
fn test_multiplication_binds_tighter_than_addition() {
    let t = tree("1 + 2 * 3");
    let NodeKind::Binary { left, op, right } = t.kind(t.root) else {
        panic!("expected a binary root");
    };
    assert_eq!(*op, BinaryOp::Plus);
    assert!(matches!(t.kind(*left), NodeKind::LiteralNumber { .. }));
    assert!(matches!(
        t.kind(*right),
        NodeKind::Binary {
            op: BinaryOp::Mult,
            ..
        }
    ));
}

#[test]
fn test_index_chains_associate_left() {
    let t = tree("a.b.c");
    let NodeKind::IndexDot { target, id } = t.kind(t.root) else {
        panic!("expected an index root");
    };
    assert_eq!(t.identifier_name(*id), Some("c"));
    let NodeKind::IndexDot { target: inner, id } = t.kind(*target) else {
        panic!("expected a nested index");
    };
    assert_eq!(t.identifier_name(*id), Some("b"));
    assert!(matches!(t.kind(*inner), NodeKind::Var { .. }));
}

#[test]
fn test_object_locals_are_visible_before_their_definition() {
    let mut result = analyze("{ b: c, local c = 5 }", "test.jsonnet").unwrap();
    let hover = result.hover_at(Location::new(1, 6));
    assert_eq!(hover.code(), Some("5"));
}

#[test]
fn test_cursor_on_trailing_identifier() {
    let t = tree("local x = 1; x");
    let found = find_node_at(&t, t.root, Location::new(1, 14)).unwrap();
    assert!(matches!(t.kind(found), NodeKind::Identifier { name } if name == "x"));

    let result = analyze("local x = 1; x", "test.jsonnet").unwrap();
    assert_eq!(result.node_at(Location::new(1, 14)), Ok(found));
}

#[test]
fn test_unterminated_text_block_points_at_opening() {
    let err = analyze("|||\n  foo\n", "test.jsonnet").err().unwrap();
    let error = err.static_error().unwrap();
    assert_eq!(error.msg, "Text block not terminated with |||");
    assert_eq!(error.loc.begin, Location::new(1, 1));
}

#[test]
fn test_missing_field_completes_target_fields() {
    let mut result = analyze(
        "local foo = { x: 1, local hidden = 2 }; foo.nonexistent",
        "test.jsonnet",
    )
    .unwrap();
    let items = result.completions_at(Location::new(1, 45));
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].label, "x");
    assert_eq!(items[0].kind, CompletionKind::Field);
}

#[test]
fn test_dump_records_scopes() {
    let result = analyze("local a = 1; [a for b in [a]]", "test.jsonnet").unwrap();
    let dump = result.to_dump();
    let vars: Vec<&Vec<String>> = dump
        .nodes
        .iter()
        .filter(|n| n.kind == "Var")
        .map(|n| &n.env)
        .collect();
    // The loop source does not see `b`; the body does.
    assert_eq!(vars.len(), 2);
    assert!(vars.iter().any(|env| *env == &vec!["a".to_string()]));
    assert!(vars
        .iter()
        .any(|env| *env == &vec!["a".to_string(), "b".to_string()]));
}

#[test]
fn test_relative_and_absolute_file_names() {
    assert_eq!(
        analyze("{}", "relative/path/test.jsonnet").unwrap().uri,
        "file:///relative/path/test.jsonnet"
    );
    assert_eq!(
        analyze("{}", "/absolute/path/test.jsonnet").unwrap().uri,
        "file:///absolute/path/test.jsonnet"
    );
}
