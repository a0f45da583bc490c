use jsonnet_analysis::ast::{NodeId, NodeKind};
use jsonnet_analysis::config::AnalyzerConfig;
use jsonnet_analysis::location::Location;
use jsonnet_analysis::resolver::{NodeRef, ResolutionContext, ResolveFailure, ResolvedValue};
use jsonnet_analysis::service::{CachedDocument, CompilerService, DocumentCache};
use jsonnet_analysis::utils::path_to_uri;
use jsonnet_analysis::visitor::AnnotatedAst;
use jsonnet_analysis::workspace::{DocumentStore, FileSpec, FsDocumentStore, InMemoryDocumentStore};
use jsonnet_analysis::Analyzer;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

fn parsed(cache: &mut DocumentCache, store: &dyn DocumentStore, uri: &str) -> Arc<AnnotatedAst> {
    let doc = store.get(&FileSpec::Uri(uri.to_string())).unwrap();
    match cache.cache(uri, &doc.text, doc.version) {
        CachedDocument::Parsed(doc) => doc.tree.clone(),
        CachedDocument::Failed(doc) => panic!("{}", doc.failure.error()),
    }
}

fn first_of(tree: &AnnotatedAst, name: &str) -> NodeId {
    tree.subtree(tree.root)
        .into_iter()
        .find(|id| tree.kind(*id).name() == name)
        .unwrap_or_else(|| panic!("no {name} node"))
}

#[test]
fn test_mixin_later_fields_win() {
    let mut store = InMemoryDocumentStore::new();
    let uri = store.insert("/m.jsonnet", "local o = { a: 'left', b: 1 } + { a: 'right' }; o.a");
    let mut cache = DocumentCache::new();
    let tree = parsed(&mut cache, &store, &uri);
    let index = NodeRef::new(&uri, tree.clone(), first_of(&tree, "IndexDot"));

    let mut ctx = ResolutionContext::new(&store, &mut cache);
    let resolved = ctx.try_resolve_indirections(&index).unwrap();
    let ResolvedValue::Node(value) = resolved.value else {
        panic!("expected a value");
    };
    assert_eq!(value.pretty_print(), "'right'");
}

#[test]
fn test_index_into_non_object_fails_on_target() {
    let mut store = InMemoryDocumentStore::new();
    let uri = store.insert("/m.jsonnet", "local n = 5; n.field");
    let mut cache = DocumentCache::new();
    let tree = parsed(&mut cache, &store, &uri);
    let index = NodeRef::new(&uri, tree.clone(), first_of(&tree, "IndexDot"));

    let mut ctx = ResolutionContext::new(&store, &mut cache);
    assert!(matches!(
        ctx.try_resolve_indirections(&index),
        Err(ResolveFailure::IndexTarget(_))
    ));
}

#[test]
fn test_comprehension_variables_are_free() {
    let mut store = InMemoryDocumentStore::new();
    let uri = store.insert("/m.jsonnet", "[x for x in [1, 2]]");
    let mut cache = DocumentCache::new();
    let tree = parsed(&mut cache, &store, &uri);
    let var = NodeRef::new(&uri, tree.clone(), first_of(&tree, "Var"));
    assert!(matches!(var.kind(), NodeKind::Var { .. }));

    let mut ctx = ResolutionContext::new(&store, &mut cache);
    assert!(matches!(
        ctx.try_resolve_indirections(&var),
        Err(ResolveFailure::FreeVar(_))
    ));
}

#[test]
fn test_imports_from_lib_paths_on_disk() {
    let work = tempdir().unwrap();
    let vendor = tempdir().unwrap();
    fs::write(
        vendor.path().join("util.libsonnet"),
        "{\n  // Service name.\n  name: 'api',\n  port: 8080,\n}",
    )
    .unwrap();
    let main_path = work.path().join("main.jsonnet");
    let main = "local util = import 'util.libsonnet';\nutil.name";
    fs::write(&main_path, main).unwrap();

    let config = AnalyzerConfig {
        lib_paths: vec![vendor.path().to_path_buf()],
        executable_path: None,
    };
    let mut analyzer = Analyzer::from_config(work.path(), config);
    let uri = path_to_uri(&main_path);

    let hover = analyzer.on_hover(&uri, Location::new(2, 7));
    assert_eq!(hover.code(), Some("'api'"));
    assert_eq!(hover.comment(), Some(" Service name."));

    let labels: Vec<String> = analyzer
        .on_complete(&uri, Location::new(2, 1))
        .into_iter()
        .map(|c| c.label)
        .collect();
    assert!(labels.is_empty());
}

#[test]
fn test_updated_lib_paths_apply_to_next_query() {
    let work = tempdir().unwrap();
    let vendor = tempdir().unwrap();
    fs::write(vendor.path().join("util.libsonnet"), "{ name: 'api' }").unwrap();
    let main_path = work.path().join("main.jsonnet");
    fs::write(&main_path, "local util = import 'util.libsonnet';\nutil.name").unwrap();

    let mut analyzer = Analyzer::from_config(work.path(), AnalyzerConfig::default());
    let uri = path_to_uri(&main_path);
    assert!(analyzer.on_hover(&uri, Location::new(2, 7)).is_empty());

    analyzer.update_config(AnalyzerConfig {
        lib_paths: vec![vendor.path().to_path_buf()],
        executable_path: None,
    });
    assert_eq!(analyzer.config().lib_paths, vec![vendor.path().to_path_buf()]);
    assert_eq!(analyzer.on_hover(&uri, Location::new(2, 7)).code(), Some("'api'"));
}

#[test]
fn test_unsaved_buffers_shadow_disk() {
    let work = tempdir().unwrap();
    let lib_path = work.path().join("lib.libsonnet");
    fs::write(&lib_path, "{ old: 1 }").unwrap();
    let main_path = work.path().join("main.jsonnet");
    fs::write(&main_path, "(import 'lib.libsonnet').zz").unwrap();

    let mut analyzer = Analyzer::from_config(work.path(), AnalyzerConfig::default());
    let main = path_to_uri(&main_path);
    let cursor = Location::new(1, 26);
    let names = |analyzer: &mut Analyzer<FsDocumentStore>| -> Vec<String> {
        analyzer
            .on_complete(&main, cursor)
            .into_iter()
            .map(|c| c.label)
            .collect()
    };
    assert_eq!(names(&mut analyzer), vec!["old"]);

    analyzer.open(&path_to_uri(&lib_path), "{ new: 1, newer: 2 }", Some(7));
    assert_eq!(names(&mut analyzer), vec!["new", "newer"]);
}

fn unversioned_analyzer() -> Analyzer<InMemoryDocumentStore> {
    Analyzer::new(
        InMemoryDocumentStore::new(),
        DocumentCache::new(),
        AnalyzerConfig::default(),
    )
}

fn labels(analyzer: &mut Analyzer<InMemoryDocumentStore>, uri: &str, cursor: Location) -> Vec<String> {
    analyzer
        .on_complete(uri, cursor)
        .into_iter()
        .map(|c| c.label)
        .collect()
}

#[test]
fn test_unversioned_self_import_is_empty() {
    let mut analyzer = unversioned_analyzer();
    let uri = "file:///loop.jsonnet";
    analyzer.open(uri, "(import 'loop.jsonnet').x", None);

    assert!(analyzer.on_hover(uri, Location::new(1, 25)).is_empty());
    assert!(labels(&mut analyzer, uri, Location::new(1, 25)).is_empty());
}

#[test]
fn test_unversioned_mutual_imports_are_empty() {
    let mut analyzer = unversioned_analyzer();
    analyzer.open("file:///a.jsonnet", "(import 'b.jsonnet').x", None);
    analyzer.open("file:///b.jsonnet", "(import 'a.jsonnet').y", None);

    assert!(analyzer.on_hover("file:///a.jsonnet", Location::new(1, 22)).is_empty());
    assert!(analyzer.on_hover("file:///b.jsonnet", Location::new(1, 22)).is_empty());
    assert!(labels(&mut analyzer, "file:///a.jsonnet", Location::new(1, 22)).is_empty());
}

#[test]
fn test_unversioned_documents_reparse_on_every_load() {
    let mut analyzer = unversioned_analyzer();
    let lib = "file:///lib.libsonnet";
    let main = "file:///main.jsonnet";
    analyzer.open(lib, "{\n  // First.\n  a: 1,\n}", None);
    analyzer.open(main, "local lib = import 'lib.libsonnet';\nlib.a + (import 'lib.libsonnet').zz", None);

    let hover = analyzer.on_hover(main, Location::new(2, 5));
    assert_eq!(hover.code(), Some("1"));
    assert_eq!(hover.comment(), Some(" First."));
    assert_eq!(labels(&mut analyzer, main, Location::new(2, 34)), vec!["a"]);

    analyzer.store_mut().open(lib, "{ b: 2, c: 3 }", None);
    assert!(analyzer.on_hover(main, Location::new(2, 5)).is_empty());
    assert_eq!(labels(&mut analyzer, main, Location::new(2, 34)), vec!["b", "c"]);

    let mut cache = DocumentCache::new();
    let first = parsed(&mut cache, analyzer.store(), main);
    let second = parsed(&mut cache, analyzer.store(), main);
    assert!(!Arc::ptr_eq(&first, &second));
}

#[test]
fn test_missing_import_is_unresolved() {
    let work = tempdir().unwrap();
    let main_path = work.path().join("main.jsonnet");
    fs::write(&main_path, "local x = import 'nowhere.jsonnet'; x.y").unwrap();

    let mut analyzer = Analyzer::from_config(work.path(), AnalyzerConfig::default());
    let uri = path_to_uri(&main_path);
    assert!(analyzer.on_hover(&uri, Location::new(1, 39)).is_empty());
    assert!(analyzer.on_complete(&uri, Location::new(1, 39)).is_empty());
}
