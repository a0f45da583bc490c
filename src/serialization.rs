use crate::visitor::AnnotatedAst;
use serde::Serialize;

/// One node of an annotated tree, flattened for dumping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDump {
    pub id: usize,
    pub kind: &'static str,
    pub range: String,
    pub parent: Option<usize>,
    /// Names in scope at the node, sorted.
    pub env: Vec<String>,
    pub root_object: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeDump {
    pub root: usize,
    pub nodes: Vec<NodeDump>,
}

/// Dumps the nodes reachable from the root in pre-order.
pub(crate) fn to_dump(tree: &AnnotatedAst) -> TreeDump {
    let nodes = tree
        .subtree(tree.root)
        .into_iter()
        .map(|id| {
            let loc = tree.loc(id);
            NodeDump {
                id: id.0,
                kind: tree.kind(id).name(),
                // The file name is the same for every node.
                range: format!("{}-{}", loc.begin, loc.end),
                parent: tree.parent(id).map(|p| p.0),
                env: tree.env(id).names().map(str::to_string).collect(),
                root_object: tree.root_object(id).map(|o| o.0),
            }
        })
        .collect();
    TreeDump {
        root: tree.root.0,
        nodes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;

    #[test]
    fn dumps_scopes_and_parents() {
        let tree = parse(lex("t.jsonnet", "local x = 1; { a: x }").unwrap()).unwrap();
        let dump = to_dump(&tree);
        assert_eq!(dump.nodes[0].kind, "Local");
        assert_eq!(dump.nodes[0].parent, None);
        assert_eq!(dump.nodes[0].range, "1:1-1:22");

        let var = dump.nodes.iter().find(|n| n.kind == "Var").unwrap();
        assert_eq!(var.env, vec!["x"]);
        let object = dump.nodes.iter().find(|n| n.kind == "Object").unwrap();
        assert_eq!(var.root_object, Some(object.id));
    }
}
