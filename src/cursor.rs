use crate::ast::{NodeId, NodeKind};
use crate::location::Location;
use crate::visitor::{walk, AnnotatedAst, Visitor};

/// Why no identifier was found under the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindFailure {
    /// The cursor is before the first node of the document.
    BeforeDocStart,
    /// The cursor is after the last node of the document.
    AfterDocEnd,
    /// The tightest node around the cursor is not an identifier.
    NotIdentifier {
        tightest: NodeId,
        terminal_on_line: Option<NodeId>,
    },
    /// The cursor sits past the last node ending on its line.
    AfterLineEnd {
        tightest: NodeId,
        terminal_on_line: Option<NodeId>,
    },
}

impl FindFailure {
    /// Failures that still point at a node worth analyzing.
    pub fn is_analyzable(&self) -> bool {
        matches!(
            self,
            FindFailure::NotIdentifier { .. } | FindFailure::AfterLineEnd { .. }
        )
    }

    pub fn tightest(&self) -> Option<NodeId> {
        match self {
            FindFailure::NotIdentifier { tightest, .. }
            | FindFailure::AfterLineEnd { tightest, .. } => Some(*tightest),
            _ => None,
        }
    }

    pub fn terminal_on_line(&self) -> Option<NodeId> {
        match self {
            FindFailure::NotIdentifier {
                terminal_on_line, ..
            }
            | FindFailure::AfterLineEnd {
                terminal_on_line, ..
            } => *terminal_on_line,
            _ => None,
        }
    }
}

struct CursorVisitor {
    cursor: Location,
    tightest: Option<NodeId>,
    terminal: Option<NodeId>,
    terminal_on_line: Option<NodeId>,
}

impl Visitor for CursorVisitor {
    fn previsit(&mut self, tree: &AnnotatedAst, id: NodeId) {
        let loc = tree.loc(id);

        // Equally tight ranges go to the later node, so a child beats its parent.
        if self.cursor.in_range(loc)
            && self
                .tightest
                .map_or(true, |t| loc.range_is_tighter(tree.loc(t)))
        {
            self.tightest = Some(id);
        }

        if self
            .terminal
            .map_or(true, |t| loc.end.after_range_or_equal(tree.loc(t)))
        {
            self.terminal = Some(id);
        }

        if loc.end.line == self.cursor.line
            && self
                .terminal_on_line
                .map_or(true, |t| loc.end.after_range_or_equal(tree.loc(t)))
        {
            self.terminal_on_line = Some(id);
        }
    }
}

/// Finds the identifier under `cursor` in the subtree at `root`.
pub fn find_node_at(
    tree: &AnnotatedAst,
    root: NodeId,
    cursor: Location,
) -> Result<NodeId, FindFailure> {
    let mut visitor = CursorVisitor {
        cursor,
        tightest: None,
        terminal: None,
        terminal_on_line: None,
    };
    walk(tree, root, &mut visitor);

    let Some(tightest) = visitor.tightest else {
        if cursor.strictly_before_range(tree.loc(root)) {
            return Err(FindFailure::BeforeDocStart);
        }
        return Err(FindFailure::AfterDocEnd);
    };

    if matches!(tree.kind(tightest), NodeKind::Identifier { .. }) {
        return Ok(tightest);
    }

    let terminal_on_line = visitor.terminal_on_line;
    match terminal_on_line {
        Some(t) if cursor.strictly_after_range(tree.loc(t)) => Err(FindFailure::AfterLineEnd {
            tightest,
            terminal_on_line,
        }),
        _ => Err(FindFailure::NotIdentifier {
            tightest,
            terminal_on_line,
        }),
    }
}
