//! Property-based tests for the lexer.
//!
//! Whatever lexes must render back to the exact source text: fodder,
//! comments and string delimiters included.

use jsonnet_analysis::lexer::{lex, render, TokenKind};
use proptest::prelude::*;

fn lexeme() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z_][a-z0-9_]{0,6}",
        "[0-9]{1,4}(\\.[0-9]{1,3})?",
        "'[a-z ]{0,5}'",
        "\"[a-z ]{0,5}\"",
        "// [a-z ]{0,5}\n",
        "# [a-z]{0,5}\n",
        "/\\* [a-z]{0,5} \\*/",
        prop::sample::select(vec![
            "{", "}", "[", "]", "(", ")", ",", ";", ".", ":", "::", "+", "-", "*", "==", "$",
        ])
        .prop_map(str::to_string),
    ]
}

fn separator() -> impl Strategy<Value = String> {
    prop::sample::select(vec![" ", "\n", "\t", "  ", "\n\n  "]).prop_map(str::to_string)
}

fn document() -> impl Strategy<Value = String> {
    prop::collection::vec((lexeme(), separator()), 0..30).prop_map(|parts| {
        parts
            .into_iter()
            .map(|(lexeme, sep)| lexeme + &sep)
            .collect::<String>()
    })
}

proptest! {
    #[test]
    fn generated_documents_round_trip(source in document()) {
        let tokens = lex("prop.jsonnet", &source).unwrap();
        prop_assert_eq!(render(&source, &tokens), source);
        prop_assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::EndOfFile));
    }

    #[test]
    fn arbitrary_text_never_panics(source in "\\PC{0,40}") {
        match lex("prop.jsonnet", &source) {
            Ok(tokens) => prop_assert_eq!(render(&source, &tokens), source),
            Err(failure) => prop_assert!(!failure.error.msg.is_empty()),
        }
    }
}

#[cfg(test)]
mod sample_document_tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn fixtures_round_trip() {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("ok");
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let source = fs::read_to_string(&path).unwrap();
            let tokens = lex(&path.display().to_string(), &source).unwrap();
            assert_eq!(render(&source, &tokens), source, "{}", path.display());
        }
    }
}
