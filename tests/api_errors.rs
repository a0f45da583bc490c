// API error path tests
// These check error variants, diagnostic codes and the spans attached for rendering

use jsonnet_analysis::error::{AnalysisError, ConfigError, DocumentError};
use jsonnet_analysis::{analyze, AnalyzerConfig};
use miette::Diagnostic;

#[test]
fn test_api_analyze_parse_error() {
    let result = analyze("{ a: 1, a: 2 }", "test.jsonnet");
    let Err(err @ AnalysisError::Parse { .. }) = result else {
        panic!("Expected parser error");
    };
    assert_eq!(
        err.code().map(|c| c.to_string()),
        Some("jsonnet::parse_error".to_string())
    );
    let label = err.labels().unwrap().next().unwrap();
    assert_eq!(label.offset(), 8);
    assert_eq!(label.len(), 1);
}

#[test]
fn test_api_analyze_lex_error() {
    let result = analyze("local x = 1;\nx + `", "test.jsonnet");
    let Err(err @ AnalysisError::Lex { .. }) = result else {
        panic!("Expected lexer error");
    };
    assert_eq!(
        err.static_error().unwrap().msg,
        "Could not lex the character '`'"
    );
    let label = err.labels().unwrap().next().unwrap();
    assert_eq!(label.offset(), 17);
}

#[test]
fn test_api_errors_render_as_reports() {
    let err = analyze("local x = ;", "broken.jsonnet").err().unwrap();
    let report = format!("{:?}", miette::Report::new(err));
    assert!(report.contains("broken.jsonnet"));
}

#[test]
fn test_api_empty_source() {
    let err = analyze("", "test.jsonnet").err().unwrap();
    assert_eq!(err.static_error().unwrap().msg, "Unexpected end of file.");
}

#[test]
fn test_api_empty_filename() {
    assert!(analyze("{}", "").is_ok());
}

#[test]
fn test_document_errors_convert() {
    let err: AnalysisError = DocumentError::NotFound {
        path: "lib.libsonnet".to_string(),
    }
    .into();
    assert!(err.static_error().is_none());
    assert!(err.to_string().contains("lib.libsonnet"));
}

#[test]
fn test_config_errors_convert() {
    let err: AnalysisError = AnalyzerConfig::from_json("[").unwrap_err().into();
    assert!(matches!(err, AnalysisError::Config(ConfigError::Json(_))));
}
