use crate::location::Location;
use std::path::{Component, Path, PathBuf};

/// Byte offset of a 1-based location, counting columns in code points as the
/// lexer does. Locations past the end of a line clamp to the line's newline;
/// locations past the end of the text clamp to its length.
pub fn offset_of(source: &str, loc: Location) -> usize {
    let mut line = 1;
    let mut column = 1;
    for (i, c) in source.char_indices() {
        if line == loc.line && column >= loc.column {
            return i;
        }
        if c == '\n' {
            if line == loc.line {
                return i;
            }
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    source.len()
}

/// Returns the text of 1-based `line`, without its terminator.
pub fn line_text(source: &str, line: usize) -> Option<&str> {
    source.split('\n').nth(line.checked_sub(1)?).map(|l| l.trim_end_matches('\r'))
}

/// Lexically resolves `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Converts a filesystem path to a `file://` URI. Relative paths produce `file:///rel`.
pub fn path_to_uri(path: &Path) -> String {
    let display = path.to_string_lossy().replace('\\', "/");
    if path.is_absolute() {
        format!("file://{display}")
    } else {
        format!("file:///{display}")
    }
}

/// Converts a `file://` URI back to a path. Plain paths are passed through.
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    match uri.strip_prefix("file://") {
        Some(rest) if rest.is_empty() => None,
        Some(rest) => Some(PathBuf::from(rest)),
        None if uri.contains("://") => None,
        None => Some(PathBuf::from(uri)),
    }
}
