use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A 1-based position in a source file. `Location::default()` (line 0)
/// is the "unset" location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(line: usize, column: usize) -> Self {
        Location { line, column }
    }

    pub fn is_set(&self) -> bool {
        self.line != 0
    }

    /// True when `self` comes before `range.begin`, or is equal to it.
    pub fn before_range_or_equal(&self, range: &LocationRange) -> bool {
        let begin = range.begin;
        self.line < begin.line || (self.line == begin.line && self.column <= begin.column)
    }

    pub fn strictly_before_range(&self, range: &LocationRange) -> bool {
        let begin = range.begin;
        self.line < begin.line || (self.line == begin.line && self.column < begin.column)
    }

    /// True when `self` comes after `range.end`, or is equal to it.
    pub fn after_range_or_equal(&self, range: &LocationRange) -> bool {
        let end = range.end;
        self.line > end.line || (self.line == end.line && self.column >= end.column)
    }

    pub fn strictly_after_range(&self, range: &LocationRange) -> bool {
        let end = range.end;
        self.line > end.line || (self.line == end.line && self.column > end.column)
    }

    /// Containment test, inclusive of both the first and the terminal column.
    pub fn in_range(&self, range: &LocationRange) -> bool {
        let (begin, end) = (range.begin, range.end);
        if begin.line == self.line && self.line == end.line {
            begin.column <= self.column && self.column <= end.column
        } else if begin.line < self.line && self.line == end.line {
            self.column <= end.column
        } else if begin.line == self.line && self.line < end.line {
            self.column >= begin.column
        } else {
            begin.line < self.line && self.line < end.line
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid location '{0}', expected 'line:column'")]
pub struct ParseLocationError(pub String);

impl FromStr for Location {
    type Err = ParseLocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseLocationError(s.to_string());
        let (line, column) = s.trim().split_once(':').ok_or_else(err)?;
        let line = line.parse::<usize>().map_err(|_| err())?;
        let column = column.parse::<usize>().map_err(|_| err())?;
        Ok(Location { line, column })
    }
}

/// A span of source text. `end` points one column past the last character.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct LocationRange {
    pub file_name: String,
    pub begin: Location,
    pub end: Location,
}

impl LocationRange {
    pub fn new(file_name: impl Into<String>, begin: Location, end: Location) -> Self {
        LocationRange {
            file_name: file_name.into(),
            begin,
            end,
        }
    }

    /// A zero-width range at `loc`, used for point errors.
    pub fn point(file_name: impl Into<String>, loc: Location) -> Self {
        Self::new(file_name, loc, loc)
    }

    pub fn is_set(&self) -> bool {
        self.begin.is_set()
    }

    /// True when `self` is nested inside `other` (both ends contained).
    pub fn range_is_tighter(&self, other: &LocationRange) -> bool {
        self.begin.in_range(other) && self.end.in_range(other)
    }
}

impl fmt::Display for LocationRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.file_name.is_empty() {
            write!(f, "{}:", self.file_name)?;
        }
        if self.begin.line == self.end.line {
            if self.begin.column == self.end.column {
                write!(f, "{}", self.begin)
            } else {
                write!(f, "{}-{}", self.begin, self.end.column)
            }
        } else {
            write!(f, "({})-({})", self.begin, self.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(b: (usize, usize), e: (usize, usize)) -> LocationRange {
        LocationRange::new("", Location::new(b.0, b.1), Location::new(e.0, e.1))
    }

    #[test]
    fn in_range_is_inclusive() {
        let r = range((1, 5), (1, 8));
        assert!(Location::new(1, 5).in_range(&r));
        assert!(Location::new(1, 8).in_range(&r));
        assert!(!Location::new(1, 9).in_range(&r));
        assert!(!Location::new(2, 1).in_range(&r));
    }

    #[test]
    fn in_range_multi_line() {
        let r = range((1, 5), (3, 2));
        assert!(Location::new(1, 10).in_range(&r));
        assert!(Location::new(2, 100).in_range(&r));
        assert!(Location::new(3, 1).in_range(&r));
        assert!(!Location::new(1, 4).in_range(&r));
        assert!(!Location::new(3, 3).in_range(&r));
    }

    #[test]
    fn tighter_ranges() {
        let outer = range((1, 1), (4, 1));
        let inner = range((2, 3), (2, 9));
        assert!(inner.range_is_tighter(&outer));
        assert!(!outer.range_is_tighter(&inner));
        assert!(inner.range_is_tighter(&inner));
    }

    #[test]
    fn before_and_after() {
        let r = range((2, 3), (2, 6));
        assert!(Location::new(1, 9).strictly_before_range(&r));
        assert!(Location::new(2, 3).before_range_or_equal(&r));
        assert!(!Location::new(2, 3).strictly_before_range(&r));
        assert!(Location::new(2, 6).after_range_or_equal(&r));
        assert!(!Location::new(2, 6).strictly_after_range(&r));
        assert!(Location::new(2, 7).strictly_after_range(&r));
    }

    #[test]
    fn display_forms() {
        let mut r = range((1, 2), (1, 2));
        assert_eq!(r.to_string(), "1:2");
        r.end = Location::new(1, 5);
        assert_eq!(r.to_string(), "1:2-5");
        r.end = Location::new(3, 1);
        r.file_name = "a.jsonnet".into();
        assert_eq!(r.to_string(), "a.jsonnet:(1:2)-(3:1)");
    }

    #[test]
    fn parse_locations() {
        assert_eq!("3:14".parse::<Location>(), Ok(Location::new(3, 14)));
        assert_eq!(" 1:2 ".parse::<Location>(), Ok(Location::new(1, 2)));
        let err = "3".parse::<Location>().unwrap_err();
        assert_eq!(err.to_string(), "invalid location '3', expected 'line:column'");
    }
}
