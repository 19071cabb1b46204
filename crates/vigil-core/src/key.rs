#![forbid(unsafe_code)]

//! Path identifiers.
//!
//! A [`Key`] names one step from a container to one of its members. A path is
//! a slice of keys from the observed root; the empty path is the root itself.

use std::fmt;
use std::rc::Rc;

/// One step in a path from the root of an observed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Named field of a record, or a string key of a map.
    Name(Rc<str>),
    /// Position in a list.
    Index(usize),
    /// Integer key of a map or set member.
    Int(i64),
    /// Boolean key of a map or set member.
    Bool(bool),
    /// Membership and length of a container.
    ///
    /// Reads of `len()`/`keys()` observe this key; inserts and removals
    /// notify it.
    Structure,
}

impl Key {
    /// Create a [`Key::Name`].
    #[must_use]
    pub fn name(name: &str) -> Self {
        Self::Name(Rc::from(name))
    }

    /// The list position, if this is an index key.
    #[must_use]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            _ => None,
        }
    }

    /// The field name, if this is a name key.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(n) => write!(f, "{n}"),
            Self::Index(i) => write!(f, "[{i}]"),
            Self::Int(i) => write!(f, "#{i}"),
            Self::Bool(b) => write!(f, "#{b}"),
            Self::Structure => f.write_str("<structure>"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::name(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Name(Rc::from(name))
    }
}

impl From<Rc<str>> for Key {
    fn from(name: Rc<str>) -> Self {
        Self::Name(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Key {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Render a path as `root.a.[0].b` for messages and logs.
#[must_use]
pub fn format_path(path: &[Key]) -> String {
    let mut out = String::from("root");
    for key in path {
        out.push('.');
        out.push_str(&key.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(Key::name("count").to_string(), "count");
        assert_eq!(Key::Index(3).to_string(), "[3]");
        assert_eq!(Key::Int(-2).to_string(), "#-2");
        assert_eq!(Key::Structure.to_string(), "<structure>");
    }

    #[test]
    fn format_path_joins_segments() {
        assert_eq!(format_path(&[]), "root");
        let path = [Key::name("a"), Key::Index(0), Key::name("b")];
        assert_eq!(format_path(&path), "root.a.[0].b");
    }

    #[test]
    fn conversions() {
        assert_eq!(Key::from("x"), Key::name("x"));
        assert_eq!(Key::from(String::from("x")), Key::name("x"));
        assert_eq!(Key::from(4usize).as_index(), Some(4));
        assert_eq!(Key::from(7i64), Key::Int(7));
        assert_eq!(Key::name("n").as_name(), Some("n"));
        assert_eq!(Key::Structure.as_name(), None);
    }
}
