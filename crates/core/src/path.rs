//! Field paths used in error messages and reference fix-ups
//!
//! A path names a field of an entity and, optionally, a position inside a
//! composite value: `inventory[2]`, `stats{hp}`, `slots[0]{left}`.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// One step into a composite value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    /// Position in a list
    Index(usize),
    /// Key in a map
    Key(String),
}

/// Location of a value inside an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath {
    field: String,
    segments: SmallVec<[PathSegment; 4]>,
}

impl FieldPath {
    /// Path naming a whole field
    pub fn field(name: impl Into<String>) -> Self {
        FieldPath {
            field: name.into(),
            segments: SmallVec::new(),
        }
    }

    /// Name of the top-level field
    pub fn field_name(&self) -> &str {
        &self.field
    }

    /// Segments below the field, outermost first
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Number of composite levels below the field
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Whether this path names a whole field
    pub fn is_field(&self) -> bool {
        self.segments.is_empty()
    }

    /// Child path for a list element
    pub fn index(&self, index: usize) -> Self {
        let mut child = self.clone();
        child.segments.push(PathSegment::Index(index));
        child
    }

    /// Child path for a map entry
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.segments.push(PathSegment::Key(key.into()));
        child
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.field)?;
        for segment in &self.segments {
            match segment {
                PathSegment::Index(i) => write!(f, "[{}]", i)?,
                PathSegment::Key(k) => write!(f, "{{{}}}", k)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_display() {
        let path = FieldPath::field("slots").index(0).key("left");
        assert_eq!(path.to_string(), "slots[0]{left}");
        assert_eq!(path.depth(), 2);
        assert_eq!(path.field_name(), "slots");
    }

    #[test]
    fn test_child_does_not_mutate_parent() {
        let parent = FieldPath::field("inventory");
        let child = parent.index(2);
        assert!(parent.is_field());
        assert_eq!(child.to_string(), "inventory[2]");
        assert_eq!(child.segments(), &[PathSegment::Index(2)]);
    }
}
