//! Path components
//!
//! A component is one step of a path: a qualified name plus a 1-based
//! same-name-sibling index. The index defaults to 1, which is never rendered,
//! so `a` and `a[1]` are the same component.

use std::fmt;

use super::name::QualifiedName;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Component {
    name: QualifiedName,
    index: u32,
}

impl Component {
    /// Creates a component with an explicit sibling index
    pub fn new(name: QualifiedName, index: u32) -> Result<Self> {
        if index == 0 {
            return Err(StoreError::invalid_path(
                format!("{}[0]", name),
                "same-name-sibling indices start at 1",
            ));
        }
        Ok(Self { name, index })
    }

    /// Creates a component with the default index
    pub fn named(name: QualifiedName) -> Self {
        Self { name, index: 1 }
    }

    pub fn name(&self) -> &QualifiedName {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns the same name at another sibling index
    pub fn with_index(&self, index: u32) -> Result<Self> {
        Self::new(self.name.clone(), index)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.index > 1 {
            write!(f, "[{}]", self.index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> QualifiedName {
        QualifiedName::local(s).unwrap()
    }

    #[test]
    fn default_index_is_unrendered() {
        let c = Component::named(name("a"));
        assert_eq!(c.to_string(), "a");
        assert_eq!(c, Component::new(name("a"), 1).unwrap());
    }

    #[test]
    fn explicit_index_is_rendered() {
        let c = Component::new(name("a"), 3).unwrap();
        assert_eq!(c.to_string(), "a[3]");
        assert_ne!(c, Component::named(name("a")));
    }

    #[test]
    fn zero_index_rejected() {
        assert!(Component::new(name("a"), 0).is_err());
    }
}
