//! Decorator tables.
//!
//! Each scope owns one table per decorated target (instance, request, reply).
//! Tables chain onto the parent scope's table: a lookup walks from the scope
//! up to the root, so decorators added to an ancestor are visible to every
//! descendant while decorators added to a child never leak upward or sideways.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-erased decorator value.
pub type DecoratorValue = Arc<dyn Any + Send + Sync>;

/// What a decorator is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoratorTarget {
    Instance,
    Request,
    Reply,
}

impl fmt::Display for DecoratorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecoratorTarget::Instance => "instance",
            DecoratorTarget::Request => "request",
            DecoratorTarget::Reply => "reply",
        })
    }
}

/// Frozen decorator table chained to its parent.
#[derive(Default)]
pub struct DecoratorTable {
    parent: Option<Arc<DecoratorTable>>,
    own: HashMap<String, DecoratorValue>,
}

impl DecoratorTable {
    /// Build a table on top of `parent` with this scope's own entries.
    pub fn chained(
        parent: Option<Arc<DecoratorTable>>,
        own: HashMap<String, DecoratorValue>,
    ) -> Self {
        Self { parent, own }
    }

    /// Whether `name` is visible from this table.
    pub fn contains(&self, name: &str) -> bool {
        self.raw(name).is_some()
    }

    /// Typed lookup through the chain.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.raw(name).and_then(|v| v.downcast::<T>().ok())
    }

    fn raw(&self, name: &str) -> Option<DecoratorValue> {
        let mut table = Some(self);
        while let Some(current) = table {
            if let Some(value) = current.own.get(name) {
                return Some(value.clone());
            }
            table = current.parent.as_deref();
        }
        None
    }

    /// Every visible name, nearest scope first.
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut table = Some(self);
        while let Some(current) = table {
            for name in current.own.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            table = current.parent.as_deref();
        }
        names
    }
}

impl fmt::Debug for DecoratorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorTable")
            .field("names", &self.names())
            .finish()
    }
}

/// A scope's own decorators for the three targets, before load.
#[derive(Default, Clone)]
pub(crate) struct ScopeDecorators {
    pub instance: HashMap<String, DecoratorValue>,
    pub request: HashMap<String, DecoratorValue>,
    pub reply: HashMap<String, DecoratorValue>,
}

impl ScopeDecorators {
    pub fn for_target(&self, target: DecoratorTarget) -> &HashMap<String, DecoratorValue> {
        match target {
            DecoratorTarget::Instance => &self.instance,
            DecoratorTarget::Request => &self.request,
            DecoratorTarget::Reply => &self.reply,
        }
    }

    pub fn for_target_mut(
        &mut self,
        target: DecoratorTarget,
    ) -> &mut HashMap<String, DecoratorValue> {
        match target {
            DecoratorTarget::Instance => &mut self.instance,
            DecoratorTarget::Request => &mut self.request,
            DecoratorTarget::Reply => &mut self.reply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, u32)]) -> HashMap<String, DecoratorValue> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Arc::new(*v) as DecoratorValue))
            .collect()
    }

    #[test]
    fn test_child_sees_parent_entries() {
        let parent = Arc::new(DecoratorTable::chained(None, table(&[("db", 1)])));
        let child = DecoratorTable::chained(Some(parent.clone()), table(&[("user", 2)]));

        assert_eq!(child.get::<u32>("db").as_deref(), Some(&1));
        assert_eq!(child.get::<u32>("user").as_deref(), Some(&2));
        assert!(!parent.contains("user"));
    }

    #[test]
    fn test_nearest_entry_wins() {
        let parent = Arc::new(DecoratorTable::chained(None, table(&[("v", 1)])));
        let child = DecoratorTable::chained(Some(parent), table(&[("v", 2)]));
        assert_eq!(child.get::<u32>("v").as_deref(), Some(&2));
        assert_eq!(child.names(), vec!["v".to_string()]);
    }

    #[test]
    fn test_wrong_type_is_none() {
        let t = DecoratorTable::chained(None, table(&[("n", 3)]));
        assert!(t.get::<String>("n").is_none());
        assert!(t.contains("n"));
    }
}
