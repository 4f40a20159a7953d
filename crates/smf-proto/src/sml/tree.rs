//! Recursive OBIS tree and its merge operation (spec §3, §4.5, §9).
//!
//! Replaces the source's in-place tuple surgery (design note §9): merge is
//! a pure function from `(tree, path, value)` to a new tree, independent
//! of whatever representation the caller used to build the path.

use crate::model::Obis;
use crate::sml::tlv::Value;

/// A node in the OBIS parameter tree: an address, an optional leaf value,
/// and an ordered list of children.
///
/// # Invariants
///
/// Sibling order is insertion order and is preserved across merges (spec
/// §4.5).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObisTree {
    /// This node's OBIS address.
    pub name: Obis,
    /// The value stored at this node, if any.
    pub value: Option<Value>,
    /// Child nodes, in insertion order.
    pub children: Vec<ObisTree>,
}

impl ObisTree {
    /// Builds an empty node (no value, no children) for `name`.
    #[must_use]
    pub const fn empty(name: Obis) -> Self {
        Self { name, value: None, children: Vec::new() }
    }

    /// Merges `value` into the tree at `path`, creating missing
    /// intermediate nodes and replacing an existing leaf's value.
    ///
    /// # Invariants
    ///
    /// After `merge(path, value)`, `lookup(path) == Some(value)` and every
    /// other existing leaf is unchanged (spec §8).
    pub fn merge(&mut self, path: &[Obis], value: Value) {
        let Some((head, rest)) = path.split_first() else {
            self.value = Some(value);
            return;
        };
        if let Some(child) = self.children.iter_mut().find(|c| c.name == *head) {
            child.merge(rest, value);
        } else {
            let mut child = Self::empty(*head);
            child.merge(rest, value);
            self.children.push(child);
        }
    }

    /// Looks up the value stored at `path`, if the full path exists.
    #[must_use]
    pub fn lookup(&self, path: &[Obis]) -> Option<&Value> {
        match path.split_first() {
            None => self.value.as_ref(),
            Some((head, rest)) => self.children.iter().find(|c| c.name == *head)?.lookup(rest),
        }
    }

    /// Converts this node to its wire [`Value`]: a 3-element list of
    /// `(name, value-or-null, children-list)`, matching the recursive
    /// shape SML parameter trees use on the wire.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let value_slot = self.value.clone().unwrap_or(Value::Null);
        let children = Value::List(self.children.iter().map(Self::to_value).collect());
        Value::List(vec![Value::obis(*self.name.as_bytes()), value_slot, children])
    }
}
