//! Bound parameter values.

use std::collections::btree_map::{self, BTreeMap};

use conduit_common::Value;

/// The value of a bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    /// A single value.
    Scalar(Value),
    /// A list for an expanding `IN` parameter.
    List(Vec<Value>),
}

impl From<Value> for BindValue {
    fn from(value: Value) -> Self {
        BindValue::Scalar(value)
    }
}

impl From<i64> for BindValue {
    fn from(value: i64) -> Self {
        BindValue::Scalar(value.into())
    }
}

impl From<i32> for BindValue {
    fn from(value: i32) -> Self {
        BindValue::Scalar(value.into())
    }
}

impl From<f64> for BindValue {
    fn from(value: f64) -> Self {
        BindValue::Scalar(value.into())
    }
}

impl From<bool> for BindValue {
    fn from(value: bool) -> Self {
        BindValue::Scalar(value.into())
    }
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        BindValue::Scalar(value.into())
    }
}

impl From<String> for BindValue {
    fn from(value: String) -> Self {
        BindValue::Scalar(value.into())
    }
}

impl From<Vec<Value>> for BindValue {
    fn from(values: Vec<Value>) -> Self {
        BindValue::List(values)
    }
}

/// Parameter values keyed by bind name.
///
/// Anonymous literals are named `param_1`, `param_2`, ... in the order they
/// appear in the rendered statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundParams {
    values: BTreeMap<String, BindValue>,
}

impl BoundParams {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<BindValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// Builder form of [`BoundParams::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<BindValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a list parameter.
    pub fn set_list(&mut self, name: impl Into<String>, values: Vec<Value>) {
        self.values.insert(name.into(), BindValue::List(values));
    }

    /// Returns the value of a parameter.
    pub fn get(&self, name: &str) -> Option<&BindValue> {
        self.values.get(name)
    }

    /// Copies every parameter of `other` into this set, overriding on
    /// conflict.
    pub fn merge(&mut self, other: BoundParams) {
        self.values.extend(other.values);
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over parameters in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, BindValue> {
        self.values.iter()
    }
}
