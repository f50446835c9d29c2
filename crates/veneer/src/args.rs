use smallvec::SmallVec;

use crate::{
    exception::{ErrorKind, RunResult},
    value::Value,
};

/// Call arguments: positional values plus keyword pairs.
///
/// Positional storage is inlined for up to two values since most calls pass at
/// most two arguments, avoiding a heap allocation on the hot path.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    positional: SmallVec<[Value; 2]>,
    keywords: Vec<(String, Value)>,
}

impl CallArgs {
    /// No arguments.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A single positional argument.
    #[must_use]
    pub fn one(value: Value) -> Self {
        Self {
            positional: SmallVec::from_slice(&[value]),
            keywords: Vec::new(),
        }
    }

    /// Two positional arguments.
    #[must_use]
    pub fn two(first: Value, second: Value) -> Self {
        Self {
            positional: SmallVec::from_slice(&[first, second]),
            keywords: Vec::new(),
        }
    }

    /// Arbitrary positional arguments.
    #[must_use]
    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            positional: values.into_iter().collect(),
            keywords: Vec::new(),
        }
    }

    /// Appends a keyword argument, builder style.
    #[must_use]
    pub fn keyword(mut self, name: &str, value: Value) -> Self {
        self.keywords.push((name.to_owned(), value));
        self
    }

    /// Positional arguments in order.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.positional
    }

    /// Keyword arguments in insertion order.
    #[must_use]
    pub fn kwargs(&self) -> &[(String, Value)] {
        &self.keywords
    }

    /// Looks up a keyword argument by name.
    #[must_use]
    pub fn kwarg(&self, name: &str) -> Option<Value> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| *v)
    }

    /// Number of positional arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positional.len()
    }

    /// True when no positional or keyword arguments were passed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    /// Injects an implicit first argument (bound `self`/`cls`).
    pub(crate) fn prepend(&mut self, value: Value) {
        self.positional.insert(0, value);
    }

    /// Checks that zero positional arguments were passed.
    pub fn check_zero(self, name: &str) -> RunResult<()> {
        if self.positional.is_empty() {
            Ok(())
        } else {
            Err(ErrorKind::TypeError.msg(format!(
                "{name}() takes no arguments ({} given)",
                self.positional.len()
            )))
        }
    }

    /// Checks that exactly one positional argument was passed, returning it.
    pub fn get_one(self, name: &str) -> RunResult<Value> {
        match self.positional.as_slice() {
            [value] => Ok(*value),
            other => Err(ErrorKind::TypeError.msg(format!(
                "{name}() takes exactly one argument ({} given)",
                other.len()
            ))),
        }
    }

    /// Checks that exactly two positional arguments were passed.
    pub fn get_two(self, name: &str) -> RunResult<(Value, Value)> {
        match self.positional.as_slice() {
            [first, second] => Ok((*first, *second)),
            other => Err(ErrorKind::TypeError.msg(format!(
                "{name}() takes exactly 2 arguments ({} given)",
                other.len()
            ))),
        }
    }

    /// Checks that one required and one optional positional argument were passed.
    pub fn get_one_two(self, name: &str) -> RunResult<(Value, Option<Value>)> {
        match self.positional.as_slice() {
            [first] => Ok((*first, None)),
            [first, second] => Ok((*first, Some(*second))),
            other => Err(ErrorKind::TypeError.msg(format!(
                "{name}() takes 1 or 2 arguments ({} given)",
                other.len()
            ))),
        }
    }
}
