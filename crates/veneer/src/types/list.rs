use crate::value::Value;

/// A mutable sequence of values.
#[derive(Debug, Clone, Default)]
pub(crate) struct List {
    items: Vec<Value>,
}

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    /// Resolves a possibly negative index to a position, if in range.
    #[expect(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn resolve_index(&self, index: i64) -> Option<usize> {
        let len = self.items.len() as i64;
        let position = if index < 0 { index + len } else { index };
        if (0..len).contains(&position) {
            Some(position as usize)
        } else {
            None
        }
    }

    pub fn get(&self, index: i64) -> Option<Value> {
        self.resolve_index(index).map(|i| self.items[i])
    }

    pub fn set(&mut self, index: i64, value: Value) -> bool {
        match self.resolve_index(index) {
            Some(i) => {
                self.items[i] = value;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, index: i64) -> Option<Value> {
        self.resolve_index(index).map(|i| self.items.remove(i))
    }

    pub fn push(&mut self, value: Value) {
        self.items.push(value);
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.items.pop()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
