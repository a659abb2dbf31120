use serde::{Deserialize, Serialize};

/// Per-process logical clock. Never moves backwards.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Clock {
    value: u64,
}

impl Clock {
    pub fn new() -> Self {
        Clock { value: 0 }
    }

    pub fn now(&self) -> u64 {
        self.value
    }

    /// Advances the clock for a locally generated event and returns the new value.
    pub fn tick(&mut self) -> u64 {
        self.value += 1;
        self.value
    }

    /// Raises the clock to `t` if it is behind; otherwise leaves it alone.
    pub fn observe(&mut self, t: u64) {
        self.value = self.value.max(t);
    }
}
