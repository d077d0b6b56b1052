use std::collections::HashMap;
use std::sync::Mutex;

/// Process-wide ledger counting how many configured listeners reference each
/// concrete address.
///
/// During a configuration reload the incoming and outgoing configurations
/// overlap: an address with a usage count of two or more is being handed off
/// and keeps serving, while a count below two means the listener is truly
/// closing and is eligible for the shutdown delay. The registry is an
/// explicit collaborator so tests can supply their own; it is consulted only
/// at start and stop, never on the data path.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    usage: Mutex<HashMap<String, usize>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more user of `key`, returning the new count
    pub fn acquire(&self, key: &str) -> usize {
        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        let count = usage.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Release one user of `key`, returning the remaining count
    pub fn release(&self, key: &str) -> usize {
        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        match usage.get_mut(key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            Some(_) => {
                usage.remove(key);
                0
            }
            None => 0,
        }
    }

    pub fn usage(&self, key: &str) -> usize {
        let usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        usage.get(key).copied().unwrap_or(0)
    }
}
