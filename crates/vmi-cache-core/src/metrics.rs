use std::{cell::RefCell, collections::HashMap};

/// A trait for counting named operational events.
pub trait Metrics {
    /// Increments the counter with the given name.
    fn increment(&self, name: &'static str);
}

/// Metrics sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetrics;

impl Metrics for NoMetrics {
    fn increment(&self, _name: &'static str) {}
}

/// In-process table of named counters.
#[derive(Debug, Default)]
pub struct Counters {
    counters: RefCell<HashMap<&'static str, u64>>,
}

impl Counters {
    /// Creates an empty counter table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value of a counter.
    pub fn get(&self, name: &str) -> u64 {
        self.counters.borrow().get(name).copied().unwrap_or(0)
    }

    /// Returns a snapshot of all counters, sorted by name.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        let mut result: Vec<_> = self
            .counters
            .borrow()
            .iter()
            .map(|(&name, &value)| (name, value))
            .collect();

        result.sort_unstable();
        result
    }
}

impl Metrics for Counters {
    fn increment(&self, name: &'static str) {
        *self.counters.borrow_mut().entry(name).or_default() += 1;
    }
}

impl<T> Metrics for &T
where
    T: Metrics + ?Sized,
{
    fn increment(&self, name: &'static str) {
        (**self).increment(name)
    }
}

impl<T> Metrics for std::rc::Rc<T>
where
    T: Metrics + ?Sized,
{
    fn increment(&self, name: &'static str) {
        (**self).increment(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters() {
        let counters = Counters::new();
        counters.increment("map_page");
        counters.increment("map_page");
        counters.increment("cleanup");

        assert_eq!(counters.get("map_page"), 2);
        assert_eq!(counters.get("unknown"), 0);
        assert_eq!(counters.snapshot(), vec![("cleanup", 1), ("map_page", 2)]);
    }
}
