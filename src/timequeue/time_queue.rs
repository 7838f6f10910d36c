use chrono::{DateTime, Utc};
use serde::Serialize;

pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Items kept in non-decreasing timestamp order. Items with equal timestamps
/// keep their insertion order.
#[derive(Debug, Clone, Serialize)]
pub struct TimeQueue<T> {
    queue: Vec<T>,
}

impl<T> Default for TimeQueue<T> {
    fn default() -> Self {
        Self { queue: Vec::new() }
    }
}

impl<T: Timestamped> TimeQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn add(&mut self, item: T) {
        let ts = item.timestamp();
        let i = self.queue.partition_point(|q| q.timestamp() <= ts);
        self.queue.insert(i, item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.add(item);
        }
    }

    pub fn pop_all(&mut self) -> Vec<T> {
        std::mem::take(&mut self.queue)
    }

    /// Remove and return every item with `timestamp <= t`, oldest first.
    pub fn pop_older_or_equal_than(&mut self, t: DateTime<Utc>) -> Vec<T> {
        let i = self.queue.partition_point(|q| q.timestamp() <= t);
        let younger = self.queue.split_off(i);
        std::mem::replace(&mut self.queue, younger)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.queue.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[derive(Debug, Clone, PartialEq)]
    struct TestItem {
        name: &'static str,
        at: DateTime<Utc>,
    }

    impl Timestamped for TestItem {
        fn timestamp(&self) -> DateTime<Utc> {
            self.at
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn item(name: &'static str, secs: i64) -> TestItem {
        TestItem { name, at: at(secs) }
    }

    fn names(items: &[TestItem]) -> Vec<&'static str> {
        items.iter().map(|i| i.name).collect()
    }

    #[test]
    fn test_pop_all_returns_oldest_first() {
        let mut q = TimeQueue::new();
        q.add(item("third", 30));
        q.add(item("first", 10));
        q.add(item("fourth", 40));
        q.add(item("second", 20));

        assert_eq!(names(&q.pop_all()), vec!["first", "second", "third", "fourth"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_equal_timestamps_keep_insertion_order() {
        let mut q = TimeQueue::new();
        q.add(item("a", 10));
        q.add(item("b", 10));
        q.add(item("early", 5));
        q.add(item("c", 10));
        assert_eq!(names(&q.pop_all()), vec!["early", "a", "b", "c"]);
    }

    #[test]
    fn test_pop_older_or_equal_than_returns_sorted_prefix() {
        let mut q = TimeQueue::new();
        q.extend(vec![
            item("d", 40),
            item("a", 10),
            item("c", 30),
            item("b", 20),
        ]);

        let older = q.pop_older_or_equal_than(at(20));
        assert_eq!(names(&older), vec!["a", "b"]);
        assert_eq!(q.len(), 2);
        assert_eq!(names(&q.pop_all()), vec!["c", "d"]);
    }

    #[test]
    fn test_pop_older_than_everything_and_nothing() {
        let mut q = TimeQueue::new();
        q.extend(vec![item("a", 10), item("b", 20)]);
        assert!(q.pop_older_or_equal_than(at(0)).is_empty());
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_older_or_equal_than(at(0) + Duration::days(1)).len(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn test_pop_all_empties_queue() {
        let mut q = TimeQueue::new();
        q.add(item("a", 10));
        assert_eq!(q.pop_all().len(), 1);
        assert!(q.pop_all().is_empty());
        q.add(item("b", 20));
        assert_eq!(names(&q.pop_all()), vec!["b"]);
    }
}
