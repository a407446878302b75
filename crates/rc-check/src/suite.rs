//! Registration of numbered units of work.
//!
//! Entries are identified by a numeric id and run in ascending id order, so
//! a batch executes in the same order on every run. Entries can be
//! registered explicitly or discovered from names of the form
//! `<prefix><digits>`, e.g. `testSomething17`.

use std::collections::{BTreeMap, BTreeSet};

/// A unit of work under test.
pub type UnitOfWork<'a> = Box<dyn FnMut() + 'a>;

pub struct Entry<'a> {
    pub id: u32,
    pub name: String,
    pub(crate) body: UnitOfWork<'a>,
}

impl core::fmt::Debug for Entry<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Numbered entries plus the skip and noisy-output registries.
#[derive(Debug, Default)]
pub struct Suite<'a> {
    pub(crate) entries: Vec<Entry<'a>>,
    pub(crate) skipped: BTreeMap<u32, String>,
    pub(crate) noisy: BTreeSet<u32>,
}

/// Numeric id of `name` under the `<prefix><digits>` convention.
///
/// Names that do not start with `prefix`, do not end in a digit, or whose
/// remainder is not a plain decimal number fitting a `u32` yield `None`.
pub fn entry_id(prefix: &str, name: &str) -> Option<u32> {
    let rest = name.strip_prefix(prefix)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

fn execution_order(a: &Entry<'_>, b: &Entry<'_>) -> core::cmp::Ordering {
    a.id.cmp(&b.id).then_with(|| a.name.cmp(&b.name))
}

impl<'a> Suite<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry under an explicit id.
    pub fn register(
        &mut self,
        id: u32,
        name: impl Into<String>,
        body: impl FnMut() + 'a,
    ) -> &mut Self {
        self.entries.push(Entry {
            id,
            name: name.into(),
            body: Box::new(body),
        });
        self
    }

    /// Add every entry whose name follows the `<prefix><digits>` convention.
    /// Other names are ignored.
    pub fn discover<N: Into<String>>(
        &mut self,
        prefix: &str,
        candidates: impl IntoIterator<Item = (N, UnitOfWork<'a>)>,
    ) -> &mut Self {
        for (name, body) in candidates {
            let name = name.into();
            if let Some(id) = entry_id(prefix, &name) {
                self.entries.push(Entry { id, name, body });
            }
        }
        self
    }

    /// Exclude `id` from execution, giving the reason shown in its status line.
    pub fn skip(&mut self, id: u32, reason: impl Into<String>) -> &mut Self {
        self.skipped.insert(id, reason.into());
        self
    }

    /// Mark `id` as expected to write to the error stream.
    pub fn noisy(&mut self, id: u32) -> &mut Self {
        self.noisy.insert(id);
        self
    }

    pub fn skip_reason(&self, id: u32) -> Option<&str> {
        self.skipped.get(&id).map(String::as_str)
    }

    pub fn is_noisy(&self, id: u32) -> bool {
        self.noisy.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Put entries in execution order: id ascending, then name.
    pub fn sort(&mut self) {
        self.entries.sort_by(execution_order);
    }

    /// Entry names in execution order. Leaves the registration order as is.
    pub fn names(&self) -> Vec<&str> {
        let mut order: Vec<&Entry<'a>> = self.entries.iter().collect();
        order.sort_by(|a, b| execution_order(a, b));
        order.into_iter().map(|e| e.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop<'a>() -> UnitOfWork<'a> {
        Box::new(|| {})
    }

    #[test]
    fn test_entry_id() {
        assert_eq!(entry_id("testCall", "testCall17"), Some(17));
        assert_eq!(entry_id("testCall", "testCall007"), Some(7));
        assert_eq!(entry_id("testCall", "testCall"), None);
        assert_eq!(entry_id("testCall", "testCallX1"), None);
        assert_eq!(entry_id("testCall", "testCall+1"), None);
        assert_eq!(entry_id("testCall", "testCall1a"), None);
        assert_eq!(entry_id("testCall", "otherCall3"), None);
        assert_eq!(entry_id("testCall", "testCall99999999999"), None);
    }

    #[test]
    fn test_discover_filters_and_orders() {
        let mut suite = Suite::new();
        suite.discover(
            "simpleFunction",
            vec![
                ("simpleFunction3", noop()),
                ("simpleFunction17", noop()),
                ("helper", noop()),
                ("simpleFunctionHelper2", noop()),
                ("simpleFunction2", noop()),
            ],
        );
        assert_eq!(suite.len(), 3);
        assert_eq!(
            suite.names(),
            vec!["simpleFunction2", "simpleFunction3", "simpleFunction17"]
        );
    }

    #[test]
    fn test_names_do_not_reorder_entries() {
        let mut suite = Suite::new();
        suite
            .register(9, "case9", || {})
            .register(1, "case1", || {})
            .register(4, "case4", || {});
        assert_eq!(suite.names(), vec!["case1", "case4", "case9"]);
        let registered: Vec<u32> = suite.entries.iter().map(|e| e.id).collect();
        assert_eq!(registered, vec![9, 1, 4]);

        suite.sort();
        let sorted: Vec<u32> = suite.entries.iter().map(|e| e.id).collect();
        assert_eq!(sorted, vec![1, 4, 9]);
    }

    #[test]
    fn test_registries() {
        let mut suite = Suite::new();
        suite
            .register(1, "case1", || {})
            .skip(2, "crashes the runtime")
            .noisy(3);
        assert_eq!(suite.skip_reason(2), Some("crashes the runtime"));
        assert_eq!(suite.skip_reason(1), None);
        assert!(suite.is_noisy(3));
        assert!(!suite.is_noisy(1));
    }
}
