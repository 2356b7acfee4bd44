//! The UI-bound collection a reconciler drives.
//!
//! `ListControl` is the whole surface a reconciler needs from the UI layer.
//! `VirtualList` is an in-memory implementation with state highlighting:
//! elements created while highlighting is on stay marked as new for a fixed
//! number of ticks.

use ahash::AHashMap as HashMap;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::hash::Hash;
use tracing::{debug, trace};

/// Opaque handle to one list element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(u64);

impl ElementHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Operations a reconciler performs on a UI list.
pub trait ListControl<K> {
    fn create_element(&mut self, key: K, cells: Vec<String>) -> ElementHandle;
    fn update_element(&mut self, handle: ElementHandle, cells: Vec<String>);
    fn destroy_element(&mut self, handle: ElementHandle);
    fn find_element_by_key(&self, key: &K) -> Option<ElementHandle>;

    /// Turns new-item highlighting on or off. Turning it off clears pending marks.
    fn set_state_highlighting(&mut self, enabled: bool);

    /// Periodic refresh: advances highlight decay and repaints.
    fn tick(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct Element<K> {
    key: K,
    cells: Vec<String>,
    highlight_remaining: u32,
}

/// A row as seen by a renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct RowView<'a, K> {
    pub handle: ElementHandle,
    pub key: &'a K,
    pub cells: &'a [String],
    pub highlighted: bool,
}

/// In-memory list control. Rows keep insertion order.
#[derive(Debug)]
pub struct VirtualList<K> {
    elements: BTreeMap<ElementHandle, Element<K>>,
    by_key: HashMap<K, ElementHandle>,
    next_handle: u64,
    highlighting: bool,
    highlight_ticks: u32,
    highlight_toggles: Vec<bool>,
    ticks: u64,
}

impl<K> VirtualList<K>
where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    pub fn new(highlight_ticks: u32) -> Self {
        Self {
            elements: BTreeMap::new(),
            by_key: HashMap::new(),
            next_handle: 1,
            highlighting: true,
            highlight_ticks,
            highlight_toggles: Vec::new(),
            ticks: 0,
        }
    }

    pub fn is_highlighting(&self) -> bool {
        self.highlighting
    }

    /// Every `set_state_highlighting` call so far, in order.
    pub fn highlight_toggles(&self) -> &[bool] {
        &self.highlight_toggles
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn cells(&self, handle: ElementHandle) -> Option<&[String]> {
        self.elements.get(&handle).map(|e| e.cells.as_slice())
    }

    pub fn is_highlighted(&self, handle: ElementHandle) -> bool {
        self.elements
            .get(&handle)
            .is_some_and(|e| e.highlight_remaining > 0)
    }

    pub fn rows(&self) -> impl Iterator<Item = RowView<'_, K>> {
        self.elements.iter().map(|(handle, e)| RowView {
            handle: *handle,
            key: &e.key,
            cells: &e.cells,
            highlighted: e.highlight_remaining > 0,
        })
    }

    /// Renders the list as a fixed-width text table; highlighted rows get a `+`.
    pub fn render(&self, headers: &[&str]) -> String {
        let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
        for row in self.rows() {
            for (width, cell) in widths.iter_mut().zip(row.cells) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut out = String::new();
        out.push_str("  ");
        for (h, w) in headers.iter().zip(&widths) {
            let _ = write!(out, "{:<w$}  ", h, w = *w);
        }
        out.push('\n');
        for row in self.rows() {
            out.push_str(if row.highlighted { "+ " } else { "  " });
            for (cell, w) in row.cells.iter().zip(&widths) {
                let _ = write!(out, "{:<w$}  ", cell, w = *w);
            }
            out.push('\n');
        }
        out
    }
}

impl<K> ListControl<K> for VirtualList<K>
where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    fn create_element(&mut self, key: K, cells: Vec<String>) -> ElementHandle {
        let handle = ElementHandle(self.next_handle);
        self.next_handle += 1;
        let highlight_remaining = if self.highlighting {
            self.highlight_ticks
        } else {
            0
        };
        trace!(?key, handle = handle.0, highlight_remaining, "Element created");
        self.by_key.insert(key.clone(), handle);
        self.elements.insert(
            handle,
            Element {
                key,
                cells,
                highlight_remaining,
            },
        );
        handle
    }

    fn update_element(&mut self, handle: ElementHandle, cells: Vec<String>) {
        match self.elements.get_mut(&handle) {
            Some(e) => e.cells = cells,
            None => debug!(handle = handle.0, "Update for unknown element ignored"),
        }
    }

    fn destroy_element(&mut self, handle: ElementHandle) {
        if let Some(e) = self.elements.remove(&handle) {
            if self.by_key.get(&e.key) == Some(&handle) {
                self.by_key.remove(&e.key);
            }
        }
    }

    fn find_element_by_key(&self, key: &K) -> Option<ElementHandle> {
        self.by_key.get(key).copied()
    }

    fn set_state_highlighting(&mut self, enabled: bool) {
        self.highlight_toggles.push(enabled);
        self.highlighting = enabled;
        if !enabled {
            for e in self.elements.values_mut() {
                e.highlight_remaining = 0;
            }
        }
    }

    fn tick(&mut self) {
        self.ticks += 1;
        for e in self.elements.values_mut() {
            e.highlight_remaining = e.highlight_remaining.saturating_sub(1);
        }
    }

    fn len(&self) -> usize {
        self.elements.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_find_destroy() {
        let mut list = VirtualList::<u32>::new(2);
        let h = list.create_element(100, vec!["100".into(), "svchost".into()]);

        assert_eq!(list.find_element_by_key(&100), Some(h));
        assert_eq!(list.len(), 1);

        list.destroy_element(h);
        assert_eq!(list.find_element_by_key(&100), None);
        assert!(list.is_empty());
    }

    #[test]
    fn test_update_replaces_cells() {
        let mut list = VirtualList::<String>::new(0);
        let h = list.create_element("spooler".into(), vec!["spooler".into(), "".into()]);
        list.update_element(h, vec!["spooler".into(), "812".into()]);
        assert_eq!(list.cells(h).unwrap()[1], "812");
    }

    #[test]
    fn test_new_element_highlight_decays() {
        let mut list = VirtualList::<u32>::new(2);
        let h = list.create_element(1, vec![]);
        assert!(list.is_highlighted(h));
        list.tick();
        assert!(list.is_highlighted(h));
        list.tick();
        assert!(!list.is_highlighted(h));
    }

    #[test]
    fn test_no_highlight_while_suspended() {
        let mut list = VirtualList::<u32>::new(3);
        let before = list.create_element(1, vec![]);
        list.set_state_highlighting(false);
        let during = list.create_element(2, vec![]);
        list.set_state_highlighting(true);

        assert!(!list.is_highlighted(before));
        assert!(!list.is_highlighted(during));
        assert_eq!(list.highlight_toggles(), &[false, true]);
    }

    #[test]
    fn test_render_marks_highlighted_rows() {
        let mut list = VirtualList::<u32>::new(1);
        list.create_element(7, vec!["7".into(), "init".into()]);
        let text = list.render(&["PID", "Name"]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("PID"));
        assert!(lines[1].starts_with("+ 7"));
    }

    #[test]
    fn test_rows_keep_insertion_order() {
        let mut list = VirtualList::<u32>::new(1);
        list.set_state_highlighting(false);
        let first = list.create_element(9, vec!["9".into()]);
        list.set_state_highlighting(true);
        list.create_element(3, vec!["3".into()]);

        let rows: Vec<_> = list.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].handle, *rows[0].key, rows[0].highlighted), (first, 9, false));
        assert_eq!(*rows[1].key, 3);
        assert_eq!(rows[1].cells, &["3".to_string()][..]);
        assert!(rows[1].highlighted);
    }
}
