use indexmap::IndexMap;
use tokio::sync::watch;
use tracing::trace;

/// Authoritative in-memory mapping of workspace-relative path → content.
///
/// All mutation funnels through the parser's dispatch path, one event at
/// a time, so a plain `&mut self` API is enough: progress appends are a
/// read-modify-write under a single borrow with no await in between,
/// which is what rules out lost updates.
///
/// Paths are flat keys; directory structure is implicit in the key and
/// materialized only by whatever UI renders the tree.
pub struct VirtualFileStore {
    files: IndexMap<String, String>,
    selected_path: Option<String>,
    revision_tx: watch::Sender<u64>,
}

impl VirtualFileStore {
    pub fn new() -> Self {
        let (revision_tx, _) = watch::channel(0);
        Self {
            files: IndexMap::new(),
            selected_path: None,
            revision_tx,
        }
    }

    /// Inserts or wholly replaces a file. Re-creating an existing path
    /// overwrites it silently: end events are authoritative and the
    /// latest write wins.
    pub fn create_file(&mut self, path: impl Into<String>, content: impl Into<String>) {
        let path = path.into();
        trace!("create {path}");
        self.files.insert(path, content.into());
        self.bump();
    }

    /// Applies a content update. For progress events (`is_final` false)
    /// `chunk` is an incremental delta appended to the current value; for
    /// the terminal update it is the full final value and replaces
    /// whatever accumulated, so deltas already applied are never counted
    /// twice. Updating a path that was never created materializes it, so
    /// a stream joined mid-operation still converges.
    pub fn update_content(&mut self, path: &str, chunk: &str, is_final: bool) {
        if is_final {
            self.files.insert(path.to_string(), chunk.to_string());
        } else {
            self.files
                .entry(path.to_string())
                .or_default()
                .push_str(chunk);
        }
        self.bump();
    }

    /// Removes a file. Deleting an absent path is a no-op, not an error.
    pub fn delete_file(&mut self, path: &str) -> bool {
        let removed = self.files.shift_remove(path).is_some();
        if removed {
            trace!("delete {path}");
            if self.selected_path.as_deref() == Some(path) {
                self.selected_path = None;
            }
            self.bump();
        }
        removed
    }

    /// UI side channel: which file the active editor/preview shows.
    pub fn set_selected_path(&mut self, path: Option<String>) {
        if self.selected_path != path {
            self.selected_path = path;
            self.bump();
        }
    }

    pub fn selected_path(&self) -> Option<&str> {
        self.selected_path.as_deref()
    }

    pub fn file(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Drops every file and the selection. Used on conversation reset.
    pub fn clear(&mut self) {
        self.files.clear();
        self.selected_path = None;
        self.bump();
    }

    /// Revision counter that ticks on every mutation, for reactive
    /// observers.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    fn bump(&self) {
        self.revision_tx.send_modify(|revision| *revision += 1);
    }
}

impl Default for VirtualFileStore {
    fn default() -> Self {
        Self::new()
    }
}
