#![forbid(unsafe_code)]

use std::collections::HashSet;

use crate::task::model::{Task, TaskIdentity};

/// Graphics executables known to fail on this host. Populated when a launch
/// is reported incompatible; cleared only when the worker restarts.
#[derive(Debug, Clone, Default)]
pub struct IncompatibilitySet {
    paths: HashSet<String>,
}

impl IncompatibilitySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, exec_path: &str) {
        self.paths.insert(exec_path.to_owned());
    }

    #[must_use]
    pub fn contains(&self, exec_path: &str) -> bool {
        self.paths.contains(exec_path)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// The client's runnable tasks as of one refresh. Snapshots replace one
/// another wholesale; nothing holds references into an old one.
#[derive(Debug, Clone, Default)]
pub struct TaskSnapshot {
    tasks: Vec<Task>,
}

impl TaskSnapshot {
    #[must_use]
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Count tasks that could be displayed: graphics-capable, not `exclude`,
    /// and not known-incompatible. Incompatible entries are dropped from the
    /// snapshot as they are found; this is the only mutation a snapshot sees.
    pub fn active_graphics_tasks(
        &mut self,
        exclude: Option<&TaskIdentity>,
        incompatible: &IncompatibilitySet,
    ) -> usize {
        let mut count = 0;
        let mut i = self.tasks.len();
        while i > 0 {
            i -= 1;
            let t = &self.tasks[i];
            if !t.has_graphics() {
                continue;
            }
            if let Some(ex) = exclude
                && t.is_same_task(ex)
            {
                continue;
            }
            if incompatible.contains(&t.graphics_exec_path) {
                self.tasks.remove(i);
                continue;
            }
            count += 1;
        }
        count
    }

    #[must_use]
    pub fn find_by_identity(&self, id: &TaskIdentity) -> Option<&Task> {
        self.tasks.iter().find(|t| t.is_same_task(id))
    }
}
