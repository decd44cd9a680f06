#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// One runnable compute job as reported by the client.
///
/// Tasks are owned by the snapshot that delivered them; anything the
/// coordinator wants to remember across refreshes is cloned out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub project_url: String,
    /// Empty when the job ships no graphics application.
    #[serde(default)]
    pub graphics_exec_path: String,
    #[serde(default)]
    pub slot_path: String,
    #[serde(default)]
    pub slot: u32,
}

impl Task {
    #[must_use]
    pub fn has_graphics(&self) -> bool {
        !self.graphics_exec_path.is_empty()
    }

    #[must_use]
    pub fn identity(&self) -> TaskIdentity {
        TaskIdentity {
            name: self.name.clone(),
            project_url: self.project_url.clone(),
        }
    }

    #[must_use]
    pub fn is_same_task(&self, other: &TaskIdentity) -> bool {
        self.name == other.name && self.project_url == other.project_url
    }
}

/// Two tasks are the same job iff name and project URL both match;
/// every other attribute may change between refreshes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskIdentity {
    pub name: String,
    pub project_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, url: &str) -> Task {
        Task {
            name: name.to_owned(),
            project_url: url.to_owned(),
            graphics_exec_path: String::new(),
            slot_path: String::new(),
            slot: 0,
        }
    }

    #[test]
    fn identity_matches_on_name_and_project_url() {
        let a = task("wu_1", "https://proj.example/a");
        let b = task("wu_1", "https://proj.example/a");
        let c = task("wu_1", "https://proj.example/b");

        assert!(a.is_same_task(&b.identity()));
        assert!(!a.is_same_task(&c.identity()));
    }

    #[test]
    fn has_graphics_requires_nonempty_exec_path() {
        let mut t = task("wu_1", "https://proj.example/a");
        assert!(!t.has_graphics());
        t.graphics_exec_path = "/slots/0/gfx_app".to_owned();
        assert!(t.has_graphics());
    }
}
