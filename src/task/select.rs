#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};

use crate::task::catalog::{IncompatibilitySet, TaskSnapshot};
use crate::task::model::{Task, TaskIdentity};

/// Picks the next science task to display, uniformly at random among the
/// eligible tasks of a snapshot. The previously shown task is excluded
/// unless it is the only candidate left.
#[derive(Debug)]
pub struct Selector {
    rng: StdRng,
}

impl Selector {
    /// Seeded once from the wall clock; see `with_seed` for deterministic use.
    #[must_use]
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::with_seed(seed)
    }

    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns an owned copy of the chosen task, or `None` when nothing in
    /// the snapshot is displayable.
    pub fn choose(
        &mut self,
        snapshot: &mut TaskSnapshot,
        exclude: Option<&TaskIdentity>,
        incompatible: &IncompatibilitySet,
    ) -> Option<Task> {
        let mut avoid = exclude;
        let mut count = snapshot.active_graphics_tasks(avoid, incompatible);

        // When the previously shown task is the only candidate, show it
        // again rather than showing nothing.
        if count == 0 && avoid.is_some() {
            avoid = None;
            count = snapshot.active_graphics_tasks(None, incompatible);
        }
        if count == 0 {
            return None;
        }

        let pick = self.rng.random_range(1..=count);
        let mut seen = 0;
        for t in snapshot.tasks() {
            if !t.has_graphics() {
                continue;
            }
            if let Some(ex) = avoid
                && t.is_same_task(ex)
            {
                continue;
            }
            seen += 1;
            if seen == pick {
                return Some(t.clone());
            }
        }
        None
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gfx_task(name: &str) -> Task {
        Task {
            name: name.to_owned(),
            project_url: "https://proj.example".to_owned(),
            graphics_exec_path: format!("/gfx/{name}"),
            slot_path: format!("/slots/{name}"),
            slot: 0,
        }
    }

    fn snapshot(names: &[&str]) -> TaskSnapshot {
        TaskSnapshot::new(names.iter().map(|n| gfx_task(n)).collect())
    }

    #[test]
    fn empty_snapshot_yields_none() {
        let mut sel = Selector::with_seed(1);
        let mut snap = TaskSnapshot::default();
        assert!(sel.choose(&mut snap, None, &IncompatibilitySet::new()).is_none());
    }

    #[test]
    fn never_picks_the_excluded_task_when_alternatives_exist() {
        let inc = IncompatibilitySet::new();
        let excluded = gfx_task("b").identity();
        for seed in 0..64 {
            let mut sel = Selector::with_seed(seed);
            let mut snap = snapshot(&["a", "b", "c"]);
            let chosen = sel.choose(&mut snap, Some(&excluded), &inc).expect("candidates");
            assert_ne!(chosen.name, "b");
        }
    }

    #[test]
    fn falls_back_to_the_excluded_task_when_it_is_the_only_one() {
        let mut sel = Selector::with_seed(3);
        let mut snap = snapshot(&["only"]);
        let excluded = gfx_task("only").identity();

        let chosen = sel
            .choose(&mut snap, Some(&excluded), &IncompatibilitySet::new())
            .expect("fallback");
        assert_eq!(chosen.name, "only");
    }

    #[test]
    fn incompatible_tasks_are_never_chosen() {
        let mut inc = IncompatibilitySet::new();
        inc.mark("/gfx/a");
        inc.mark("/gfx/b");

        let mut sel = Selector::with_seed(7);
        let mut snap = snapshot(&["a", "b"]);
        assert!(sel.choose(&mut snap, None, &inc).is_none());
    }

    #[test]
    fn same_seed_and_snapshot_give_the_same_draw() {
        let inc = IncompatibilitySet::new();
        let a = Selector::with_seed(42)
            .choose(&mut snapshot(&["a", "b", "c", "d"]), None, &inc)
            .expect("pick");
        let b = Selector::with_seed(42)
            .choose(&mut snapshot(&["a", "b", "c", "d"]), None, &inc)
            .expect("pick");
        assert_eq!(a.name, b.name);
    }

    #[test]
    fn draws_cover_all_candidates_over_many_seeds() {
        let inc = IncompatibilitySet::new();
        let mut hit = std::collections::HashSet::new();
        for seed in 0..128 {
            let mut sel = Selector::with_seed(seed);
            let mut snap = snapshot(&["a", "b", "c"]);
            hit.insert(sel.choose(&mut snap, None, &inc).expect("pick").name);
        }
        assert_eq!(hit.len(), 3);
    }
}
