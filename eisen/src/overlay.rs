//! Optimistic overlay over the last confirmed task list.
//!
//! The store keeps the confirmed (`base`) list and a map of in-flight
//! local mutations. [`OverlayStore::view`] resolves the two: pending values
//! win over base values, pending removals hide tasks, and tasks created
//! locally but not yet confirmed are appended.
//!
//! Every pending mark carries a revision. Acknowledging a stale revision
//! leaves a newer pending value in place, so the view always shows the
//! latest local value no matter which write finishes first.

use std::collections::{HashMap, HashSet};

use eisen_proto::task::{Task, TaskId};

/// What a pending mark refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PendingKey {
    /// A single task value or removal.
    Task(TaskId),
    /// The local ordering of the list.
    Order,
}

/// Handle returned by every local apply, used to clear it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMark {
    /// Target of the mark.
    pub key: PendingKey,
    /// Revision the mark was taken at.
    pub revision: u64,
}

/// An in-flight local change to one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingEntry {
    /// Task created or changed locally.
    Upsert {
        /// Locally applied value.
        task: Task,
        /// Revision of the apply.
        revision: u64,
    },
    /// Task deleted locally.
    Removed {
        /// Revision of the apply.
        revision: u64,
    },
}

impl PendingEntry {
    const fn revision(&self) -> u64 {
        match self {
            Self::Upsert { revision, .. } | Self::Removed { revision } => *revision,
        }
    }
}

/// Confirmed tasks plus in-flight local changes.
#[derive(Debug, Clone, Default)]
pub struct OverlayStore {
    base: Vec<Task>,
    pending: HashMap<TaskId, PendingEntry>,
    pending_order: Option<(Vec<TaskId>, u64)>,
    next_revision: u64,
}

impl OverlayStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose confirmed list is `base`.
    #[must_use]
    pub fn with_base(base: Vec<Task>) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    fn bump(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    /// Applies locally changed or created tasks. Visible immediately.
    pub fn apply_local(&mut self, tasks: &[Task]) -> Vec<PendingMark> {
        tasks
            .iter()
            .map(|task| {
                let revision = self.bump();
                self.pending.insert(
                    task.id.clone(),
                    PendingEntry::Upsert {
                        task: task.clone(),
                        revision,
                    },
                );
                PendingMark {
                    key: PendingKey::Task(task.id.clone()),
                    revision,
                }
            })
            .collect()
    }

    /// Hides a task until its deletion is confirmed.
    pub fn apply_removal(&mut self, id: &TaskId) -> PendingMark {
        let revision = self.bump();
        self.pending
            .insert(id.clone(), PendingEntry::Removed { revision });
        PendingMark {
            key: PendingKey::Task(id.clone()),
            revision,
        }
    }

    /// Imposes a local ordering on the view.
    pub fn apply_order(&mut self, ids: Vec<TaskId>) -> PendingMark {
        let revision = self.bump();
        self.pending_order = Some((ids, revision));
        PendingMark {
            key: PendingKey::Order,
            revision,
        }
    }

    /// Drops pending marks whose revision is still current.
    ///
    /// Returns how many marks were cleared. Marks superseded by a later
    /// local apply are ignored.
    pub fn clear_pending(&mut self, marks: &[PendingMark]) -> usize {
        let mut cleared = 0;
        for mark in marks {
            if !self.is_current(mark) {
                continue;
            }
            match &mark.key {
                PendingKey::Task(id) => {
                    self.pending.remove(id);
                }
                PendingKey::Order => self.pending_order = None,
            }
            cleared += 1;
        }
        cleared
    }

    /// Whether `mark` is still the latest local change for its target.
    #[must_use]
    pub fn is_current(&self, mark: &PendingMark) -> bool {
        match &mark.key {
            PendingKey::Task(id) => self
                .pending
                .get(id)
                .is_some_and(|entry| entry.revision() == mark.revision),
            PendingKey::Order => self
                .pending_order
                .as_ref()
                .is_some_and(|(_, revision)| *revision == mark.revision),
        }
    }

    /// Folds acknowledged marks into the confirmed list, then clears them.
    ///
    /// Once a write is acknowledged its values are what the store holds, so
    /// the view keeps showing them even if the store's own snapshot of that
    /// write is suppressed or still on its way. Stale marks are ignored.
    pub fn confirm(&mut self, marks: &[PendingMark]) -> usize {
        let current: Vec<&PendingMark> = marks.iter().filter(|m| self.is_current(m)).collect();
        for mark in current {
            match &mark.key {
                PendingKey::Task(id) => match self.pending.get(id) {
                    Some(PendingEntry::Upsert { task, .. }) => {
                        if let Some(existing) = self.base.iter_mut().find(|t| &t.id == id) {
                            *existing = task.clone();
                        } else {
                            self.base.push(task.clone());
                        }
                    }
                    Some(PendingEntry::Removed { .. }) => self.base.retain(|t| &t.id != id),
                    None => {}
                },
                PendingKey::Order => {
                    if let Some((order, _)) = &self.pending_order {
                        let mut rest = std::mem::take(&mut self.base);
                        for id in order {
                            if let Some(pos) = rest.iter().position(|t| &t.id == id) {
                                self.base.push(rest.remove(pos));
                            }
                        }
                        self.base.append(&mut rest);
                    }
                }
            }
        }
        self.clear_pending(marks)
    }

    /// Replaces the confirmed list. Pending entries keep overriding it.
    pub fn reconcile_remote(&mut self, tasks: Vec<Task>) {
        self.base = tasks;
    }

    /// Confirmed list as last received.
    #[must_use]
    pub fn base(&self) -> &[Task] {
        &self.base
    }

    /// Whether a task has an unconfirmed local change.
    #[must_use]
    pub fn is_pending(&self, id: &TaskId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of pending task entries plus a pending order, if any.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len() + usize::from(self.pending_order.is_some())
    }

    /// Looks up one task in the resolved view.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<Task> {
        match self.pending.get(id) {
            Some(PendingEntry::Upsert { task, .. }) => Some(task.clone()),
            Some(PendingEntry::Removed { .. }) => None,
            None => self.base.iter().find(|t| &t.id == id).cloned(),
        }
    }

    /// The list every reader observes.
    #[must_use]
    pub fn view(&self) -> Vec<Task> {
        let base_ids = self.base.iter().map(|t| &t.id);
        let mut in_flight: Vec<(&TaskId, u64)> = self
            .pending
            .iter()
            .filter(|(id, entry)| {
                matches!(entry, PendingEntry::Upsert { .. }) && !self.base.iter().any(|t| &t.id == *id)
            })
            .map(|(id, entry)| (id, entry.revision()))
            .collect();
        in_flight.sort_by_key(|(_, revision)| *revision);
        let natural: Vec<&TaskId> = base_ids.chain(in_flight.into_iter().map(|(id, _)| id)).collect();

        let ordered: Vec<&TaskId> = match &self.pending_order {
            Some((order, _)) => {
                let listed: HashSet<&TaskId> = order.iter().collect();
                order
                    .iter()
                    .chain(natural.into_iter().filter(|id| !listed.contains(id)))
                    .collect()
            }
            None => natural,
        };

        let mut seen = HashSet::new();
        ordered
            .into_iter()
            .filter(|id| seen.insert(*id))
            .filter_map(|id| self.get(id))
            .collect()
    }
}
