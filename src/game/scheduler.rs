//! Virtual-time delay queue for deferred game actions.
//!
//! Every delayed effect in the simulation (item box respawn, roulette result,
//! hazard expiry, shell arming) is an entry here, drained by the game loop at
//! the start of each tick. Entries are never cancelled; their handlers must
//! tolerate the target having disappeared.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::game::state::{EntityId, HazardKind, ItemBoxId, Millis, PlayerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledTask {
    RespawnItemBox(ItemBoxId),
    FinishRoulette(PlayerId),
    ExpireHazard { kind: HazardKind, id: EntityId },
    ArmShell(EntityId),
}

#[derive(Debug)]
struct Entry {
    due: Millis,
    seq: u64,
    task: ScheduledTask,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the max-heap pops the earliest entry first; ties keep
    // scheduling order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Entry>,
    seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once the clock reaches `due`
    pub fn schedule(&mut self, due: Millis, task: ScheduledTask) {
        self.seq += 1;
        self.heap.push(Entry {
            due,
            seq: self.seq,
            task,
        });
    }

    /// Pop the next task due at or before `now`
    pub fn pop_due(&mut self, now: Millis) -> Option<ScheduledTask> {
        if self.heap.peek()?.due > now {
            return None;
        }
        self.heap.pop().map(|e| e.task)
    }

    pub fn next_due(&self) -> Option<Millis> {
        self.heap.peek().map(|e| e.due)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_due_order() {
        let mut s = Scheduler::new();
        s.schedule(300, ScheduledTask::ArmShell(3));
        s.schedule(100, ScheduledTask::ArmShell(1));
        s.schedule(200, ScheduledTask::ArmShell(2));

        assert_eq!(s.next_due(), Some(100));
        assert_eq!(s.pop_due(1_000), Some(ScheduledTask::ArmShell(1)));
        assert_eq!(s.pop_due(1_000), Some(ScheduledTask::ArmShell(2)));
        assert_eq!(s.pop_due(1_000), Some(ScheduledTask::ArmShell(3)));
        assert_eq!(s.pop_due(1_000), None);
    }

    #[test]
    fn test_not_due_yet() {
        let mut s = Scheduler::new();
        s.schedule(5_000, ScheduledTask::RespawnItemBox(7));
        assert_eq!(s.pop_due(4_999), None);
        assert_eq!(s.len(), 1);
        assert_eq!(s.pop_due(5_000), Some(ScheduledTask::RespawnItemBox(7)));
        assert!(s.is_empty());
    }

    #[test]
    fn test_same_due_keeps_fifo() {
        let mut s = Scheduler::new();
        s.schedule(10, ScheduledTask::FinishRoulette("b".into()));
        s.schedule(10, ScheduledTask::FinishRoulette("a".into()));
        assert_eq!(s.pop_due(10), Some(ScheduledTask::FinishRoulette("b".into())));
        assert_eq!(s.pop_due(10), Some(ScheduledTask::FinishRoulette("a".into())));
    }
}
