//! Registry of joined users
//!
//! A fixed number of slots, each empty or holding one member. The number of
//! occupied slots is the live-client count; it never exceeds capacity.

use crate::types::ProcessId;

/// A joined user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub pid: ProcessId,
}

impl Member {
    pub fn new(name: impl Into<String>, pid: ProcessId) -> Self {
        Self {
            name: name.into(),
            pid,
        }
    }
}

/// Result of a JOIN attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Placed in the given slot
    Joined(usize),
    /// Every slot is taken
    Full,
    /// The name is already registered and names must be unique
    DuplicateName,
}

/// Fixed-capacity ordered slots
#[derive(Debug)]
pub struct Registry {
    slots: Vec<Option<Member>>,
    live: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            live: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Register a member in the first empty slot
    ///
    /// Never mutates the registry unless the outcome is `Joined`.
    pub fn join(&mut self, member: Member, unique_names: bool) -> JoinOutcome {
        if unique_names && self.contains(&member.name) {
            return JoinOutcome::DuplicateName;
        }
        if self.live >= self.capacity() {
            return JoinOutcome::Full;
        }
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(member);
                self.live += 1;
                JoinOutcome::Joined(index)
            }
            None => JoinOutcome::Full,
        }
    }

    /// Clear the slot held by exactly this member
    ///
    /// Returns false (and changes nothing) if no such member is registered.
    pub fn leave(&mut self, name: &str, pid: ProcessId) -> bool {
        let Some(slot) = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|m| m.name == name && m.pid == pid))
        else {
            return false;
        };
        *slot = None;
        self.live -= 1;
        true
    }

    /// Check if a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// First member registered under `name`
    pub fn find(&self, name: &str) -> Option<&Member> {
        self.members().find(|m| m.name == name)
    }

    /// Occupied slots in slot order
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, pid: i32) -> Member {
        Member::new(name, ProcessId(pid))
    }

    fn names(registry: &Registry) -> Vec<&str> {
        registry.members().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn test_registry_creation() {
        let registry = Registry::new(5);
        assert_eq!(registry.capacity(), 5);
        assert_eq!(registry.len(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_join_fills_first_empty_slot() {
        let mut registry = Registry::new(3);
        assert_eq!(registry.join(member("alice", 1), true), JoinOutcome::Joined(0));
        assert_eq!(registry.join(member("bob", 2), true), JoinOutcome::Joined(1));
        assert_eq!(registry.join(member("carol", 3), true), JoinOutcome::Joined(2));

        assert!(registry.leave("bob", ProcessId(2)));
        assert_eq!(registry.join(member("dave", 4), true), JoinOutcome::Joined(1));
        assert_eq!(names(&registry), vec!["alice", "dave", "carol"]);
    }

    #[test]
    fn test_join_over_capacity_leaves_registry_unchanged() {
        let mut registry = Registry::new(2);
        registry.join(member("alice", 1), true);
        registry.join(member("bob", 2), true);

        assert_eq!(registry.join(member("carol", 3), true), JoinOutcome::Full);
        assert_eq!(registry.len(), 2);
        assert_eq!(names(&registry), vec!["alice", "bob"]);
    }

    #[test]
    fn test_duplicate_name_policy() {
        let mut registry = Registry::new(3);
        registry.join(member("alice", 1), true);

        assert_eq!(registry.join(member("alice", 2), true), JoinOutcome::DuplicateName);
        assert_eq!(registry.len(), 1);

        // Allowed when names need not be unique
        assert_eq!(registry.join(member("alice", 2), false), JoinOutcome::Joined(1));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_leave_removes_only_that_member() {
        let mut registry = Registry::new(3);
        registry.join(member("alice", 1), true);
        registry.join(member("bob", 2), true);

        assert!(registry.leave("alice", ProcessId(1)));
        assert_eq!(names(&registry), vec!["bob"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_leave_unknown_is_noop() {
        let mut registry = Registry::new(3);
        registry.join(member("alice", 1), true);

        assert!(!registry.leave("zed", ProcessId(9)));
        // Right name, wrong process
        assert!(!registry.leave("alice", ProcessId(2)));
        assert_eq!(names(&registry), vec!["alice"]);
    }

    #[test]
    fn test_find() {
        let mut registry = Registry::new(3);
        registry.join(member("alice", 7), true);

        assert_eq!(registry.find("alice").map(|m| m.pid), Some(ProcessId(7)));
        assert!(registry.find("bob").is_none());
        assert!(registry.contains("alice"));
    }
}
