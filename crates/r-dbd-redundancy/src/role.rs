//! ---
//! dbd_section: "07-resilience-fault-tolerance"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Published role state of this daemon instance."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Which half of the active/standby pair this instance currently plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    #[default]
    Standby,
    Active,
}

impl Role {
    fn as_u8(self) -> u8 {
        match self {
            Role::Standby => 0,
            Role::Active => 1,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Role::Active,
            _ => Role::Standby,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Role::Active)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Standby => f.write_str("standby"),
            Role::Active => f.write_str("active"),
        }
    }
}

/// Role cell shared between the failover controller and the rest of the process.
///
/// Readers never block. Only the controller inside this crate stores a new
/// role, with release ordering, so a reader that observes `Active` also
/// observes everything the controller did before promoting.
#[derive(Debug, Clone, Default)]
pub struct SharedRole {
    inner: Arc<AtomicU8>,
}

impl SharedRole {
    pub fn new(initial: Role) -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(initial.as_u8())),
        }
    }

    pub fn get(&self) -> Role {
        Role::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.get().is_active()
    }

    pub(crate) fn set(&self, role: Role) {
        self.inner.store(role.as_u8(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_the_same_role() {
        let role = SharedRole::new(Role::Standby);
        let reader = role.clone();
        assert_eq!(reader.get(), Role::Standby);
        role.set(Role::Active);
        assert!(reader.is_active());
        role.set(Role::Standby);
        assert_eq!(reader.get(), Role::Standby);
    }

    #[test]
    fn default_role_is_standby() {
        assert_eq!(SharedRole::default().get(), Role::Standby);
        assert_eq!(Role::Active.to_string(), "active");
    }
}
