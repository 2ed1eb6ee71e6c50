//! Permission gate for ingestion.
//!
//! The runtime permission flow lives outside this crate. It reports its
//! outcome through a [`PermissionGate`], which the repository consults before
//! accepting a reading.

use std::sync::atomic::{AtomicU8, Ordering};

/// Outcome of the runtime permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// The user has not been asked yet.
    Undetermined,
}

impl PermissionState {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Granted => 0,
            Self::Denied => 1,
            Self::Undetermined => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Granted,
            1 => Self::Denied,
            _ => Self::Undetermined,
        }
    }
}

pub trait PermissionGate: Send + Sync {
    fn state(&self) -> PermissionState;
}

/// A gate that always allows ingestion.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
    fn state(&self) -> PermissionState {
        PermissionState::Granted
    }
}

/// A gate flipped by the permission-request collaborator.
#[derive(Debug)]
pub struct SharedPermission {
    state: AtomicU8,
}

impl SharedPermission {
    pub fn new(initial: PermissionState) -> Self {
        Self {
            state: AtomicU8::new(initial.to_u8()),
        }
    }

    pub fn grant(&self) {
        self.set(PermissionState::Granted);
    }

    pub fn deny(&self) {
        self.set(PermissionState::Denied);
    }

    pub fn set(&self, state: PermissionState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }
}

impl Default for SharedPermission {
    fn default() -> Self {
        Self::new(PermissionState::Undetermined)
    }
}

impl PermissionGate for SharedPermission {
    fn state(&self) -> PermissionState {
        PermissionState::from_u8(self.state.load(Ordering::Acquire))
    }
}
