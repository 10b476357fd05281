use std::fmt;
use uuid::Uuid;

/// Identifies the running process in every OrderDispatched it emits.
///
/// Generated once at startup and handed to the service, so all orders
/// processed by one instance carry the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicationIdentity(Uuid);

impl ApplicationIdentity {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ApplicationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
