use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Location-transparent reference to an actor.
///
/// A `Pid` is a plain value. It doesn't hold on to the mailbox or any other resource of the actor
/// it points to, every operation resolves it through the [`Environment`](crate::env::Environment)
/// that the operation is invoked on. This makes it safe to copy, serialize and send a `Pid` to
/// other machines, including back to the machine that created it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pid {
    machine_id: String,
    id: String,
}

impl Pid {
    pub fn new(machine_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            id: id.into(),
        }
    }

    /// Id of the runtime instance hosting the actor.
    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    /// Id of the actor, unique inside of its machine.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_local_to(&self, machine_id: &str) -> bool {
        self.machine_id == machine_id
    }
}

impl Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.machine_id)
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::Pid;

    #[test]
    fn equality_needs_both_fields() {
        let a = Pid::new("machine-a", "1");
        assert_eq!(a, Pid::new("machine-a", "1"));
        assert_ne!(a, Pid::new("machine-b", "1"));
        assert_ne!(a, Pid::new("machine-a", "2"));
    }

    #[test]
    fn survives_serialization() {
        let pid = Pid::new("machine-a", "42");
        let json = serde_json::to_value(&pid).unwrap();
        let back: Pid = serde_json::from_value(json).unwrap();
        assert_eq!(pid, back);
        assert_eq!(back.to_string(), "42@machine-a");
    }
}
