use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::pid::Pid;

/// Maps logical names to the pid currently serving them.
///
/// Supervisors keep the names of their children up to date across restarts, relays resolve them
/// on every message.
#[derive(Default)]
pub struct Register {
    names: RwLock<HashMap<String, Pid>>,
}

impl Register {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Pid>> {
        self.names.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Pid>> {
        self.names.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds `name` to `pid`, returning the pid it replaced.
    pub fn set(&self, name: impl Into<String>, pid: Pid) -> Option<Pid> {
        self.write().insert(name.into(), pid)
    }

    pub fn get(&self, name: &str) -> Option<Pid> {
        self.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Pid> {
        self.write().remove(name)
    }

    /// Replaces the pid bound to `name` while holding the write lock.
    ///
    /// `supplier` receives the current binding. Returning `None` removes the name.
    pub fn update<F>(&self, name: &str, supplier: F) -> Option<Pid>
    where
        F: FnOnce(Option<&Pid>) -> Option<Pid>,
    {
        let mut names = self.write();
        match supplier(names.get(name)) {
            Some(pid) => {
                names.insert(name.to_string(), pid.clone());
                Some(pid)
            }
            None => {
                names.remove(name);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_sees_current_binding() {
        let register = Register::default();
        let first = Pid::new("m", "1");
        let second = Pid::new("m", "2");
        assert_eq!(register.set("worker", first.clone()), None);
        let updated = register.update("worker", |current| {
            assert_eq!(current, Some(&first));
            Some(second.clone())
        });
        assert_eq!(updated, Some(second.clone()));
        assert_eq!(register.get("worker"), Some(second));
        register.update("worker", |_| None);
        assert!(register.is_empty());
    }
}
