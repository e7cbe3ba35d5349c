use anyhow::Result;
use log::trace;
use quacktor_process::{Actor, Context, Message};

/// Forwards every message to the actor currently registered under a name.
///
/// Messages arriving while nothing is registered under the name are dropped.
pub struct Relay {
    name: String,
}

impl Relay {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Actor for Relay {
    fn run(&mut self, ctx: &mut Context, message: Message) -> Result<()> {
        match ctx.env().register().get(&self.name) {
            Some(pid) => ctx.send(&pid, message),
            None => trace!(
                "Relay {} dropped {}, the name is not registered",
                self.name,
                message.type_name()
            ),
        }
        Ok(())
    }
}
