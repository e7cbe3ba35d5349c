use quacktor_process::{MachineDescriptor, Pid};
use serde::{Deserialize, Serialize};

/// A single message on the message connection, addressed to a local id of the receiving machine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageFrame {
    pub to: String,
    /// The message, encoded by the machine's [`MessageEncoder`](crate::encoding::MessageEncoder).
    pub message: Vec<u8>,
    /// Set on the down message that resolves a monitor requested by the receiving machine.
    pub monitor: bool,
}

/// Requests on the general-purpose connection of a machine and on system servers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Hello {
        machine_id: String,
        message_gateway_port: u16,
        general_purpose_port: u16,
    },
    Lookup {
        handler: String,
    },
    Quit {
        pid_id: String,
    },
    Monitor {
        from: Pid,
        to: Pid,
    },
    Demonitor {
        from: Pid,
        to: Pid,
    },
    NewConnection {
        machine: MachineDescriptor,
    },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "hello",
            Request::Lookup { .. } => "lookup",
            Request::Quit { .. } => "quit",
            Request::Monitor { .. } => "monitor",
            Request::Demonitor { .. } => "demonitor",
            Request::NewConnection { .. } => "new_connection",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Pid(Pid),
    Error(String),
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Ok => "OK",
            Response::Pid(_) => "OK",
            Response::Error(_) => "ERROR",
        }
    }
}
