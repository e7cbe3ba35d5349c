use quacktor_process::MachineDescriptor;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Hello {
        machine_id: String,
        message_gateway_port: u16,
        general_purpose_port: u16,
    },
    Register {
        system: String,
        port: u16,
        machine_id: String,
    },
    Heartbeat,
    Lookup {
        system: String,
    },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "hello",
            Request::Register { .. } => "register",
            Request::Heartbeat => "heartbeat",
            Request::Lookup { .. } => "lookup",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Lookup {
        machine: MachineDescriptor,
        port: u16,
    },
    Error(String),
}
