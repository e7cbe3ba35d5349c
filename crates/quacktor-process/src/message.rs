//! Messages are the only way actors interact with each other.
//!
//! The set of message kinds is closed: a handful of built-in variants the runtime itself relies on
//! and a [`Message::Custom`] variant carrying user types. Custom types implement [`MessageType`]
//! and must be registered with the [`MessageTypes`] registry of an environment before they can be
//! received from, or sent to, another machine.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{anyhow, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::pid::Pid;

pub const DOWN: &str = "DownMessage";
pub const POISON_PILL: &str = "PoisonPill";
pub const KILL: &str = "KillMessage";
pub const GENERIC: &str = "GenericMessage";
pub const DISCONNECT: &str = "DisconnectMessage";
pub const EMPTY: &str = "EmptyMessage";

/// A user defined message type.
///
/// `NAME` identifies the type on the wire and must be unique inside of an environment.
pub trait MessageType: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    const NAME: &'static str;
}

#[derive(Debug, Clone)]
pub enum Message {
    /// A monitored actor is gone.
    Down { who: Pid },
    /// Terminates the receiver before its `run` hook sees it.
    PoisonPill,
    /// Asks the receiver to shut down. Delivered to `run` like any other message.
    Kill,
    Generic(Value),
    /// The connection to a monitored machine was lost.
    Disconnect { machine_id: String, address: String },
    Empty,
    Custom(CustomMessage),
}

impl Message {
    pub fn down(who: Pid) -> Self {
        Self::Down { who }
    }

    pub fn generic(value: impl Into<Value>) -> Self {
        Self::Generic(value.into())
    }

    pub fn custom<T: MessageType>(value: T) -> Self {
        Self::Custom(CustomMessage::new(value))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Down { .. } => DOWN,
            Message::PoisonPill => POISON_PILL,
            Message::Kill => KILL,
            Message::Generic(_) => GENERIC,
            Message::Disconnect { .. } => DISCONNECT,
            Message::Empty => EMPTY,
            Message::Custom(custom) => custom.type_name(),
        }
    }

    /// Returns the custom payload if it is of type `T`.
    pub fn downcast_ref<T: MessageType>(&self) -> Option<&T> {
        match self {
            Message::Custom(custom) => custom.downcast_ref(),
            _ => None,
        }
    }

    /// Converts the message into its machine independent form.
    pub fn to_wire(&self) -> Result<WireMessage> {
        let value = match self {
            Message::Down { who } => serde_json::to_value(who)?,
            Message::Generic(value) => value.clone(),
            Message::Disconnect {
                machine_id,
                address,
            } => serde_json::to_value(DisconnectBody {
                machine_id: machine_id.clone(),
                address: address.clone(),
            })?,
            Message::Custom(custom) => custom.to_value()?,
            Message::PoisonPill | Message::Kill | Message::Empty => Value::Null,
        };
        Ok(WireMessage {
            kind: self.type_name().to_string(),
            value,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct DisconnectBody {
    machine_id: String,
    address: String,
}

/// The structure every message is turned into before being encoded for another machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub kind: String,
    pub value: Value,
}

trait Payload: Any + Debug + Send + Sync {
    fn to_value(&self) -> Result<Value>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: MessageType> Payload for T {
    fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Type erased value of a [`MessageType`].
///
/// Cloning is cheap, all clones share the same payload.
#[derive(Clone)]
pub struct CustomMessage {
    type_name: &'static str,
    payload: Arc<dyn Payload>,
}

impl CustomMessage {
    pub fn new<T: MessageType>(value: T) -> Self {
        Self {
            type_name: T::NAME,
            payload: Arc::new(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: MessageType>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref()
    }

    pub fn to_value(&self) -> Result<Value> {
        self.payload.to_value()
    }
}

impl Debug for CustomMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(self.type_name).field(&self.payload).finish()
    }
}

type Decoder = fn(Value) -> Result<CustomMessage>;

fn decode_custom<T: MessageType>(value: Value) -> Result<CustomMessage> {
    Ok(CustomMessage::new(serde_json::from_value::<T>(value)?))
}

/// Registry of custom message types known to an environment.
#[derive(Default)]
pub struct MessageTypes {
    decoders: RwLock<HashMap<&'static str, Decoder>>,
}

impl MessageTypes {
    /// Makes `T` decodable.
    ///
    /// # Panics
    ///
    /// If a type with the same name is already registered.
    pub fn register<T: MessageType>(&self) {
        let mut decoders = self.decoders.write().unwrap_or_else(PoisonError::into_inner);
        if decoders.contains_key(T::NAME) || is_builtin(T::NAME) {
            panic!("message type `{}` is already registered", T::NAME);
        }
        decoders.insert(T::NAME, decode_custom::<T>);
    }

    pub fn contains(&self, name: &str) -> bool {
        is_builtin(name)
            || self
                .decoders
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(name)
    }

    /// Turns a wire message back into a message.
    pub fn decode(&self, wire: WireMessage) -> Result<Message> {
        let message = match wire.kind.as_str() {
            DOWN => Message::Down {
                who: serde_json::from_value(wire.value)?,
            },
            POISON_PILL => Message::PoisonPill,
            KILL => Message::Kill,
            GENERIC => Message::Generic(wire.value),
            DISCONNECT => {
                let body: DisconnectBody = serde_json::from_value(wire.value)?;
                Message::Disconnect {
                    machine_id: body.machine_id,
                    address: body.address,
                }
            }
            EMPTY => Message::Empty,
            kind => {
                let decoder = self
                    .decoders
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(kind)
                    .copied()
                    .ok_or_else(|| anyhow!("unknown message type `{kind}`"))?;
                Message::Custom(decoder(wire.value)?)
            }
        };
        Ok(message)
    }
}

fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        DOWN | POISON_PILL | KILL | GENERIC | DISCONNECT | EMPTY
    )
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        text: String,
        times: u32,
    }

    impl MessageType for Greeting {
        const NAME: &'static str = "Greeting";
    }

    #[test]
    fn custom_message_survives_the_wire() {
        let types = MessageTypes::default();
        types.register::<Greeting>();
        let message = Message::custom(Greeting {
            text: "Hello".into(),
            times: 3,
        });
        let wire = message.to_wire().unwrap();
        assert_eq!(wire.kind, "Greeting");
        let decoded = types.decode(wire).unwrap();
        assert_eq!(
            decoded.downcast_ref::<Greeting>(),
            Some(&Greeting {
                text: "Hello".into(),
                times: 3
            })
        );
    }

    #[test]
    fn builtins_need_no_registration() {
        let types = MessageTypes::default();
        let who = Pid::new("machine", "id");
        let wire = Message::down(who.clone()).to_wire().unwrap();
        match types.decode(wire).unwrap() {
            Message::Down { who: decoded } => assert_eq!(decoded, who),
            other => panic!("Unexpected message {other:?}"),
        }
        let wire = Message::Disconnect {
            machine_id: "m".into(),
            address: "127.0.0.1".into(),
        }
        .to_wire()
        .unwrap();
        assert!(matches!(
            types.decode(wire).unwrap(),
            Message::Disconnect { machine_id, .. } if machine_id == "m"
        ));
    }

    #[test]
    fn unknown_type_fails_to_decode() {
        let types = MessageTypes::default();
        let wire = WireMessage {
            kind: "Greeting".into(),
            value: Value::Null,
        };
        assert!(types.decode(wire).is_err());
        assert!(!types.contains("Greeting"));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn double_registration_panics() {
        let types = MessageTypes::default();
        types.register::<Greeting>();
        types.register::<Greeting>();
    }
}
