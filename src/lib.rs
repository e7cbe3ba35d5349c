/*!
quacktor is an actor runtime. Actors are isolated units of state that only talk to each other by
sending messages, can watch each other die, and can live on different machines.

## Core Concepts

* [`Environment`] - the runtime instance. It spawns actors, resolves [`Pid`]s and knows every
  machine it is connected to. Environments are explicit handles, several of them can live in the
  same OS process.

* [`Actor`] - the behaviour of an actor. Its hooks receive a [`Context`] to send messages, monitor
  other actors, spawn new ones or quit.

* [`Node`] - exposes an environment to other machines over TCP and connects to named
  [`System`]s through the `qpmd` registry daemon.

* [`component`] - supervisors, load balancers and links built on top of the above.
*/

pub mod component;
pub mod config;

pub use quacktor_distributed::{
    qpmd, JsonEncoder, MessageEncoder, MsgpackEncoder, Node, NodeConfig, RemoteSystem, System,
};
pub use quacktor_process::{
    abortable::NoopAbortable, template, Abortable, Actor, ActorTemplate, Context, Environment,
    FnActor, Machine, MachineDescriptor, Message, MessageType, Pid,
};
