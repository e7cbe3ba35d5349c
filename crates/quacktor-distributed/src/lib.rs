pub mod connection;
pub mod encoding;
pub mod machine;
pub mod message;
pub mod node;
pub mod qpmd;
pub mod system;

pub use encoding::{JsonEncoder, MessageEncoder, MsgpackEncoder};
pub use machine::RemoteMachine;
pub use node::{Node, NodeConfig};
pub use system::{parse_connection_string, RemoteSystem, System};
