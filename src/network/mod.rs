pub mod cluster;
pub mod node;
pub mod simulation;
pub mod transport;

pub use cluster::{collect_deliveries, Cluster};
pub use node::{Node, NodeCommand, NodeHandle};
pub use simulation::Simulation;
pub use transport::{InMemoryNetwork, Transport};

/*
    Network communication is point-to-point, authenticated and reliable:
    a process receives a message from another process if and only if the
    latter sent it, and nothing is lost. Links need not be FIFO. A
    "broadcast" is the sender putting the same message on the link to every
    group member, itself included. Processes do not crash.
*/
