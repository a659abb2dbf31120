/*
    Skeen's protocol delivers messages multicast to overlapping groups in
    the same total order at every destination, without a sequencer.

    The sender stamps the message and sends it to its group. Each member
    answers with a proposal: its own clock value for the message. Once a
    member holds proposals from the whole group it takes the largest as
    the message's final timestamp, and delivers messages in final
    timestamp order once nothing still in flight could be ordered ahead.
*/

pub mod common;
pub mod config;
pub mod multicast;
pub mod network;

pub use common::{MulticastError, Result};
pub use config::{ClusterConfig, GroupConfig};
