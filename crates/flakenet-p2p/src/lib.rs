//! P2P layer -- wire messages, the tiered peer directory, and the
//! connection scheduler that keeps a node linked into the swarm.
//!
//! Three peer tiers: anchor (explicitly pinned), white (handshake
//! verified), gray (unverified, learned from others' peer lists). The
//! scheduler ticks on a fixed interval and decides whether to bootstrap
//! from a seed, open new outbound links, or shed excess ones.

pub mod config;
pub mod directory;
pub mod filter;
pub mod messages;
pub mod scheduler;

pub use config::P2pConfig;
pub use directory::{MergeError, PeerDirectory, GRAY_CAPACITY, WHITE_CAPACITY};
pub use messages::*;
pub use scheduler::{HandshakeError, Node};
