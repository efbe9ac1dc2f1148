//! A Chord ring: consistent hashing of keys onto vnodes, kept correct by
//! periodic stabilization as vnodes join and fail.

pub mod chord;
pub use chord::{LocalVNode, Lifecycle, VNodeSnapshot};

pub mod adaptor;
pub use adaptor::{RemoteVNode, TransportClient, TransportServer};

pub mod chord_id;
pub use chord_id::{hash, ChordId};

pub mod config;
pub use config::VNodeConfig;

pub mod error;
pub use error::{ChordError, Result};

pub mod ring;
pub use ring::Ring;

mod vnode;
pub use vnode::{same_node, VNode, VNodeRef};
