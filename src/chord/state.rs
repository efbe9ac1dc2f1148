use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::vnode::VNodeRef;


/// Lifecycle of a local vnode. Stopped is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Uninitialized,
    Created,
    Joined,
    Active,
    Stopped,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Created => "created",
            Lifecycle::Joined => "joined",
            Lifecycle::Active => "active",
            Lifecycle::Stopped => "stopped",
        }
    }
}


/// Routing state of one vnode. Guarded by a single lock per vnode; no
/// remote call is ever made while it is held.
#[derive(Debug)]
pub(crate) struct ChordState {
    pub lifecycle: Lifecycle,
    /// Single successor slot. None until Create or Join.
    pub successor: Option<VNodeRef>,
    pub predecessor: Option<VNodeRef>,
    /// fingers[k - 1] approximates successor(id + 2^(k - 1)).
    pub fingers: Vec<Option<VNodeRef>>,
    pub last_stabilized: Option<DateTime<Utc>>,
}

impl ChordState {
    pub fn new(max_fingers: u32) -> Self {
        ChordState {
            lifecycle: Lifecycle::Uninitialized,
            successor: None,
            predecessor: None,
            fingers: vec![None; max_fingers as usize],
            last_stabilized: None,
        }
    }

    /// Finger 1 is successor(id + 1), which is the successor itself, so the
    /// two slots are updated together.
    pub fn set_successor(&mut self, successor: VNodeRef) {
        if let Some(first) = self.fingers.first_mut() {
            *first = Some(successor.clone());
        }
        self.successor = Some(successor);
    }
}


/// A point-in-time view of a vnode, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VNodeSnapshot {
    pub address: String,
    pub id: u64,
    pub lifecycle: Lifecycle,
    pub successor: Option<String>,
    pub predecessor: Option<String>,
    pub fingers: Vec<Option<String>>,
    pub last_stabilized: Option<DateTime<Utc>>,
}

impl VNodeSnapshot {
    pub(crate) fn capture(address: &str, id: u64, state: &ChordState) -> Self {
        let addr_of = |node: &Option<VNodeRef>| node.as_ref().map(|n| n.address().to_string());
        VNodeSnapshot {
            address: address.to_string(),
            id,
            lifecycle: state.lifecycle,
            successor: addr_of(&state.successor),
            predecessor: addr_of(&state.predecessor),
            fingers: state.fingers.iter().map(addr_of).collect(),
            last_stabilized: state.last_stabilized,
        }
    }
}
