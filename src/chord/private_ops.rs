use chrono::Utc;
use tokio::{sync::oneshot, time::sleep};
use tracing::{debug, info, instrument, warn};

use crate::{
    chord_id::ChordId,
    error::{ChordError, Result},
    vnode::{same_node, VNode},
};

use super::LocalVNode;


impl LocalVNode {

    /// Asks the successor for its predecessor p and adopts p as successor
    /// if it sits between this vnode and the successor. Then notifies the
    /// successor about this vnode.
    #[instrument(skip(self))]
    pub async fn stabilize(&self) -> Result<()> {
        let successor = self.current_successor().await?;

        match successor.get_predecessor().await {
            Ok(candidate) => {
                if candidate.id().is_between(&self.id(), &successor.id()) && !same_node(candidate.as_ref(), successor.as_ref()) {
                    let mut state = self.inner.state.write().await;
                    // only replace the successor this round started from
                    let unchanged = state.successor.as_ref()
                        .map_or(false, |current| same_node(current.as_ref(), successor.as_ref()));
                    if unchanged {
                        info!(successor = candidate.address(), "updated successor");
                        state.set_successor(candidate);
                    }
                }
            },
            Err(ChordError::NoPredecessor) => {},
            Err(e) => return Err(e),
        }

        let successor = self.current_successor().await?;
        if !same_node(successor.as_ref(), self) {
            successor.notify(self.to_ref()).await?;
            debug!(successor = successor.address(), "notified successor");
        }

        self.inner.state.write().await.last_stabilized = Some(Utc::now());
        Ok(())
    }

    /// Recomputes finger `index` (1-based) as successor(id + 2^(index - 1)).
    /// A failed lookup clears the finger.
    #[instrument(skip(self))]
    pub async fn fix_finger(&self, index: u32) -> Result<()> {
        self.check_finger_index(index)?;
        let target = self.id().calculate_finger(index);

        let found = self.find_successor(target).await;
        let mut state = self.inner.state.write().await;
        match found {
            Ok(node) => {
                debug!(target, finger = node.address(), "fixed finger");
                state.fingers[index as usize - 1] = Some(node);
                Ok(())
            },
            Err(e) => {
                state.fingers[index as usize - 1] = None;
                Err(e)
            },
        }
    }

    /// Pings the predecessor and forgets it if the ping fails.
    #[instrument(skip(self))]
    pub async fn check_predecessor(&self) {
        let predecessor = match self.predecessor().await {
            Some(predecessor) => predecessor,
            None => {
                debug!("no predecessor present");
                return;
            },
        };

        if let Err(e) = predecessor.ping().await {
            let mut state = self.inner.state.write().await;
            let unchanged = state.predecessor.as_ref()
                .map_or(false, |current| same_node(current.as_ref(), predecessor.as_ref()));
            if unchanged {
                warn!(predecessor = predecessor.address(), error = %e, "predecessor dead, clearing");
                state.predecessor = None;
            }
        }
    }

    pub(super) async fn stabilize_routine(self, mut stop: oneshot::Receiver<()>) {
        loop {
            if let Err(e) = self.stabilize().await {
                warn!(error = %e, "stabilize failed");
            }

            let delay = self.inner.config.stabilize_delay();
            tokio::select! {
                _ = sleep(delay) => {},
                _ = &mut stop => break,
            }
        }
        debug!("stabilize routine exiting");
    }

    /// Walks the fingers 1..=max, one per tick. A failure restarts the walk
    /// at finger 1.
    pub(super) async fn fix_fingers_routine(self, mut stop: oneshot::Receiver<()>) {
        let max = self.inner.config.max_fingers;
        let mut index = 1;
        loop {
            let result = self.fix_finger(index).await;
            if let Err(e) = &result {
                warn!(finger = index, error = %e, "fix finger failed, restarting at finger 1");
            }
            index = next_fix_index(index, &result, max);

            tokio::select! {
                _ = sleep(self.inner.config.fix_finger_delay()) => {},
                _ = &mut stop => break,
            }
        }
        debug!("fix finger routine exiting");
    }

    pub(super) async fn check_predecessor_routine(self, mut stop: oneshot::Receiver<()>) {
        loop {
            self.check_predecessor().await;

            tokio::select! {
                _ = sleep(self.inner.config.check_predecessor_delay()) => {},
                _ = &mut stop => break,
            }
        }
        debug!("check predecessor routine exiting");
    }
}

/// The finger to fix after `index`: the next one on success, finger 1 after
/// a failure.
pub(super) fn next_fix_index(index: u32, result: &Result<()>, max: u32) -> u32 {
    match result {
        Ok(()) => u64::next_index(index, max),
        Err(_) => 1,
    }
}
