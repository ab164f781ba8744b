//! Leadership status cell.
//!
//! The election itself lives elsewhere; this cell is the single place its
//! outcome is published. One writer calls [`LeadershipCell::set_leader`],
//! any number of readers poll [`LeadershipCell::is_leader`] or wait for the
//! "became leader" edge.

use tokio::sync::watch;
use tracing::info;

#[derive(Debug)]
pub struct LeadershipCell {
    tx: watch::Sender<bool>,
}

impl LeadershipCell {
    #[must_use]
    pub fn new(initially_leader: bool) -> Self {
        let (tx, _) = watch::channel(initially_leader);
        Self { tx }
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        *self.tx.borrow()
    }

    /// Publish the current election outcome. Only transitions wake watchers.
    pub fn set_leader(&self, leader: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == leader {
                false
            } else {
                *current = leader;
                true
            }
        });
        if changed {
            info!(leader, "Leadership changed");
        }
    }

    #[must_use]
    pub fn watch(&self) -> LeadershipWatch {
        LeadershipWatch {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiver side of a [`LeadershipCell`]
#[derive(Debug, Clone)]
pub struct LeadershipWatch {
    rx: watch::Receiver<bool>,
}

impl LeadershipWatch {
    /// Resolves on the next false → true transition.
    ///
    /// Returns `false` if the cell was dropped, meaning no further edges will come.
    pub async fn became_leader(&mut self) -> bool {
        loop {
            if self.rx.changed().await.is_err() {
                return false;
            }
            if *self.rx.borrow_and_update() {
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_set_leader() {
        let cell = LeadershipCell::new(false);
        assert!(!cell.is_leader());
        cell.set_leader(true);
        assert!(cell.is_leader());
    }

    #[tokio::test]
    async fn test_became_leader_edge() {
        let cell = LeadershipCell::new(false);
        let mut watch = cell.watch();

        let waiter = tokio::spawn(async move { watch.became_leader().await });
        tokio::task::yield_now().await;
        cell.set_leader(true);

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result);
    }

    #[tokio::test]
    async fn test_losing_leadership_does_not_fire() {
        let cell = LeadershipCell::new(true);
        let mut watch = cell.watch();
        cell.set_leader(false);

        let fired = tokio::time::timeout(Duration::from_millis(50), watch.became_leader()).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn test_dropped_cell_ends_watch() {
        let cell = LeadershipCell::new(false);
        let mut watch = cell.watch();
        drop(cell);
        assert!(!watch.became_leader().await);
    }
}
