//! Single-assignment cell shared by the racing branches.
//!
//! The first successful [`ConnectionSlot::claim`] wins and settles the slot;
//! every later claim gets its connection handed back so the caller can close
//! it. Sealing the slot on a deadline settles it without a winner.

use tokio::sync::{Mutex, watch};

pub struct ConnectionSlot<C> {
    state: Mutex<SlotState<C>>,
    settled: watch::Sender<bool>,
}

struct SlotState<C> {
    winner: Option<C>,
    sealed: bool,
}

impl<C> ConnectionSlot<C> {
    pub fn new() -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            state: Mutex::new(SlotState {
                winner: None,
                sealed: false,
            }),
            settled,
        }
    }

    /// Stores `conn` if the slot is still open, otherwise returns it unused.
    pub async fn claim(&self, conn: C) -> Result<(), C> {
        let mut state = self.state.lock().await;
        if state.sealed {
            return Err(conn);
        }
        state.winner = Some(conn);
        state.sealed = true;
        self.settled.send_replace(true);
        Ok(())
    }

    /// Closes the slot to further claims and wakes every branch.
    ///
    /// Returns the winner if one was stored before the seal.
    pub async fn seal(&self) -> Option<C> {
        let mut state = self.state.lock().await;
        state.sealed = true;
        self.settled.send_replace(true);
        state.winner.take()
    }

    pub async fn take(&self) -> Option<C> {
        self.state.lock().await.winner.take()
    }

    /// True once a winner was stored or the slot was sealed.
    pub fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    /// Resolves once the slot is settled.
    pub async fn settled(&self) {
        let mut rx = self.settled.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|settled| *settled).await;
    }
}
