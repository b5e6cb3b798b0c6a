// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

//! Adapter for the external chain watcher. The watcher observes the
//! other chain on its own thread and forwards finalized epoch nominations
//! into a single-consumer channel; the application drains at most one
//! epoch per end-block, without blocking.

use super::types::Epoch;
use log::{debug, info};
use parking_lot::Mutex;
use std::{
    sync::mpsc::{channel, Receiver, Sender, TryRecvError},
    thread,
};

pub struct Watcher {
    sender: Mutex<Sender<Epoch>>,
    receiver: Mutex<Receiver<Epoch>>,
}

impl Watcher {
    pub fn new() -> Watcher {
        let (sender, receiver) = channel();
        Watcher {
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
        }
    }

    /// A producer handle for the external chain client (and for tests).
    pub fn epoch_sender(&self) -> Sender<Epoch> {
        self.sender.lock().clone()
    }

    /// Non-blocking drain of one epoch, if any arrived.
    pub fn try_recv(&self) -> Option<Epoch> {
        match self.receiver.lock().try_recv() {
            Ok(epoch) => Some(epoch),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Spawns the polling thread. `fetch` is asked for the epoch following
    /// the given start height and may block while the external chain
    /// catches up; returning `None` ends the watcher.
    pub fn start_polling<F>(&self, mut fetch: F)
    where F: FnMut(i64) -> Option<Epoch> + Send + 'static {
        let sender = self.epoch_sender();
        let mut next_start_height = 0;
        thread::Builder::new()
            .name("Epoch Watcher".into())
            .spawn(move || loop {
                match fetch(next_start_height) {
                    Some(epoch) => {
                        next_start_height = epoch.start_height + 1;
                        debug!(
                            "watched epoch with start height {}",
                            epoch.start_height
                        );
                        if sender.send(epoch).is_err() {
                            break;
                        }
                    }
                    None => {
                        info!("epoch watcher source drained, stopping");
                        break;
                    }
                }
            })
            .expect("spawning the watcher thread");
    }
}

impl Default for Watcher {
    fn default() -> Self { Self::new() }
}
