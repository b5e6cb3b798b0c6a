// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

//! A small multi-subscriber broadcast feed. Subscribers that go away are
//! pruned on the next send.

use parking_lot::Mutex;
use std::sync::mpsc::{channel, Receiver, Sender};

pub struct Feed<T> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> Feed<T> {
    pub fn new() -> Feed<T> {
        Feed {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<T> {
        let (sender, receiver) = channel();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Delivers a clone to every live subscriber; returns how many were
    /// reached.
    pub fn send(&self, value: &T) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| sub.send(value.clone()).is_ok());
        subscribers.len()
    }
}

impl<T: Clone> Default for Feed<T> {
    fn default() -> Self { Self::new() }
}
