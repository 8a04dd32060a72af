// Copyright (C) 2024 Marlin, Inc.
//
// Marlin is offered under the AGPL v3.0 and as commercial software.
// For commercial licensing, contact us at hello@marlin.io.
//
// AGPL:
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

use flume::TryRecvError;
use thiserror::Error;

/// The channel is closed: the receiving loop is gone.
#[derive(Debug, Error)]
#[error("the channel is closed")]
pub struct SendError;

impl<T> From<flume::SendError<T>> for SendError {
    fn from(_send_error: flume::SendError<T>) -> Self {
        SendError
    }
}

/// Scheduling priority of a cluster-state update task.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Priority {
    /// Jumps ahead of every queued low-priority task.
    High,
    /// Runs when no high-priority task is pending.
    Low,
}

/// Creates an unbounded two-lane channel. The receiver always drains the
/// high lane before looking at the low one.
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let (high_priority_tx, high_priority_rx) = flume::unbounded();
    let (low_priority_tx, low_priority_rx) = flume::unbounded();
    let receiver = Receiver {
        low_priority_rx,
        high_priority_rx,
        _high_priority_tx: high_priority_tx.clone(),
        pending: None,
    };
    let sender = Sender {
        low_priority_tx,
        high_priority_tx,
    };
    (sender, receiver)
}

pub struct Sender<T> {
    low_priority_tx: flume::Sender<T>,
    high_priority_tx: flume::Sender<T>,
}

impl<T> Sender<T> {
    fn lane(&self, priority: Priority) -> &flume::Sender<T> {
        match priority {
            Priority::High => &self.high_priority_tx,
            Priority::Low => &self.low_priority_tx,
        }
    }

    /// Enqueues a message. Never blocks: both lanes are unbounded.
    pub fn send(&self, msg: T, priority: Priority) -> Result<(), SendError> {
        self.lane(priority).send(msg)?;
        Ok(())
    }
}

pub struct Receiver<T> {
    low_priority_rx: flume::Receiver<T>,
    high_priority_rx: flume::Receiver<T>,
    _high_priority_tx: flume::Sender<T>,
    pending: Option<T>,
}

impl<T> Receiver<T> {
    fn try_recv_high_priority_message(&self) -> Option<T> {
        match self.high_priority_rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Disconnected) => {
                unreachable!(
                    "this can never happen, as the high priority sender is owned by the receiver"
                );
            }
            Err(TryRecvError::Empty) => None,
        }
    }

    /// Receives the next message, high lane first. Returns `None` once every
    /// external sender is gone and both lanes are drained.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(msg) = self.try_recv_high_priority_message() {
            return Some(msg);
        }
        if let Some(pending_msg) = self.pending.take() {
            return Some(pending_msg);
        }
        tokio::select! {
            high_priority_msg_res = self.high_priority_rx.recv_async() => {
                match high_priority_msg_res {
                    Ok(high_priority_msg) => Some(high_priority_msg),
                    Err(_) => {
                        unreachable!(
                            "the receiver owns the high priority sender to avoid any disconnection"
                        )
                    }
                }
            }
            low_priority_msg_res = self.low_priority_rx.recv_async() => {
                match low_priority_msg_res {
                    Ok(low_priority_msg) => {
                        if let Some(high_priority_msg) = self.try_recv_high_priority_message() {
                            self.pending = Some(low_priority_msg);
                            Some(high_priority_msg)
                        } else {
                            Some(low_priority_msg)
                        }
                    }
                    Err(flume::RecvError::Disconnected) => self.try_recv_high_priority_message(),
                }
            }
        }
    }

    /// Drains every message already sitting in the channel, high lane first.
    pub fn drain(&mut self) -> Vec<T> {
        let mut messages = Vec::new();
        while let Some(msg) = self.try_recv_high_priority_message() {
            messages.push(msg);
        }
        if let Some(pending_msg) = self.pending.take() {
            messages.push(pending_msg);
        }
        while let Ok(msg) = self.low_priority_rx.try_recv() {
            messages.push(msg);
        }
        messages
    }
}
