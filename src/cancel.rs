// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Parent cancellation signal for the job processor.
//!
//! A [`CancelSource`] owns the sending half of a channel that never carries
//! messages; cancelling drops it, which disconnects every [`CancelToken`]
//! receiver at once. Tokens can therefore sit in a `crossbeam::select!` next
//! to other channels.
//!
//! Dropping the source also cancels its tokens.

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

/// Owner of a cancellation signal.
#[derive(Debug)]
pub struct CancelSource {
    sender: Mutex<Option<Sender<()>>>,
    token: CancelToken,
}

impl CancelSource {
    pub fn new() -> Self {
        let (sender, receiver) = channel::bounded(0);
        Self {
            sender: Mutex::new(Some(sender)),
            token: CancelToken { receiver },
        }
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Cancels every token handed out by this source. Idempotent.
    pub fn cancel(&self) {
        self.sender.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a [`CancelSource`].
#[derive(Debug, Clone)]
pub struct CancelToken {
    receiver: Receiver<()>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self {
            receiver: channel::never(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Channel that becomes ready (disconnected) on cancellation.
    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}
