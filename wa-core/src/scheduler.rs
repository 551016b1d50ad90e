// Copyright 2025 AgentReplay (https://github.com/agentreplay)
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

//! Virtual-time timers.
//!
//! The host owns real time and calls [`crate::Pipeline::advance`]; the
//! scheduler only keeps deadlines and hands back due tasks in deadline
//! order (insertion order breaks ties).

use std::collections::BTreeMap;

/// Handle to a scheduled entry, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

#[derive(Debug)]
struct Entry<T> {
    token: TimerToken,
    period: Option<u64>,
    task: T,
}

/// A task whose deadline has passed.
#[derive(Debug, Clone, PartialEq)]
pub struct Fired<T> {
    pub token: TimerToken,
    pub due_ms: u64,
    pub task: T,
}

#[derive(Debug)]
pub struct Scheduler<T> {
    next_id: u64,
    /// Keyed by `(due, token)` so iteration is deadline order.
    entries: BTreeMap<(u64, TimerToken), Entry<T>>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: BTreeMap::new(),
        }
    }
}

impl<T: Clone> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, due_ms: u64, period: Option<u64>, task: T) -> TimerToken {
        self.next_id += 1;
        let token = TimerToken(self.next_id);
        self.entries.insert((due_ms, token), Entry { token, period, task });
        token
    }

    pub fn schedule_once(&mut self, now_ms: u64, delay_ms: u64, task: T) -> TimerToken {
        self.insert(now_ms.saturating_add(delay_ms), None, task)
    }

    /// Fire every `period_ms` until cancelled. A zero period is treated as 1.
    pub fn schedule_repeating(&mut self, now_ms: u64, period_ms: u64, task: T) -> TimerToken {
        let period = period_ms.max(1);
        self.insert(now_ms.saturating_add(period), Some(period), task)
    }

    pub fn cancel(&mut self, token: TimerToken) -> bool {
        let key = self
            .entries
            .iter()
            .find(|(_, entry)| entry.token == token)
            .map(|(key, _)| *key);
        match key {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }

    /// Cancel the entry in `slot`, if any, and clear the slot.
    pub fn cancel_slot(&mut self, slot: &mut Option<TimerToken>) {
        if let Some(token) = slot.take() {
            self.cancel(token);
        }
    }

    pub fn is_pending(&self, token: TimerToken) -> bool {
        self.entries.values().any(|entry| entry.token == token)
    }

    /// Cancel-and-reschedule: only the last call in a burst fires.
    pub fn debounce(
        &mut self,
        slot: &mut Option<TimerToken>,
        now_ms: u64,
        delay_ms: u64,
        task: T,
    ) -> TimerToken {
        self.cancel_slot(slot);
        let token = self.schedule_once(now_ms, delay_ms, task);
        *slot = Some(token);
        token
    }

    /// Schedule `task` unless the entry in `slot` is still pending, in
    /// which case the call is dropped and `false` returned.
    pub fn throttle(
        &mut self,
        slot: &mut Option<TimerToken>,
        now_ms: u64,
        delay_ms: u64,
        task: T,
    ) -> bool {
        if matches!(slot, Some(token) if self.is_pending(*token)) {
            return false;
        }
        *slot = Some(self.schedule_once(now_ms, delay_ms, task));
        true
    }

    /// Remove and return the earliest entry due at or before `now_ms`.
    /// Repeating entries are re-armed one period after their deadline.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<Fired<T>> {
        let key = *self.entries.keys().next()?;
        if key.0 > now_ms {
            return None;
        }
        let entry = self.entries.remove(&key)?;
        let (due_ms, token) = key;
        if let Some(period) = entry.period {
            self.entries.insert(
                (due_ms.saturating_add(period), token),
                Entry {
                    token,
                    period: entry.period,
                    task: entry.task.clone(),
                },
            );
        }
        Some(Fired {
            token,
            due_ms,
            task: entry.task,
        })
    }

    pub fn next_due(&self) -> Option<u64> {
        self.entries.keys().next().map(|(due, _)| *due)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
