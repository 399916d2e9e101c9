// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Protocol timer management.
//!
//! One task keeps a priority queue of pending timers (connect retry, SA
//! sweep, readvertisement, source poll) and turns expiries into
//! `ProtocolEvent::TimerExpired` on the engine channel.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::logging::{Facility, Logger};
use crate::protocols::{ProtocolEvent, TimerRequest, TimerType};

/// Longest sleep when nothing is pending
const IDLE_SLEEP: Duration = Duration::from_secs(3600);

pub struct ProtocolTimerManager {
    timers: BinaryHeap<Reverse<ScheduledTimer>>,
    timer_rx: mpsc::Receiver<TimerRequest>,
    event_tx: mpsc::Sender<ProtocolEvent>,
    logger: Logger,
}

#[derive(Debug, Clone)]
struct ScheduledTimer {
    fire_at: Instant,
    timer_type: TimerType,
}

impl PartialEq for ScheduledTimer {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.timer_type == other.timer_type
    }
}

impl Eq for ScheduledTimer {}

impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at.cmp(&other.fire_at)
    }
}

impl ProtocolTimerManager {
    pub fn new(
        timer_rx: mpsc::Receiver<TimerRequest>,
        event_tx: mpsc::Sender<ProtocolEvent>,
        logger: Logger,
    ) -> Self {
        Self {
            timers: BinaryHeap::new(),
            timer_rx,
            event_tx,
            logger,
        }
    }

    fn schedule(&mut self, request: TimerRequest) {
        if request.replace_existing {
            self.timers.retain(|t| t.0.timer_type != request.timer_type);
        }
        self.timers.push(Reverse(ScheduledTimer {
            fire_at: request.fire_at,
            timer_type: request.timer_type,
        }));
    }

    fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Remove and return every timer due at `now`, earliest first
    fn pop_expired(&mut self, now: Instant) -> Vec<TimerType> {
        let mut expired = Vec::new();
        while self.timers.peek().is_some_and(|t| t.0.fire_at <= now) {
            if let Some(Reverse(timer)) = self.timers.pop() {
                expired.push(timer.timer_type);
            }
        }
        expired
    }

    fn next_sleep(&self, now: Instant) -> Duration {
        match self.timers.peek() {
            Some(Reverse(next)) => next.fire_at.saturating_duration_since(now),
            None => IDLE_SLEEP,
        }
    }

    pub async fn run(mut self) {
        log_info!(self.logger, Facility::Timers, "Protocol timer manager started");

        loop {
            let sleep_duration = self.next_sleep(Instant::now());

            tokio::select! {
                _ = sleep(sleep_duration) => {
                    for timer_type in self.pop_expired(Instant::now()) {
                        log_debug!(self.logger, Facility::Timers, "Timer expired: {:?}", timer_type);
                        if self.event_tx.send(ProtocolEvent::TimerExpired(timer_type)).await.is_err() {
                            log_info!(self.logger, Facility::Timers, "Engine gone, timer manager exiting");
                            return;
                        }
                    }
                }
                request = self.timer_rx.recv() => {
                    match request {
                        Some(req) => {
                            self.schedule(req);
                            log_debug!(self.logger, Facility::Timers, "{} timers pending", self.pending());
                        }
                        None => {
                            log_info!(self.logger, Facility::Timers, "Timer request channel closed, timer manager exiting");
                            return;
                        }
                    }
                }
            }
        }
    }
}
