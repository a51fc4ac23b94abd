//! Typing indicator state
//!
//! Local side: a single debounce deadline. The first keystroke of a burst
//! emits "typing", every keystroke pushes the deadline out, and the deadline
//! passing emits "stop typing" exactly once.
//!
//! Remote side: one indicator per sender, refreshed on every "typing" signal
//! and expired after a silence timeout in case "stop typing" never arrives.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::UserId;

/// What a keystroke requires from the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keystroke {
    /// First keystroke of a burst; emit "typing"
    Started,
    /// Burst already announced; deadline extended
    Extended,
}

#[derive(Debug)]
pub struct TypingState {
    debounce: Duration,
    silence_timeout: Duration,
    /// Deadline of the outstanding local "stop typing"
    local_deadline: Option<Instant>,
    /// Remote senders currently shown as typing, with last refresh time
    remote: HashMap<UserId, Instant>,
}

impl TypingState {
    pub fn new(debounce: Duration, silence_timeout: Duration) -> Self {
        Self {
            debounce,
            silence_timeout,
            local_deadline: None,
            remote: HashMap::new(),
        }
    }

    /// Record a local keystroke at `now`
    pub fn keystroke(&mut self, now: Instant) -> Keystroke {
        let started = self.local_deadline.is_none();
        self.local_deadline = Some(now + self.debounce);
        if started {
            Keystroke::Started
        } else {
            Keystroke::Extended
        }
    }

    /// Cancel the local timer
    ///
    /// Returns true if a burst was in progress (caller may emit "stop typing").
    pub fn cancel_local(&mut self) -> bool {
        self.local_deadline.take().is_some()
    }

    /// Fire the local timer if its deadline has passed
    pub fn expire_local(&mut self, now: Instant) -> bool {
        match self.local_deadline {
            Some(deadline) if deadline <= now => {
                self.local_deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Remote "typing" from `user`; true if the indicator was newly shown
    pub fn remote_started(&mut self, user: UserId, now: Instant) -> bool {
        self.remote.insert(user, now).is_none()
    }

    /// Remote "stop typing" (or a message) from `user`; true if an indicator was removed
    pub fn remote_stopped(&mut self, user: UserId) -> bool {
        self.remote.remove(&user).is_some()
    }

    /// Drop remote indicators not refreshed within the silence timeout
    pub fn expire_remote(&mut self, now: Instant) -> Vec<UserId> {
        let timeout = self.silence_timeout;
        let mut expired: Vec<UserId> = self
            .remote
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) >= timeout)
            .map(|(user, _)| *user)
            .collect();
        expired.sort();

        for user in &expired {
            self.remote.remove(user);
        }
        expired
    }

    /// Remove every remote indicator, returning who was shown
    pub fn clear_remote(&mut self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.remote.drain().map(|(user, _)| user).collect();
        users.sort();
        users
    }

    /// Earliest instant at which a timer needs servicing
    pub fn next_deadline(&self) -> Option<Instant> {
        let remote = self.remote.values().map(|seen| *seen + self.silence_timeout).min();
        match (self.local_deadline, remote) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> TypingState {
        TypingState::new(Duration::from_millis(1000), Duration::from_secs(5))
    }

    #[test]
    fn test_burst_announced_once() {
        let mut typing = state();
        let t0 = Instant::now();

        assert_eq!(typing.keystroke(t0), Keystroke::Started);
        assert_eq!(typing.keystroke(t0 + Duration::from_millis(300)), Keystroke::Extended);
        assert_eq!(typing.keystroke(t0 + Duration::from_millis(600)), Keystroke::Extended);
        assert_eq!(typing.next_deadline(), Some(t0 + Duration::from_millis(1600)));
    }

    #[test]
    fn test_each_keystroke_restarts_deadline() {
        let mut typing = state();
        let t0 = Instant::now();

        typing.keystroke(t0);
        typing.keystroke(t0 + Duration::from_millis(800));

        // Original deadline passed, restarted one has not
        assert!(!typing.expire_local(t0 + Duration::from_millis(1200)));
        assert!(typing.expire_local(t0 + Duration::from_millis(1800)));
        assert!(!typing.expire_local(t0 + Duration::from_millis(5000)));
    }

    #[test]
    fn test_cancel_local() {
        let mut typing = state();
        assert!(!typing.cancel_local());

        typing.keystroke(Instant::now());
        assert!(typing.cancel_local());
        assert!(typing.next_deadline().is_none());
    }

    #[test]
    fn test_remote_indicator_lifecycle() {
        let mut typing = state();
        let t0 = Instant::now();

        assert!(typing.remote_started(UserId(7), t0));
        assert!(!typing.remote_started(UserId(7), t0 + Duration::from_secs(1)));
        assert_eq!(typing.next_deadline(), Some(t0 + Duration::from_secs(6)));

        assert!(typing.remote_stopped(UserId(7)));
        assert!(!typing.remote_stopped(UserId(7)));
    }

    #[test]
    fn test_remote_silence_expiry() {
        let mut typing = state();
        let t0 = Instant::now();

        typing.remote_started(UserId(7), t0);
        typing.remote_started(UserId(8), t0 + Duration::from_secs(3));

        assert!(typing.expire_remote(t0 + Duration::from_secs(4)).is_empty());
        assert_eq!(typing.expire_remote(t0 + Duration::from_secs(5)), vec![UserId(7)]);
        assert_eq!(typing.clear_remote(), vec![UserId(8)]);
    }

    #[test]
    fn test_next_deadline_is_earliest() {
        let mut typing = state();
        let t0 = Instant::now();
        assert!(typing.next_deadline().is_none());

        typing.remote_started(UserId(7), t0);
        assert_eq!(typing.next_deadline(), Some(t0 + Duration::from_secs(5)));

        typing.keystroke(t0);
        assert_eq!(typing.next_deadline(), Some(t0 + Duration::from_millis(1000)));
    }
}
