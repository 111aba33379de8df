use std::time::Duration;
use tokio::time::Instant;

/// Keepalive timer of an established session.
///
/// Sends a ping every `interval` and expects the pong within `timeout`. The pinger does not own
/// a timer, the session polls it with the current time.
#[derive(Debug)]
pub(crate) struct Pinger {
    interval: Duration,
    timeout: Duration,
    state: PingState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PingState {
    /// Not started or stopped.
    Idle,
    /// Next ping is due at the deadline.
    Ready(Instant),
    /// A ping was sent, the pong is due at the deadline.
    WaitingForPong(Instant),
}

/// What the session has to do after polling the [`Pinger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PingerEvent {
    /// Send a ping now.
    Ping,
    /// The pong did not arrive in time.
    Timeout,
}

impl Pinger {
    pub(crate) const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout, state: PingState::Idle }
    }

    /// Schedules the first ping one interval from `now`.
    pub(crate) fn start(&mut self, now: Instant) {
        self.state = PingState::Ready(now + self.interval);
    }

    pub(crate) fn stop(&mut self) {
        self.state = PingState::Idle;
    }

    /// Marks the outstanding ping as answered.
    pub(crate) fn on_pong(&mut self, now: Instant) {
        if let PingState::WaitingForPong(_) = self.state {
            self.state = PingState::Ready(now + self.interval);
        }
    }

    /// The next instant at which [`Self::poll`] can return an event.
    pub(crate) const fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            PingState::Idle => None,
            PingState::Ready(at) | PingState::WaitingForPong(at) => Some(at),
        }
    }

    pub(crate) fn poll(&mut self, now: Instant) -> Option<PingerEvent> {
        match self.state {
            PingState::Ready(at) if now >= at => {
                self.state = PingState::WaitingForPong(now + self.timeout);
                Some(PingerEvent::Ping)
            }
            PingState::WaitingForPong(at) if now >= at => {
                self.state = PingState::Idle;
                Some(PingerEvent::Timeout)
            }
            _ => None,
        }
    }
}
