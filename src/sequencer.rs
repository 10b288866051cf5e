use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// "Latest intent wins" gate for one logical asynchronous operation. Responses are still
/// computed when stale; only their effect is suppressed.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    last_issued: u64,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) -> RequestToken {
        self.last_issued = self.last_issued.saturating_add(1);
        RequestToken(self.last_issued)
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        self.last_issued != 0 && token.0 == self.last_issued
    }

    pub fn accept<T>(&self, token: RequestToken, value: T) -> Option<T> {
        if self.is_current(token) {
            Some(value)
        } else {
            None
        }
    }

    pub fn latest(&self) -> Option<RequestToken> {
        if self.last_issued == 0 {
            None
        } else {
            Some(RequestToken(self.last_issued))
        }
    }
}

/// Trailing-edge debounce: bursts of `push` collapse into one value released by `poll` once
/// the input has been quiet for `delay`.
#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now));
    }

    pub fn poll(&mut self, now: Instant) -> Option<T> {
        let ready = match &self.pending {
            Some((_, last_edit_at)) => now.saturating_duration_since(*last_edit_at) >= self.delay,
            None => false,
        };
        if !ready {
            return None;
        }
        self.pending.take().map(|(value, _)| value)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_latest_token_applies_when_resolved_out_of_order() {
        let mut sequencer = RequestSequencer::new();
        let first = sequencer.begin();
        let second = sequencer.begin();
        let third = sequencer.begin();
        assert_eq!(
            (first.value(), second.value(), third.value()),
            (1, 2, 3)
        );

        let mut applied = Vec::new();
        for (token, effect) in [(third, "three"), (first, "one"), (second, "two")] {
            if let Some(effect) = sequencer.accept(token, effect) {
                applied.push(effect);
            }
        }
        assert_eq!(applied, vec!["three"]);
    }

    #[test]
    fn failed_responses_do_not_move_the_sequence() {
        let mut sequencer = RequestSequencer::new();
        let token = sequencer.begin();
        let response: Result<Vec<String>, String> = Err("timeout".to_string());
        let data = sequencer
            .accept(token, response.unwrap_or_default())
            .unwrap_or_default();
        assert!(data.is_empty());
        assert_eq!(sequencer.latest(), Some(token));
        assert!(sequencer.is_current(token));
    }

    #[test]
    fn fresh_sequencer_has_no_current_token() {
        let sequencer = RequestSequencer::new();
        assert_eq!(sequencer.latest(), None);
    }

    #[test]
    fn debouncer_releases_only_the_trailing_value() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(250));
        debouncer.push("s", start);
        debouncer.push("sk", start + Duration::from_millis(100));
        assert_eq!(debouncer.poll(start + Duration::from_millis(300)), None);
        debouncer.push("sks", start + Duration::from_millis(200));
        debouncer.push("skse", start + Duration::from_millis(320));
        assert_eq!(debouncer.poll(start + Duration::from_millis(500)), None);
        assert_eq!(
            debouncer.poll(start + Duration::from_millis(570)),
            Some("skse")
        );
        assert_eq!(debouncer.poll(start + Duration::from_millis(900)), None);
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn cancel_drops_pending_value() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        debouncer.push(1, start);
        debouncer.cancel();
        assert_eq!(debouncer.poll(start + Duration::from_secs(1)), None);
    }
}
