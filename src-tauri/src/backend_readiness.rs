use crate::backend_errors::BackendStartError;

/// Substrings the backend dev server prints once it is listening.
///
/// Version 1 of the readiness contract: any of these, on either stream, marks the
/// backend ready.
pub(crate) const READINESS_MARKERS: [&str; 3] = [
    "Starting development server",
    "Django version",
    "file changes",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

#[derive(Debug)]
pub(crate) enum BackendEvent {
    Output { stream: OutputStream, text: String },
    Exited(Option<i32>),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadinessReason {
    Marker,
    Timeout,
}

#[derive(Debug)]
pub(crate) enum ReadinessDecision {
    Pending,
    Ready(ReadinessReason),
    Failed(BackendStartError),
    /// The start already resolved; the event changes nothing.
    Settled,
}

pub(crate) fn chunk_signals_ready(text: &str) -> bool {
    READINESS_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Joins the tail of the previous chunk onto the next one so a marker split
/// across two reads still matches.
#[derive(Debug, Default)]
pub(crate) struct MarkerWindow {
    tail: String,
}

impl MarkerWindow {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Text to scan for markers: the carried tail followed by `chunk`.
    pub(crate) fn scan_text(&mut self, chunk: &str) -> String {
        let mut text = std::mem::take(&mut self.tail);
        text.push_str(chunk);
        self.tail = text[tail_start(&text, marker_carry_len())..].to_string();
        text
    }
}

fn marker_carry_len() -> usize {
    READINESS_MARKERS
        .iter()
        .map(|marker| marker.len())
        .max()
        .unwrap_or(0)
        .saturating_sub(1)
}

fn tail_start(text: &str, keep: usize) -> usize {
    let mut start = text.len().saturating_sub(keep);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    start
}

/// Decides how one start attempt resolves. Resolves at most once.
#[derive(Debug, Default)]
pub(crate) struct ReadinessTracker {
    settled: bool,
}

impl ReadinessTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled
    }

    pub(crate) fn on_event(&mut self, event: BackendEvent) -> ReadinessDecision {
        if self.is_settled() {
            return ReadinessDecision::Settled;
        }

        let decision = match event {
            BackendEvent::Output { text, .. } if chunk_signals_ready(&text) => {
                ReadinessDecision::Ready(ReadinessReason::Marker)
            }
            BackendEvent::Output { .. } => ReadinessDecision::Pending,
            BackendEvent::TimedOut => ReadinessDecision::Ready(ReadinessReason::Timeout),
            BackendEvent::Exited(code) => {
                ReadinessDecision::Failed(BackendStartError::ExitedBeforeReady(code))
            }
            BackendEvent::Cancelled => ReadinessDecision::Failed(BackendStartError::Cancelled),
        };

        if !matches!(decision, ReadinessDecision::Pending) {
            self.settled = true;
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(stream: OutputStream, text: &str) -> BackendEvent {
        BackendEvent::Output {
            stream,
            text: text.to_string(),
        }
    }

    #[test]
    fn markers_match_on_either_stream() {
        let mut tracker = ReadinessTracker::new();
        assert!(matches!(
            tracker.on_event(output(OutputStream::Stdout, "Performing system checks...")),
            ReadinessDecision::Pending
        ));
        assert!(matches!(
            tracker.on_event(output(
                OutputStream::Stderr,
                "Watching for file changes with StatReloader"
            )),
            ReadinessDecision::Ready(ReadinessReason::Marker)
        ));
    }

    #[test]
    fn resolves_exactly_once() {
        let mut tracker = ReadinessTracker::new();
        assert!(matches!(
            tracker.on_event(output(OutputStream::Stdout, "Django version 5.0")),
            ReadinessDecision::Ready(ReadinessReason::Marker)
        ));
        assert!(matches!(
            tracker.on_event(output(
                OutputStream::Stdout,
                "Starting development server at http://127.0.0.1:8000/"
            )),
            ReadinessDecision::Settled
        ));
        assert!(matches!(
            tracker.on_event(BackendEvent::Exited(Some(0))),
            ReadinessDecision::Settled
        ));
        assert!(matches!(
            tracker.on_event(BackendEvent::TimedOut),
            ReadinessDecision::Settled
        ));
    }

    #[test]
    fn exit_before_readiness_fails_with_code() {
        let mut tracker = ReadinessTracker::new();
        match tracker.on_event(BackendEvent::Exited(Some(2))) {
            ReadinessDecision::Failed(BackendStartError::ExitedBeforeReady(Some(2))) => {}
            other => panic!("unexpected decision: {other:?}"),
        }
        assert!(tracker.is_settled());
    }

    #[test]
    fn timeout_is_an_optimistic_ready() {
        let mut tracker = ReadinessTracker::new();
        assert!(matches!(
            tracker.on_event(BackendEvent::TimedOut),
            ReadinessDecision::Ready(ReadinessReason::Timeout)
        ));
    }

    #[test]
    fn cancel_rejects_pending_start() {
        let mut tracker = ReadinessTracker::new();
        assert!(matches!(
            tracker.on_event(BackendEvent::Cancelled),
            ReadinessDecision::Failed(BackendStartError::Cancelled)
        ));
    }

    #[test]
    fn marker_split_across_chunks_still_matches() {
        let mut window = MarkerWindow::new();
        let mut tracker = ReadinessTracker::new();

        let first = window.scan_text("May 01, 2025 - Django ver");
        assert!(matches!(
            tracker.on_event(output(OutputStream::Stdout, &first)),
            ReadinessDecision::Pending
        ));
        let second = window.scan_text("sion 5.0.4, using settings");
        assert!(matches!(
            tracker.on_event(output(OutputStream::Stdout, &second)),
            ReadinessDecision::Ready(ReadinessReason::Marker)
        ));
    }

    #[test]
    fn marker_window_carries_only_a_short_tail() {
        let mut window = MarkerWindow::new();
        let long_chunk = "x".repeat(4096);
        assert_eq!(window.scan_text(&long_chunk).len(), 4096);

        let next = window.scan_text("y");
        assert_eq!(next.len(), marker_carry_len() + 1);
        assert!(next.ends_with('y'));
    }

    #[test]
    fn marker_window_keeps_char_boundaries() {
        let mut window = MarkerWindow::new();
        let chunk = "é".repeat(40);
        window.scan_text(&chunk);
        let next = window.scan_text("!");
        assert!(next.ends_with('!'));
        assert!(next.len() <= marker_carry_len() + 1);
    }

    #[test]
    fn chunk_signals_ready_ignores_unrelated_output() {
        assert!(!chunk_signals_ready("Applying migrations"));
        assert!(chunk_signals_ready("May 01, 2025 - Django version 5.0.4, using settings"));
    }
}
