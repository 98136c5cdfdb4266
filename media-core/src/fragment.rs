//! Fragment window: sliding retention over on-disk segment artifacts shared
//! by the HLS, DASH and DVR packagers (spec §4.6).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::warn;

/// A single published artifact (an HLS `.ts`/`.m4s`, a DASH `.m4s`, or a DVR
/// segment file) tracked for retention and eventual cleanup.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub sequence_number: u64,
    pub path: PathBuf,
    pub start_dts: i64,
    pub duration_ms: i64,
    pub is_keyframe_aligned: bool,
    pub byte_size: u64,
    disposed_at: Option<SystemTime>,
}

impl Fragment {
    pub fn new(sequence_number: u64, path: PathBuf, start_dts: i64, duration_ms: i64, is_keyframe_aligned: bool, byte_size: u64) -> Self {
        Self {
            sequence_number,
            path,
            start_dts,
            duration_ms,
            is_keyframe_aligned,
            byte_size,
            disposed_at: None,
        }
    }
}

/// Ordered-by-sequence-number retention window. A fragment slides out of
/// the live window once either the count or cumulative duration bound is
/// exceeded, is marked disposed, and is unlinked from disk only after
/// `disposal_timeout` elapses — giving any reader that already resolved
/// the playlist URL a grace period to finish the request (spec §9 Open
/// Question, resolved: two-stage dispose/unlink).
pub struct FragmentWindow {
    fragments: VecDeque<Fragment>,
    disposed: VecDeque<Fragment>,
    max_count: usize,
    max_duration_ms: i64,
    disposal_timeout: Duration,
    unlink_on_slide_out: bool,
}

impl FragmentWindow {
    pub fn new(max_count: usize, max_duration_ms: i64, disposal_timeout: Duration, unlink_on_slide_out: bool) -> Self {
        Self {
            fragments: VecDeque::new(),
            disposed: VecDeque::new(),
            max_count,
            max_duration_ms,
            disposal_timeout,
            unlink_on_slide_out,
        }
    }

    /// Append a newly written fragment and slide out anything past the
    /// retention bound, moving it to the disposal queue.
    pub fn push(&mut self, fragment: Fragment) {
        self.fragments.push_back(fragment);
        self.enforce_bounds();
    }

    fn enforce_bounds(&mut self) {
        while self.fragments.len() > self.max_count.max(1) {
            if let Some(f) = self.fragments.pop_front() {
                self.dispose(f);
            }
        }
        if self.max_duration_ms > 0 {
            loop {
                let total: i64 = self.fragments.iter().map(|f| f.duration_ms).sum();
                if total <= self.max_duration_ms || self.fragments.len() <= 1 {
                    break;
                }
                if let Some(f) = self.fragments.pop_front() {
                    self.dispose(f);
                }
            }
        }
    }

    fn dispose(&mut self, mut fragment: Fragment) {
        if !self.unlink_on_slide_out {
            return;
        }
        fragment.disposed_at = Some(SystemTime::now());
        self.disposed.push_back(fragment);
    }

    /// Current live window, oldest first — what the HLS/DASH playlist
    /// writers read to build the manifest.
    pub fn live(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Unlink every disposed fragment whose grace period has elapsed.
    /// Intended to be driven from the Fast Timer alongside segment
    /// generation (spec §4.9).
    pub fn reap(&mut self) -> usize {
        let now = SystemTime::now();
        let mut reaped = 0;
        while let Some(front) = self.disposed.front() {
            let Some(disposed_at) = front.disposed_at else { break };
            let elapsed = now.duration_since(disposed_at).unwrap_or_default();
            if elapsed < self.disposal_timeout {
                break;
            }
            let fragment = self.disposed.pop_front().unwrap();
            if let Err(err) = unlink(&fragment.path) {
                warn!(path = %fragment.path.display(), error = %err, "failed to unlink expired fragment");
            }
            reaped += 1;
        }
        reaped
    }

    pub fn pending_disposal(&self) -> usize {
        self.disposed.len()
    }
}

fn unlink(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(seq: u64, dur_ms: i64) -> Fragment {
        Fragment::new(seq, PathBuf::from(format!("/tmp/does-not-exist-{seq}.ts")), seq as i64 * dur_ms, dur_ms, true, 1024)
    }

    #[test]
    fn slides_out_by_count() {
        let mut window = FragmentWindow::new(3, 0, Duration::from_secs(30), true);
        for seq in 0..5 {
            window.push(fragment(seq, 1000));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.pending_disposal(), 2);
    }

    #[test]
    fn slides_out_by_duration() {
        let mut window = FragmentWindow::new(100, 3_000, Duration::from_secs(30), true);
        for seq in 0..5 {
            window.push(fragment(seq, 1000));
        }
        let total: i64 = window.live().map(|f| f.duration_ms).sum();
        assert!(total <= 3_000);
    }

    #[test]
    fn reap_unlinks_only_after_timeout() {
        let mut window = FragmentWindow::new(1, 0, Duration::from_secs(0), true);
        window.push(fragment(0, 1000));
        window.push(fragment(1, 1000));
        assert_eq!(window.pending_disposal(), 1);
        assert_eq!(window.reap(), 1);
        assert_eq!(window.pending_disposal(), 0);
    }

    #[test]
    fn disabled_unlink_on_slide_out_keeps_no_disposal_queue() {
        let mut window = FragmentWindow::new(1, 0, Duration::from_secs(30), false);
        window.push(fragment(0, 1000));
        window.push(fragment(1, 1000));
        assert_eq!(window.pending_disposal(), 0);
    }
}
