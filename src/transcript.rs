//! Working transcript state and reconciliation.
//!
//! The reconciler is the single owner of the transcript shown during a live
//! session. Final streaming events append committed items; interim events
//! replace a single tentative item; the batch diarization result, when it
//! arrives, replaces the whole transcript atomically. There is never more
//! than one interim item, and interim text never becomes a committed item.

use serde::Serialize;

/// One committed, speaker-attributed line of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptItem {
    pub speaker: String,
    pub text: String,
}

impl TranscriptItem {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }
}

/// Which pipeline produced the transcript handed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptSource {
    /// Live streaming results only — the designed degraded mode when
    /// diarization is skipped or fails.
    #[default]
    Streaming,
    /// Authoritative batch diarization result.
    Diarized,
}

/// Immutable snapshot of the working transcript for the live view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptView {
    pub items: Vec<TranscriptItem>,
    pub interim: Option<TranscriptItem>,
    pub source: TranscriptSource,
}

#[derive(Debug, Default)]
pub struct TranscriptReconciler {
    items: Vec<TranscriptItem>,
    interim: Option<TranscriptItem>,
    source: TranscriptSource,
}

impl TranscriptReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a final item and discard the interim it supersedes.
    pub fn append_final(&mut self, item: TranscriptItem) {
        self.items.push(item);
        self.interim = None;
    }

    /// Replace the tentative item wholesale.
    pub fn set_interim(&mut self, item: TranscriptItem) {
        self.interim = Some(item);
    }

    /// Drop the tentative item, e.g. when the connection closes.
    pub fn clear_interim(&mut self) {
        self.interim = None;
    }

    /// Atomic hand-off from the batch pipeline: every prior item is
    /// discarded. Only called after the streaming connection is closed, so
    /// it cannot interleave with appends.
    pub fn replace_all(&mut self, items: Vec<TranscriptItem>) {
        self.items = items;
        self.interim = None;
        self.source = TranscriptSource::Diarized;
    }

    pub fn items(&self) -> &[TranscriptItem] {
        &self.items
    }

    pub fn interim(&self) -> Option<&TranscriptItem> {
        self.interim.as_ref()
    }

    pub fn source(&self) -> TranscriptSource {
        self.source
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn snapshot(&self) -> TranscriptView {
        TranscriptView {
            items: self.items.clone(),
            interim: self.interim.clone(),
            source: self.source,
        }
    }

    /// The hand-off contract: one `"<role>: <text>"` line per committed item.
    pub fn handoff_lines(&self) -> Vec<String> {
        self.items
            .iter()
            .map(|item| format!("{}: {}", item.speaker, item.text))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interim_then_final_commits_only_the_final() {
        let mut rec = TranscriptReconciler::new();
        rec.set_interim(TranscriptItem::new("A", "Hel"));
        rec.append_final(TranscriptItem::new("A", "Hello"));

        assert_eq!(rec.items(), &[TranscriptItem::new("A", "Hello")]);
        assert!(rec.interim().is_none());
    }

    #[test]
    fn interim_is_replaced_wholesale() {
        let mut rec = TranscriptReconciler::new();
        rec.set_interim(TranscriptItem::new("A", "Hel"));
        rec.set_interim(TranscriptItem::new("B", "Help me"));

        assert_eq!(rec.interim(), Some(&TranscriptItem::new("B", "Help me")));
        assert!(rec.items().is_empty());
    }

    #[test]
    fn finals_commit_in_arrival_order() {
        let mut rec = TranscriptReconciler::new();
        rec.append_final(TranscriptItem::new("A", "one"));
        rec.set_interim(TranscriptItem::new("B", "tw"));
        rec.append_final(TranscriptItem::new("B", "two"));

        assert_eq!(
            rec.handoff_lines(),
            vec!["A: one".to_string(), "B: two".to_string()]
        );
    }

    #[test]
    fn replace_all_discards_prior_items_and_interim() {
        let mut rec = TranscriptReconciler::new();
        rec.append_final(TranscriptItem::new("A", "live one"));
        rec.append_final(TranscriptItem::new("A", "live two"));
        rec.set_interim(TranscriptItem::new("A", "live thr"));

        rec.replace_all(vec![
            TranscriptItem::new("Speaker 1", "Hi"),
            TranscriptItem::new("Speaker 2", "Bye"),
        ]);

        assert_eq!(rec.items().len(), 2);
        assert_eq!(rec.items()[0].text, "Hi");
        assert!(rec.interim().is_none());
        assert_eq!(rec.source(), TranscriptSource::Diarized);
    }

    #[test]
    fn source_stays_streaming_without_replace() {
        let mut rec = TranscriptReconciler::new();
        rec.append_final(TranscriptItem::new("A", "kept"));
        assert_eq!(rec.source(), TranscriptSource::Streaming);
    }

    #[test]
    fn clear_interim_keeps_committed_items() {
        let mut rec = TranscriptReconciler::new();
        rec.append_final(TranscriptItem::new("A", "one"));
        rec.append_final(TranscriptItem::new("B", "two"));
        rec.set_interim(TranscriptItem::new("A", "thr"));

        rec.clear_interim();

        assert_eq!(rec.items().len(), 2);
        assert!(rec.interim().is_none());
    }
}
