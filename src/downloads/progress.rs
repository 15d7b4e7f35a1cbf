//! Download progress snapshots

use crate::local_db::schema;
use serde::Serialize;

/// Phases of a full offline download, run in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPhase {
    /// Bundled companion answers
    Responses,
    Stories,
    /// Music metadata
    Music,
    Exercises,
}

impl DownloadPhase {
    pub const ALL: [DownloadPhase; 4] = [
        DownloadPhase::Responses,
        DownloadPhase::Stories,
        DownloadPhase::Music,
        DownloadPhase::Exercises,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DownloadPhase::Responses => "Companion responses",
            DownloadPhase::Stories => "Stories",
            DownloadPhase::Music => "Music library",
            DownloadPhase::Exercises => "Exercises",
        }
    }

    /// Remote entity fetched by the phase, `None` for bundled content
    pub fn entity(self) -> Option<&'static str> {
        match self {
            DownloadPhase::Responses => None,
            DownloadPhase::Stories => Some("Story"),
            DownloadPhase::Music => Some("Music"),
            DownloadPhase::Exercises => Some("Exercise"),
        }
    }

    pub fn collection(self) -> &'static str {
        match self {
            DownloadPhase::Responses => schema::AI_RESPONSES,
            DownloadPhase::Stories => schema::STORIES,
            DownloadPhase::Music => schema::MUSIC,
            DownloadPhase::Exercises => schema::EXERCISES,
        }
    }

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|p| *p == self).unwrap_or(0)
    }
}

/// What a progress subscriber sees
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub phase: Option<DownloadPhase>,
    /// Items completed in the current phase
    pub current: usize,
    /// Items in the current phase
    pub total: usize,
    /// Human-readable label of the item being processed
    pub current_item: String,
    pub finished: bool,
    pub error: Option<String>,
}

impl DownloadProgress {
    /// Nothing started yet
    pub fn idle() -> Self {
        Self {
            phase: None,
            current: 0,
            total: 0,
            current_item: String::new(),
            finished: false,
            error: None,
        }
    }

    pub(crate) fn phase(phase: DownloadPhase, current: usize, total: usize, current_item: impl Into<String>) -> Self {
        Self {
            phase: Some(phase),
            current,
            total,
            current_item: current_item.into(),
            finished: false,
            error: None,
        }
    }

    /// Overall completion in `0.0..=1.0`; never decreases within one run
    pub fn fraction(&self) -> f64 {
        if self.finished {
            return 1.0;
        }
        let Some(phase) = self.phase else {
            return 0.0;
        };
        let within = if self.total == 0 {
            0.0
        } else {
            self.current.min(self.total) as f64 / self.total as f64
        };
        (phase.index() as f64 + within) / DownloadPhase::ALL.len() as f64
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_is_monotonic_across_phases() {
        let end_of_stories = DownloadProgress::phase(DownloadPhase::Stories, 10, 10, "x");
        let start_of_music = DownloadProgress::phase(DownloadPhase::Music, 0, 40, "y");
        assert!(start_of_music.fraction() >= end_of_stories.fraction());
        assert_eq!(DownloadProgress::idle().fraction(), 0.0);
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(DownloadPhase::Responses.index(), 0);
        assert_eq!(DownloadPhase::Exercises.index(), 3);
        assert_eq!(DownloadPhase::Music.collection(), "music");
    }
}
