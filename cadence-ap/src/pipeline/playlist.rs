//! In-memory playlist order
//!
//! Default [`PlaylistOrder`]: an ordered list of tracks plus a bounded
//! recently-played history.

use crate::pipeline::collab::PlaylistOrder;
use cadence_common::{PlaybackMode, Track, TrackId};
use rand::seq::SliceRandom;
use std::collections::VecDeque;

/// Number of entries kept in the recently-played list
pub const MAX_RECENT: usize = 30;

#[derive(Debug, Clone, Default)]
pub struct Playlist {
    tracks: Vec<Track>,
    recent: VecDeque<TrackId>,
}

impl Playlist {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            recent: VecDeque::new(),
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Recently played ids, most recent first, without duplicates
    pub fn recent(&self) -> impl Iterator<Item = &TrackId> {
        self.recent.iter()
    }

    fn position(&self, id: Option<&TrackId>) -> Option<usize> {
        let id = id?;
        self.tracks.iter().position(|track| &track.id == id)
    }

    /// Random track other than `current` when there is a choice
    fn random_other(&self, current: Option<&TrackId>) -> Option<Track> {
        let candidates: Vec<&Track> = self
            .tracks
            .iter()
            .filter(|track| Some(&track.id) != current)
            .collect();
        match candidates.choose(&mut rand::thread_rng()) {
            Some(track) => Some((*track).clone()),
            None => self.tracks.first().cloned(),
        }
    }
}

impl PlaylistOrder for Playlist {
    fn next(&mut self, current: Option<&TrackId>, mode: PlaybackMode) -> Option<Track> {
        if self.tracks.is_empty() {
            return None;
        }
        let index = self.position(current);
        match mode {
            PlaybackMode::Sequential => {
                let next = index.map_or(0, |i| (i + 1) % self.tracks.len());
                self.tracks.get(next).cloned()
            }
            PlaybackMode::RepeatOne => self.tracks.get(index.unwrap_or(0)).cloned(),
            PlaybackMode::Shuffle => self.random_other(current),
        }
    }

    fn previous(&mut self, current: Option<&TrackId>, mode: PlaybackMode) -> Option<Track> {
        if self.tracks.is_empty() {
            return None;
        }
        let index = self.position(current);
        match mode {
            PlaybackMode::Sequential => {
                let len = self.tracks.len();
                let previous = index.map_or(len - 1, |i| (i + len - 1) % len);
                self.tracks.get(previous).cloned()
            }
            PlaybackMode::RepeatOne => self.tracks.get(index.unwrap_or(0)).cloned(),
            PlaybackMode::Shuffle => {
                // Step back through history when possible
                let from_history = self
                    .recent
                    .iter()
                    .filter(|id| Some(*id) != current)
                    .find_map(|id| self.tracks.iter().find(|track| &track.id == id))
                    .cloned();
                from_history.or_else(|| self.random_other(current))
            }
        }
    }

    fn set_tracks(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
    }

    fn record_played(&mut self, track: &Track) {
        self.recent.retain(|id| id != &track.id);
        self.recent.push_front(track.id.clone());
        self.recent.truncate(MAX_RECENT);
    }

    fn record_duration(&mut self, track_id: &TrackId, seconds: f64) {
        // The same id may be listed more than once
        for track in self.tracks.iter_mut().filter(|track| &track.id == track_id) {
            track.set_duration_secs(seconds);
        }
    }
}
