//! Cross-chunk speaker identity tracker
//!
//! The external diarizer labels speakers per chunk; labels are not stable
//! across chunks. The tracker keeps an arena of prototype embeddings
//! indexed by dense global ids and rebuilds the local-to-global mapping
//! for every chunk, so one person keeps one id for the whole job.
//!
//! Matching is order-sensitive on chunk index, not on task completion
//! order: given identical stage outputs, id minting replays identically.

use crate::diarization::engine::cosine_similarity;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

struct Prototype {
    id: String,
    embedding: Vec<f32>,
}

/// Per-job arena of speaker prototypes. Guarded by its own lock; speaker
/// identities never cross job boundaries.
pub struct SpeakerTracker {
    similarity_threshold: f32,
    smoothing: f32,
    prototypes: Mutex<Vec<Prototype>>,
}

impl SpeakerTracker {
    pub fn new(similarity_threshold: f32, smoothing: f32) -> Self {
        Self {
            similarity_threshold,
            smoothing,
            prototypes: Mutex::new(Vec::new()),
        }
    }

    /// Map one chunk's local labels to global speaker ids.
    ///
    /// For each local label (in sorted order, for deterministic replay)
    /// the average embedding is compared against every prototype:
    ///
    /// - best similarity at or above the threshold, prototype not already
    ///   claimed by another label in this chunk: reuse the id and fold the
    ///   new embedding into the prototype;
    /// - otherwise: mint the next dense id.
    ///
    /// Ties break toward the highest similarity, then the earliest-minted
    /// prototype.
    pub fn assign_chunk(&self, locals: &[(String, Vec<f32>)]) -> HashMap<String, String> {
        let mut sorted: Vec<&(String, Vec<f32>)> = locals.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut prototypes = self.prototypes.lock().unwrap_or_else(|e| e.into_inner());
        let mut claimed: HashSet<usize> = HashSet::new();
        let mut mapping = HashMap::new();

        for (label, embedding) in sorted {
            let mut best: Option<(usize, f32)> = None;
            for (idx, prototype) in prototypes.iter().enumerate() {
                if claimed.contains(&idx) {
                    continue;
                }
                let similarity = cosine_similarity(embedding, &prototype.embedding);
                if similarity >= self.similarity_threshold {
                    // Strictly-greater keeps the earliest prototype on ties.
                    let better = best.map(|(_, s)| similarity > s).unwrap_or(true);
                    if better {
                        best = Some((idx, similarity));
                    }
                }
            }

            let global_id = match best {
                Some((idx, similarity)) => {
                    claimed.insert(idx);
                    let prototype = &mut prototypes[idx];
                    ema_update(&mut prototype.embedding, embedding, self.smoothing);
                    debug!(
                        "Matched local {:?} to {} (similarity {:.3})",
                        label, prototype.id, similarity
                    );
                    prototype.id.clone()
                }
                None => {
                    let id = format!("speaker_{:02}", prototypes.len());
                    debug!("Minting {} for local {:?}", id, label);
                    prototypes.push(Prototype {
                        id: id.clone(),
                        embedding: embedding.clone(),
                    });
                    claimed.insert(prototypes.len() - 1);
                    id
                }
            };

            mapping.insert(label.clone(), global_id);
        }

        mapping
    }

    /// Global ids minted so far, in minting order.
    pub fn speakers(&self) -> Vec<String> {
        let prototypes = self.prototypes.lock().unwrap_or_else(|e| e.into_inner());
        prototypes.iter().map(|p| p.id.clone()).collect()
    }

    pub fn speaker_count(&self) -> usize {
        let prototypes = self.prototypes.lock().unwrap_or_else(|e| e.into_inner());
        prototypes.len()
    }
}

/// Blend a new observation into a prototype, keeping it unit length.
fn ema_update(prototype: &mut [f32], observation: &[f32], alpha: f32) {
    if prototype.len() != observation.len() {
        return;
    }
    for (p, o) in prototype.iter_mut().zip(observation.iter()) {
        *p = (1.0 - alpha) * *p + alpha * o;
    }
    let norm: f32 = prototype.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in prototype.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(direction: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        v[direction] = 1.0;
        v
    }

    #[test]
    fn same_voice_keeps_its_id_across_chunks() {
        let tracker = SpeakerTracker::new(0.7, 0.3);

        let first = tracker.assign_chunk(&[("S0".to_string(), unit(0))]);
        assert_eq!(first["S0"], "speaker_00");

        // Next chunk, different local label, same voice.
        let second = tracker.assign_chunk(&[("S3".to_string(), unit(0))]);
        assert_eq!(second["S3"], "speaker_00");
        assert_eq!(tracker.speaker_count(), 1);
    }

    #[test]
    fn distinct_voices_mint_dense_ids() {
        let tracker = SpeakerTracker::new(0.7, 0.3);
        let mapping = tracker.assign_chunk(&[
            ("S0".to_string(), unit(0)),
            ("S1".to_string(), unit(1)),
        ]);
        assert_eq!(mapping["S0"], "speaker_00");
        assert_eq!(mapping["S1"], "speaker_01");
    }

    #[test]
    fn one_prototype_claimed_once_per_chunk() {
        let tracker = SpeakerTracker::new(0.7, 0.3);
        tracker.assign_chunk(&[("S0".to_string(), unit(0))]);

        // Two local labels both resembling speaker_00: only one may claim
        // it, the other must mint.
        let mapping = tracker.assign_chunk(&[
            ("A".to_string(), unit(0)),
            ("B".to_string(), unit(0)),
        ]);
        let ids: HashSet<&String> = mapping.values().collect();
        assert_eq!(ids.len(), 2);
        assert!(mapping.values().any(|id| id == "speaker_00"));
        assert!(mapping.values().any(|id| id == "speaker_01"));
    }

    #[test]
    fn replay_is_deterministic() {
        let run = || {
            let tracker = SpeakerTracker::new(0.7, 0.3);
            let mut transcript = Vec::new();
            transcript.push(tracker.assign_chunk(&[
                ("S0".to_string(), unit(0)),
                ("S1".to_string(), unit(1)),
            ]));
            transcript.push(tracker.assign_chunk(&[
                ("S0".to_string(), unit(1)),
                ("S1".to_string(), unit(2)),
            ]));
            transcript
        };
        assert_eq!(run(), run());
    }
}
