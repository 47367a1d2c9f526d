//! Identity tracking over embedding vectors.
//!
//! Keeps a session-local memory of people seen so far. Each incoming
//! embedding is matched against known identities by cosine similarity;
//! matches fold into a running average, and an identity is reported to the
//! caller only after enough independent sightings.

use crate::config::TrackerConfig;
use crate::embed::Embedding;

/// An identity the tracker has seen often enough to trust.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedSighting {
    /// Stable index of the identity within this tracker.
    pub identity: usize,
    /// Running-average embedding for the identity.
    pub embedding: Embedding,
    /// Position tag recorded when the identity was first seen.
    pub position: String,
}

#[derive(Debug, Clone)]
struct TrackedIdentity {
    embedding: Embedding,
    position: String,
    sightings: usize,
}

#[derive(Debug, Clone)]
pub struct IdentityTracker {
    people: Vec<TrackedIdentity>,
    similarity_threshold: f32,
    confirm_sightings: usize,
}

impl IdentityTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            people: Vec::new(),
            similarity_threshold: config.similarity_threshold,
            confirm_sightings: config.confirm_sightings,
        }
    }

    /// Number of distinct identities seen so far, confirmed or not.
    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    /// Fold one observed embedding into the tracker.
    ///
    /// Returns the identity once its sighting count reaches the
    /// confirmation threshold; earlier sightings and brand-new identities
    /// return `None`.
    pub fn update(&mut self, embedding: Embedding, position: &str) -> Option<ConfirmedSighting> {
        let matched = self.people.iter().position(|person| {
            cosine_similarity(&person.embedding, &embedding)
                .map_or(false, |sim| sim > self.similarity_threshold)
        });

        match matched {
            Some(idx) => {
                let person = &mut self.people[idx];
                // Dimensions already matched during the similarity test
                if let Some(merged) = average_embeddings(&person.embedding, &embedding) {
                    person.embedding = merged;
                }
                person.sightings += 1;
                tracing::debug!(
                    identity = idx,
                    sightings = person.sightings,
                    "matched known identity"
                );

                if person.sightings >= self.confirm_sightings {
                    Some(ConfirmedSighting {
                        identity: idx,
                        embedding: person.embedding.clone(),
                        position: person.position.clone(),
                    })
                } else {
                    None
                }
            }
            None => {
                tracing::debug!(total = self.people.len() + 1, "tracking new identity");
                self.people.push(TrackedIdentity {
                    embedding,
                    position: position.to_string(),
                    sightings: 1,
                });
                None
            }
        }
    }
}

/// Cosine similarity between two embeddings.
///
/// `None` when the dimensions differ. Two empty or two zero vectors are
/// treated as perfectly similar; a single zero vector as dissimilar.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    if a.is_empty() {
        return Some(1.0);
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_sq_a: f32 = a.iter().map(|x| x * x).sum();
    let norm_sq_b: f32 = b.iter().map(|x| x * x).sum();

    if norm_sq_a == 0.0 && norm_sq_b == 0.0 {
        return Some(1.0);
    }
    if norm_sq_a == 0.0 || norm_sq_b == 0.0 {
        return Some(0.0);
    }

    Some(dot / (norm_sq_a.sqrt() * norm_sq_b.sqrt()))
}

/// Element-wise average of two embeddings of the same dimension.
pub fn average_embeddings(a: &[f32], b: &[f32]) -> Option<Embedding> {
    if a.len() != b.len() {
        return None;
    }
    Some(
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x + y) / 2.0)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> IdentityTracker {
        IdentityTracker::new(&TrackerConfig::default())
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c).unwrap() - 0.0).abs() < 0.001);

        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[], &[]), Some(1.0));
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), Some(0.0));
    }

    #[test]
    fn test_average_embeddings() {
        let avg = average_embeddings(&[1.0, 3.0], &[3.0, 5.0]).unwrap();
        assert_eq!(avg, vec![2.0, 4.0]);
        assert_eq!(average_embeddings(&[1.0], &[1.0, 2.0]), None);
    }

    #[test]
    fn test_identity_confirmed_after_three_sightings() {
        let mut tracker = tracker();
        let embedding = vec![0.6, 0.8, 0.0];

        assert!(tracker.update(embedding.clone(), "entrance").is_none());
        assert!(tracker.update(embedding.clone(), "hall").is_none());

        let confirmed = tracker.update(embedding.clone(), "exit").unwrap();
        assert_eq!(confirmed.identity, 0);
        // The position tag from the first sighting sticks
        assert_eq!(confirmed.position, "entrance");
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_dissimilar_embeddings_open_new_identities() {
        let mut tracker = tracker();
        assert!(tracker.update(vec![1.0, 0.0, 0.0], "a").is_none());
        assert!(tracker.update(vec![0.0, 1.0, 0.0], "b").is_none());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_matching_folds_into_running_average() {
        let mut tracker = tracker();
        tracker.update(vec![1.0, 0.0], "a");
        // Similar but not identical; cosine stays above 0.9
        tracker.update(vec![0.98, 0.02], "a");
        assert_eq!(tracker.len(), 1);

        let confirmed = tracker.update(vec![0.99, 0.01], "a").unwrap();
        assert!(confirmed.embedding[0] < 1.0);
        assert!(confirmed.embedding[1] > 0.0);
    }

    #[test]
    fn test_dimension_mismatch_becomes_new_identity() {
        let mut tracker = tracker();
        tracker.update(vec![1.0, 0.0, 0.0], "a");
        tracker.update(vec![1.0, 0.0], "b");
        assert_eq!(tracker.len(), 2);
    }
}
