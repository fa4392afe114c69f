use crate::core::{Result, Tensor, TensorOps, TokenId};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

/// Floor applied to the temperature before dividing the logits.
pub const MIN_TEMPERATURE: f32 = 1e-8;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub token: String,
    pub token_id: TokenId,
    pub probability: f32,
}

/// Outcome of one sampling step.
#[derive(Debug, Clone)]
pub struct Generation {
    pub next_token: String,
    pub next_token_id: TokenId,
    pub candidates: Vec<Candidate>,
    pub token_ids: Vec<TokenId>,
}

impl Generation {
    /// Probability mass covered by the displayed candidates.
    pub fn candidate_mass(&self) -> f32 {
        self.candidates.iter().map(|c| c.probability).sum()
    }
}

/// Softmax over the full vocabulary of `logits / max(temperature, 1e-8)`.
pub fn distribution(logits: &[f32], temperature: f32) -> Result<Tensor> {
    if logits.is_empty() {
        anyhow::bail!("model returned no logits");
    }
    let temperature = temperature.max(MIN_TEMPERATURE);
    Tensor::vector(logits.to_vec())
        .scale(1.0 / temperature)
        .softmax(0)
}

/// The `k` most probable ids, `k` clamped to `[1, vocab]`.
pub fn top_candidates(probs: &Tensor, k: i64) -> Result<Vec<(TokenId, f32)>> {
    let vocab = probs.numel();
    let k = k.clamp(1, vocab.max(1) as i64) as usize;
    Ok(probs
        .top_k(k)?
        .into_iter()
        .map(|(i, p)| (TokenId(i as u32), p))
        .collect())
}

/// Weighted draw over the whole distribution, not just the candidates.
pub fn draw<R: Rng + ?Sized>(probs: &Tensor, rng: &mut R) -> Result<TokenId> {
    let index = WeightedIndex::new(probs.data())?;
    Ok(TokenId(index.sample(rng) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_distribution_sums_to_one() {
        let probs = distribution(&[1.0, 2.0, 3.0, 0.5], 1.0).unwrap();
        assert!((probs.sum() - 1.0).abs() < 1e-5);
        assert_eq!(probs.argmax(), Some(2));
    }

    #[test]
    fn test_temperature_sharpens() {
        let logits = [1.0, 2.0];
        let warm = distribution(&logits, 2.0).unwrap();
        let cold = distribution(&logits, 0.5).unwrap();
        assert!(cold.data()[1] > warm.data()[1]);
    }

    #[test]
    fn test_zero_temperature_is_near_greedy() {
        for temperature in [0.0, -1.0] {
            let probs = distribution(&[0.1, 0.3, 0.2], temperature).unwrap();
            assert!(probs.data()[1] > 0.999);
        }
    }

    #[test]
    fn test_top_candidates_clamp_k() {
        let probs = distribution(&[0.0, 1.0, 2.0], 1.0).unwrap();
        let top = top_candidates(&probs, 0).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].0, TokenId(2));
        assert_eq!(top_candidates(&probs, 100).unwrap().len(), 3);
    }

    #[test]
    fn test_uniform_ties_go_to_lower_ids() {
        let probs = distribution(&[0.0; 5], 1.0).unwrap();
        let ids: Vec<u32> = top_candidates(&probs, 3).unwrap().iter().map(|(t, _)| t.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_draw_is_seed_reproducible() {
        let probs = distribution(&[0.1, 0.2, 0.3, 0.4, 0.5], 1.0).unwrap();
        let a: Vec<TokenId> = {
            let mut rng = StdRng::seed_from_u64(7);
            (0..20).map(|_| draw(&probs, &mut rng).unwrap()).collect()
        };
        let b: Vec<TokenId> = {
            let mut rng = StdRng::seed_from_u64(7);
            (0..20).map(|_| draw(&probs, &mut rng).unwrap()).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_draw_reaches_outside_top_k() {
        // Two nearly equal tokens; with k = 1 only one is displayed but both
        // get drawn.
        let probs = distribution(&[1.0, 1.0001], 1.0).unwrap();
        let top = top_candidates(&probs, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let drawn: Vec<TokenId> = (0..200).map(|_| draw(&probs, &mut rng).unwrap()).collect();
        assert!(drawn.iter().any(|t| *t != top[0].0));
    }

    #[test]
    fn test_candidate_mass() {
        let generation = Generation {
            next_token: "a".into(),
            next_token_id: TokenId(0),
            candidates: vec![
                Candidate { token: "a".into(), token_id: TokenId(0), probability: 0.5 },
                Candidate { token: "b".into(), token_id: TokenId(1), probability: 0.25 },
            ],
            token_ids: vec![TokenId(3)],
        };
        assert!((generation.candidate_mass() - 0.75).abs() < 1e-6);
    }
}
