//! Logit adjustments applied before sampling each token

use candle_transformers::generation::{LogitsProcessor, Sampling};
use std::collections::HashSet;

use super::config::GenerationConfig;

/// Divide positive logits and multiply negative ones for every token already seen
pub fn apply_repetition_penalty(logits: &mut [f32], previous: &[u32], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    let seen: HashSet<u32> = previous.iter().copied().collect();
    for token in seen {
        if let Some(logit) = logits.get_mut(token as usize) {
            if *logit > 0.0 {
                *logit /= penalty;
            } else {
                *logit *= penalty;
            }
        }
    }
}

/// Tokens that would complete an n-gram already present in `tokens`
pub fn banned_ngram_tokens(tokens: &[u32], n: usize) -> Vec<u32> {
    if n == 0 || tokens.len() + 1 < n {
        return Vec::new();
    }
    if n == 1 {
        let unique: HashSet<u32> = tokens.iter().copied().collect();
        return unique.into_iter().collect();
    }

    let prefix = &tokens[tokens.len() + 1 - n..];
    let mut banned: Vec<u32> = tokens
        .windows(n)
        .filter(|window| &window[..n - 1] == prefix)
        .map(|window| window[n - 1])
        .collect();
    banned.sort_unstable();
    banned.dedup();
    banned
}

/// Set banned tokens to negative infinity
pub fn ban_tokens(logits: &mut [f32], banned: &[u32]) {
    for &token in banned {
        if let Some(logit) = logits.get_mut(token as usize) {
            *logit = f32::NEG_INFINITY;
        }
    }
}

/// Sampler for a decoding config; greedy when temperature is zero
pub fn logits_processor(config: &GenerationConfig) -> LogitsProcessor {
    let seed = config.seed.unwrap_or(299_792_458);
    let sampling = if config.is_greedy() {
        Sampling::ArgMax
    } else if config.top_p < 1.0 {
        Sampling::TopP {
            p: config.top_p,
            temperature: config.temperature,
        }
    } else {
        Sampling::All {
            temperature: config.temperature,
        }
    };
    LogitsProcessor::from_sampling(seed, sampling)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repetition_penalty() {
        let mut logits = vec![2.0, -2.0, 1.0];
        apply_repetition_penalty(&mut logits, &[0, 1, 1], 2.0);
        assert_eq!(logits, vec![1.0, -4.0, 1.0]);
    }

    #[test]
    fn test_repetition_penalty_ignores_out_of_vocab() {
        let mut logits = vec![1.0];
        apply_repetition_penalty(&mut logits, &[7], 2.0);
        assert_eq!(logits, vec![1.0]);
    }

    #[test]
    fn test_banned_trigram() {
        // "a b c ... a b" -> "c" would repeat the trigram
        let tokens = [1, 2, 3, 9, 1, 2];
        assert_eq!(banned_ngram_tokens(&tokens, 3), vec![3]);
        assert!(banned_ngram_tokens(&tokens, 0).is_empty());
        assert!(banned_ngram_tokens(&[1], 3).is_empty());
    }

    #[test]
    fn test_ban_tokens() {
        let mut logits = vec![0.5, 0.5, 0.5];
        ban_tokens(&mut logits, &[1]);
        assert_eq!(logits[1], f32::NEG_INFINITY);
        assert_eq!(logits[0], 0.5);
    }
}
