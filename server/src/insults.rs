//! Insults attached to `badLlama` notices.

use rand::seq::SliceRandom;

const INSULTS: &[&str] = &[
    "You spit like an alpaca.",
    "Your protocol handling has the grace of a llama on ice.",
    "Even a baby cria could frame JSON better than that.",
    "Go chew some cud and read the docs.",
    "Your messages are as woolly as your thinking.",
    "That payload smells worse than a llama barn.",
    "Were you raised in the Andes without an RFC?",
    "I've met fence posts with better handshakes.",
    "Drama llama detected, connection terminated.",
    "Nice try, fuzzball.",
];

const FALLBACK: &str = "You absolute llama.";

/// Picks one insult uniformly at random.
pub fn random_insult() -> &'static str {
    INSULTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FALLBACK)
}
