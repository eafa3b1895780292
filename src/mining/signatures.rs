//! ML framework usage signatures.
//!
//! A line counts as framework usage when its ASCII-lowercased bytes contain
//! any signature. Signatures are plain lowercase ASCII substrings.

use memchr::memmem::Finder;

/// Built-in signatures: scikit-learn, Keras, Gym, PyQLearning, TensorFlow,
/// PyTorch, RL Coach, Tensorforce, Stable Baselines, and the `tf.` alias.
pub const DEFAULT_SIGNATURES: &[&str] = &[
    "sklearn",
    "keras",
    "gym.",
    "pyqlearning",
    "tensorflow",
    "torch",
    "rl_coach",
    "tensorforce",
    "stable_baselines",
    "tf.",
];

/// Compiled substring finders for a signature list.
#[derive(Debug, Clone)]
pub struct SignatureSet {
    finders: Vec<Finder<'static>>,
}

impl SignatureSet {
    /// Compile `signatures`. Empty signatures are skipped.
    pub fn new<'a>(signatures: impl IntoIterator<Item = &'a str>) -> Self {
        let finders = signatures
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(|s| Finder::new(s.to_ascii_lowercase().as_bytes()).into_owned())
            .collect();
        Self { finders }
    }

    /// The built-in set.
    pub fn defaults() -> Self {
        Self::new(DEFAULT_SIGNATURES.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.finders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.finders.is_empty()
    }

    /// Whether an already-lowercased line contains any signature.
    pub fn matches(&self, lowered_line: &[u8]) -> bool {
        self.finders
            .iter()
            .any(|f| f.find(lowered_line).is_some())
    }
}

impl Default for SignatureSet {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_framework_imports() {
        let set = SignatureSet::defaults();
        assert!(set.matches(b"from sklearn.svm import svc"));
        assert!(set.matches(b"import torch.nn as nn"));
        assert!(set.matches(b"env = gym.make('cartpole-v1')"));
        assert!(!set.matches(b"import numpy as np"));
        assert!(!set.matches(b"print('hello')"));
    }

    #[test]
    fn gym_needs_the_dot() {
        let set = SignatureSet::defaults();
        assert!(!set.matches(b"gymnasium = 1"));
    }

    #[test]
    fn tf_alias_needs_the_dot() {
        let set = SignatureSet::defaults();
        assert!(set.matches(b"x = tf.constant(1)"));
        assert!(!set.matches(b"# -*- coding: utf-8 -*-"));
        assert!(!set.matches(b"with open(outfile) as f:"));
        assert!(!set.matches(b"path = getfile(obj)"));
    }

    #[test]
    fn custom_signatures_are_lowercased() {
        let set = SignatureSet::new(["JAX", ""]);
        assert_eq!(set.len(), 1);
        assert!(set.matches(b"import jax.numpy as jnp"));
    }
}
