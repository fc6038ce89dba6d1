//! Trainable-layer selection
//!
//! Freezing is positional: the last `count` layers of a model stay trainable,
//! everything before them is frozen. Layers without parameters still occupy a
//! position.

use burn::{
    nn::{conv::Conv2d, BatchNorm, Linear},
    tensor::backend::Backend,
};

/// Pair every layer with its trainable flag: the last `count` are trainable.
///
/// A `count` at or above the number of layers trains everything, zero freezes
/// everything.
pub fn select_trainable<T, I>(layers: I, count: usize) -> Vec<(T, bool)>
where
    I: IntoIterator<Item = T>,
{
    let layers: Vec<T> = layers.into_iter().collect();
    let frozen = layers.len().saturating_sub(count);

    layers
        .into_iter()
        .enumerate()
        .map(|(index, layer)| (layer, index >= frozen))
        .collect()
}

/// Modules whose parameters can be excluded from gradient updates
pub trait Trainable: Sized {
    /// Set `require_grad` on all parameters
    fn set_trainable(self, trainable: bool) -> Self;
}

impl<B: Backend> Trainable for Conv2d<B> {
    fn set_trainable(mut self, trainable: bool) -> Self {
        self.weight = self.weight.set_require_grad(trainable);
        self.bias = self.bias.map(|bias| bias.set_require_grad(trainable));
        self
    }
}

impl<B: Backend> Trainable for Linear<B> {
    fn set_trainable(mut self, trainable: bool) -> Self {
        self.weight = self.weight.set_require_grad(trainable);
        self.bias = self.bias.map(|bias| bias.set_require_grad(trainable));
        self
    }
}

impl<B: Backend, const D: usize> Trainable for BatchNorm<B, D> {
    fn set_trainable(mut self, trainable: bool) -> Self {
        self.gamma = self.gamma.set_require_grad(trainable);
        self.beta = self.beta.set_require_grad(trainable);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(pairs: &[(char, bool)]) -> Vec<bool> {
        pairs.iter().map(|(_, trainable)| *trainable).collect()
    }

    #[test]
    fn test_last_layers_trainable() {
        let pairs = select_trainable("abcde".chars(), 2);
        assert_eq!(flags(&pairs), [false, false, false, true, true]);
        assert_eq!(pairs[3].0, 'd');
    }

    #[test]
    fn test_zero_freezes_everything() {
        let pairs = select_trainable("abc".chars(), 0);
        assert_eq!(flags(&pairs), [false, false, false]);
    }

    #[test]
    fn test_count_above_length_trains_everything() {
        let pairs = select_trainable("abc".chars(), 3);
        assert_eq!(flags(&pairs), [true, true, true]);

        let pairs = select_trainable("abc".chars(), 100);
        assert_eq!(flags(&pairs), [true, true, true]);
    }

    #[test]
    fn test_order_preserved() {
        let pairs = select_trainable(vec![10, 20, 30], 1);
        let layers: Vec<i32> = pairs.iter().map(|(layer, _)| *layer).collect();
        assert_eq!(layers, [10, 20, 30]);
    }

    #[test]
    fn test_empty_sequence() {
        let pairs = select_trainable(Vec::<u8>::new(), 3);
        assert!(pairs.is_empty());
    }
}
