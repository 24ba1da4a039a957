use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Decides the order a batch of items is started in.
pub trait OrderStrategy: Send + Sync {
    /// A permutation of `0..len`.
    fn arrange(&self, len: usize) -> Vec<usize>;
}

/// Keeps the natural order. Deterministic runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityOrder;

impl OrderStrategy for IdentityOrder {
    fn arrange(&self, len: usize) -> Vec<usize> {
        (0..len).collect()
    }
}

/// Uniform shuffle, fresh entropy per call unless seeded.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomOrder {
    seed: Option<u64>,
}

impl RandomOrder {
    pub fn from_entropy() -> Self {
        Self { seed: None }
    }

    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }
}

impl OrderStrategy for RandomOrder {
    fn arrange(&self, len: usize) -> Vec<usize> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut rng);
        order
    }
}

/// Reorders `items` by the strategy's permutation.
pub fn arrange_items<T>(strategy: &dyn OrderStrategy, items: Vec<T>) -> Vec<T> {
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    strategy
        .arrange(slots.len())
        .into_iter()
        .filter_map(|index| slots.get_mut(index).and_then(Option::take))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_permutation(mut order: Vec<usize>, len: usize) -> bool {
        order.sort_unstable();
        order == (0..len).collect::<Vec<_>>()
    }

    #[test]
    fn identity_keeps_order() {
        assert_eq!(IdentityOrder.arrange(4), [0, 1, 2, 3]);
        assert_eq!(arrange_items(&IdentityOrder, vec!['a', 'b']), ['a', 'b']);
    }

    #[test]
    fn random_is_a_permutation() {
        for len in [0, 1, 7, 100] {
            assert!(is_permutation(RandomOrder::from_entropy().arrange(len), len));
        }
    }

    #[test]
    fn seeded_order_repeats() {
        let a = RandomOrder::seeded(42).arrange(32);
        assert_eq!(a, RandomOrder::seeded(42).arrange(32));
        assert_ne!(a, IdentityOrder.arrange(32));
    }

    #[test]
    fn arranged_items_keep_every_element() {
        let items: Vec<u32> = (0..20).collect();
        let mut arranged = arrange_items(&RandomOrder::seeded(7), items.clone());
        assert_eq!(arranged.len(), 20);
        arranged.sort_unstable();
        assert_eq!(arranged, items);
    }
}
