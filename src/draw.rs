use rand::Rng;

use crate::cards::Quality;

/// Relative draw weights, walked in wood, silver, gold, diamond order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityWeights {
    pub wood: u32,
    pub silver: u32,
    pub gold: u32,
    pub diamond: u32,
}

impl QualityWeights {
    pub fn tiers(&self) -> [(Quality, u32); 4] {
        [
            (Quality::Wood, self.wood),
            (Quality::Silver, self.silver),
            (Quality::Gold, self.gold),
            (Quality::Diamond, self.diamond),
        ]
    }

    pub fn total(&self) -> u64 {
        self.tiers().iter().map(|&(_, w)| w as u64).sum()
    }
}

#[derive(Debug, Clone)]
pub struct WeightedDraw {
    tiers: [(Quality, u32); 4],
    total: u64,
}

impl WeightedDraw {
    /// Returns `None` when every weight is zero.
    pub fn new(weights: QualityWeights) -> Option<Self> {
        let total = weights.total();
        if total == 0 {
            return None;
        }
        Some(Self {
            tiers: weights.tiers(),
            total,
        })
    }

    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Quality {
        let point = rng.random_range(0..self.total);
        let mut upper = 0u64;
        for &(quality, weight) in &self.tiers {
            upper += weight as u64;
            if point < upper {
                return quality;
            }
        }
        unreachable!("draw point {} outside total weight {}", point, self.total)
    }
}
