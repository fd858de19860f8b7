//! Toroidal binary grid stepped by a Life-like rule.

use rand::prelude::*;
use rand_distr::Bernoulli;

use crate::schema::RuleNotation;

/// Square binary grid with wrap-around Moore neighborhood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifeGrid {
    /// Side length in cells.
    size: usize,
    /// Row-major cell states, 1 alive and 0 dead.
    cells: Vec<u8>,
    /// Scratch buffer reused between steps.
    next: Vec<u8>,
}

impl LifeGrid {
    /// All-dead grid.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![0; size * size],
            next: vec![0; size * size],
        }
    }

    /// Grid with each cell alive with probability `density`.
    pub fn random(size: usize, density: f64, rng: &mut StdRng) -> Self {
        let mut grid = Self::new(size);
        // NaN density leaves the grid empty.
        let Ok(dist) = Bernoulli::new(density.clamp(0.0, 1.0)) else {
            return grid;
        };
        for cell in grid.cells.iter_mut() {
            *cell = u8::from(dist.sample(rng));
        }
        grid
    }

    /// Random grid seeded deterministically.
    pub fn seeded(size: usize, density: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::random(size, density, &mut rng)
    }

    /// Side length in cells.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Row-major cell states.
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Whether the cell at column `x`, row `y` is alive.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.cells[y * self.size + x] != 0
    }

    /// Set the cell at column `x`, row `y`.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, alive: bool) {
        self.cells[y * self.size + x] = u8::from(alive);
    }

    /// Number of live cells.
    pub fn alive_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c != 0).count()
    }

    /// Fraction of live cells.
    pub fn density(&self) -> f64 {
        if self.cells.is_empty() {
            return 0.0;
        }
        self.alive_count() as f64 / self.cells.len() as f64
    }

    /// Live cells among the eight wrap-around neighbors.
    #[inline]
    fn neighbor_count(&self, x: usize, y: usize) -> u8 {
        let n = self.size;
        let xm = (x + n - 1) % n;
        let xp = (x + 1) % n;
        let ym = (y + n - 1) % n;
        let yp = (y + 1) % n;
        let c = &self.cells;
        c[ym * n + xm]
            + c[ym * n + x]
            + c[ym * n + xp]
            + c[y * n + xm]
            + c[y * n + xp]
            + c[yp * n + xm]
            + c[yp * n + x]
            + c[yp * n + xp]
    }

    /// Advance one generation.
    pub fn step(&mut self, rule: &RuleNotation) {
        let n = self.size;
        for y in 0..n {
            for x in 0..n {
                let count = self.neighbor_count(x, y);
                let alive = self.cells[y * n + x] != 0;
                let next = if alive {
                    rule.survive.contains(count)
                } else {
                    rule.born.contains(count)
                };
                self.next[y * n + x] = u8::from(next);
            }
        }
        std::mem::swap(&mut self.cells, &mut self.next);
    }

    /// Advance `steps` generations.
    pub fn run(&mut self, rule: &RuleNotation, steps: usize) {
        for _ in 0..steps {
            self.step(rule);
        }
    }

    /// Flip each cell with probability `rate`.
    pub fn perturb(&mut self, rate: f64, rng: &mut StdRng) {
        let Ok(dist) = Bernoulli::new(rate.clamp(0.0, 1.0)) else {
            return;
        };
        for cell in self.cells.iter_mut() {
            if dist.sample(rng) {
                *cell ^= 1;
            }
        }
    }

    /// Fraction of cells that differ from `other`. Grids must be the same size.
    pub fn hamming_fraction(&self, other: &LifeGrid) -> f64 {
        if self.cells.is_empty() || self.cells.len() != other.cells.len() {
            return 1.0;
        }
        let diff = self
            .cells
            .iter()
            .zip(&other.cells)
            .filter(|(a, b)| a != b)
            .count();
        diff as f64 / self.cells.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn life() -> RuleNotation {
        RuleNotation::life()
    }

    #[test]
    fn test_blinker_oscillates() {
        let mut grid = LifeGrid::new(5);
        grid.set(1, 2, true);
        grid.set(2, 2, true);
        grid.set(3, 2, true);

        grid.step(&life());
        assert!(grid.get(2, 1) && grid.get(2, 2) && grid.get(2, 3));
        assert!(!grid.get(1, 2) && !grid.get(3, 2));

        grid.step(&life());
        assert!(grid.get(1, 2) && grid.get(2, 2) && grid.get(3, 2));
        assert_eq!(grid.alive_count(), 3);
    }

    #[test]
    fn test_block_is_still_life() {
        let mut grid = LifeGrid::new(6);
        for (x, y) in [(2, 2), (3, 2), (2, 3), (3, 3)] {
            grid.set(x, y, true);
        }
        let before = grid.clone();
        grid.run(&life(), 10);
        assert_eq!(grid.cells(), before.cells());
    }

    #[test]
    fn test_wraparound_neighbors() {
        let mut grid = LifeGrid::new(4);
        grid.set(0, 0, true);
        grid.set(3, 3, true);
        grid.set(3, 0, true);
        assert_eq!(grid.neighbor_count(0, 3), 3);
    }

    #[test]
    fn test_seeded_density() {
        let a = LifeGrid::seeded(32, 0.3, 42);
        let b = LifeGrid::seeded(32, 0.3, 42);
        assert_eq!(a, b);
        let d = a.density();
        assert!(d > 0.2 && d < 0.4, "density {d}");
    }

    #[test]
    fn test_empty_rule_kills_everything() {
        let rule: RuleNotation = "B/S".parse().unwrap();
        let mut grid = LifeGrid::seeded(16, 0.5, 1);
        grid.step(&rule);
        assert_eq!(grid.alive_count(), 0);
    }

    #[test]
    fn test_perturb_zero_rate_is_noop() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut grid = LifeGrid::seeded(8, 0.5, 2);
        let before = grid.clone();
        grid.perturb(0.0, &mut rng);
        assert_eq!(grid.hamming_fraction(&before), 0.0);
    }
}
