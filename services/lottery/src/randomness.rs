use rand::Rng;
use shared::{BlockNumber, MAX_BLOCK, MIN_BLOCK};

use crate::errors::Result;

/// Source of the winning block for a draw
pub trait BlockDrawer: Send + Sync {
    fn draw(&self) -> Result<BlockNumber>;
}

/// Uniform draw from the thread-local RNG
///
/// Not verifiable by players; a commit-reveal or VRF source can replace it
/// behind the same trait.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngDrawer;

impl BlockDrawer for ThreadRngDrawer {
    fn draw(&self) -> Result<BlockNumber> {
        let value = rand::thread_rng().gen_range(MIN_BLOCK..=MAX_BLOCK);
        Ok(BlockNumber::new(value as i64)?)
    }
}
