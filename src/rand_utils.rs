/// Utilities for generating random values for different types.
///
/// Every helper takes the random stream explicitly so a run is reproducible from its seed.
use primitive_types::{H160, U256};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Code points outside ASCII that are still printable, mixed into generated strings
/// so contracts see multi-byte UTF-8.
const WIDE_PRINTABLE: &[char] = &['é', 'ß', 'Ω', 'ж', '中', '文', '€', '🙂'];

/// Independent stream for one round, derived from the run seed.
pub fn round_rng(seed: u64, round: usize) -> StdRng {
    // splitmix-style spreading so neighbouring rounds do not share prefixes
    let mixed = seed ^ (round as u64).wrapping_add(1).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    StdRng::seed_from_u64(mixed)
}

/// Generate a random H160 address.
pub fn generate_random_address<R: Rng + ?Sized>(rng: &mut R) -> H160 {
    let mut address = H160::zero();
    rng.fill(&mut address.0);
    address
}

/// Uniform value over `[0, 2^bits - 1]`. `bits` must be a multiple of 8.
pub fn random_bits<R: Rng + ?Sized>(rng: &mut R, bits: usize) -> U256 {
    let len = (bits / 8).min(32);
    let mut word = [0u8; 32];
    rng.fill(&mut word[32 - len..]);
    U256::from_big_endian(&word)
}

/// Uniform value over `[0, max]`
pub fn uniform_u256_inclusive<R: Rng + ?Sized>(rng: &mut R, max: U256) -> U256 {
    if max <= U256::from(u128::MAX) {
        return U256::from(rng.gen_range(0..=max.as_u128()));
    }
    // rejection sampling on the smallest covering bit mask
    let bits = max.bits();
    let mask = if bits == 256 {
        U256::MAX
    } else {
        (U256::one() << bits) - 1
    };
    loop {
        let candidate = random_bits(rng, 256) & mask;
        if candidate <= max {
            return candidate;
        }
    }
}

/// Printable string with `len` characters, empty when `len` is 0.
pub fn random_printable_string<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| {
            if rng.gen_ratio(1, 16) {
                WIDE_PRINTABLE[rng.gen_range(0..WIDE_PRINTABLE.len())]
            } else {
                rng.gen_range(0x20u8..=0x7e) as char
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_rng_is_deterministic() {
        let a: u64 = round_rng(7, 3).gen();
        let b: u64 = round_rng(7, 3).gen();
        let c: u64 = round_rng(7, 4).gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_uniform_u256_inclusive_bounds() {
        let mut rng = StdRng::seed_from_u64(0);
        let big = U256::MAX - U256::from(5);
        for _ in 0..1000 {
            assert!(uniform_u256_inclusive(&mut rng, U256::from(10)) <= U256::from(10));
            assert!(uniform_u256_inclusive(&mut rng, big) <= big);
        }
        assert_eq!(uniform_u256_inclusive(&mut rng, U256::zero()), U256::zero());
    }

    #[test]
    fn test_random_bits_width() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            assert!(random_bits(&mut rng, 16) <= U256::from(u16::MAX));
        }
    }
}
