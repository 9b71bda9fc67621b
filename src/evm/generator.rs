/// Type-aware random argument generation
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{
    abi::{ParamType, TypedValue},
    contract_utils::CallableMember,
    types::{max_for_bits, EVMAddress, EVMU256},
};
use crate::rand_utils::{
    generate_random_address, random_bits, random_printable_string, uniform_u256_inclusive,
};

/// 1 ether in wei
pub const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Fraction of integer draws that are boundary values instead of uniform
    pub boundary_ratio: f64,
    /// Fraction of address draws taken from the known address pool
    pub address_pool_ratio: f64,
    pub max_string_len: usize,
    pub max_bytes_len: usize,
    /// Upper bound of the value sent to payable members, in wei
    pub max_value: EVMU256,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            boundary_ratio: 0.1,
            address_pool_ratio: 0.3,
            max_string_len: 32,
            max_bytes_len: 64,
            max_value: EVMU256::from(ONE_ETHER),
        }
    }
}

/// Draws arguments for callable members. Holds no random state of its own:
/// every draw consumes the stream it is handed.
#[derive(Debug, Clone)]
pub struct ArgGenerator {
    config: GeneratorConfig,
    address_pool: Vec<EVMAddress>,
}

impl ArgGenerator {
    pub fn new(config: GeneratorConfig, address_pool: Vec<EVMAddress>) -> Self {
        Self {
            config,
            address_pool,
        }
    }

    /// Copy of this generator for one round. `signer` moves to the front of the pool,
    /// where half of all pool draws land, and the round's `instance` joins the pool.
    pub fn for_round(&self, signer: EVMAddress, instance: EVMAddress) -> Self {
        let mut generator = self.clone();
        generator.address_pool.retain(|a| *a != signer && *a != instance);
        generator.address_pool.insert(0, signer);
        generator.address_pool.push(instance);
        generator
    }

    pub fn address_pool(&self) -> &[EVMAddress] {
        &self.address_pool
    }

    pub fn generate<R: Rng + ?Sized>(&self, ty: &ParamType, rng: &mut R) -> TypedValue {
        match ty {
            ParamType::Uint(bits) => TypedValue::Uint {
                bits: *bits,
                value: self.gen_uint(*bits, rng),
            },
            ParamType::Int(bits) => TypedValue::Int {
                bits: *bits,
                value: self.gen_int(*bits, rng),
            },
            ParamType::Address => TypedValue::Address(self.gen_address(rng)),
            ParamType::Bool => TypedValue::Bool(rng.gen()),
            ParamType::String => {
                let len = rng.gen_range(0..=self.config.max_string_len);
                TypedValue::String(random_printable_string(rng, len))
            }
            ParamType::Bytes => {
                let mut data = vec![0u8; rng.gen_range(0..=self.config.max_bytes_len)];
                rng.fill(data.as_mut_slice());
                TypedValue::Bytes(data)
            }
            ParamType::FixedBytes(len) => {
                let mut data = vec![0u8; *len];
                rng.fill(data.as_mut_slice());
                TypedValue::FixedBytes(data)
            }
        }
    }

    /// Arguments for every parameter of `member`, in order
    pub fn generate_args<R: Rng + ?Sized>(&self, member: &CallableMember, rng: &mut R) -> Vec<TypedValue> {
        member.param_types().map(|ty| self.generate(ty, rng)).collect()
    }

    /// Wei sent along with a call; zero unless the member is payable
    pub fn generate_value<R: Rng + ?Sized>(&self, member: &CallableMember, rng: &mut R) -> EVMU256 {
        if !member.is_payable() {
            return EVMU256::zero();
        }
        let max = self.config.max_value;
        if self.is_boundary_draw(rng) {
            if rng.gen() {
                EVMU256::zero()
            } else {
                max
            }
        } else {
            uniform_u256_inclusive(rng, max)
        }
    }

    fn is_boundary_draw<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.gen_bool(self.config.boundary_ratio.clamp(0.0, 1.0))
    }

    fn gen_uint<R: Rng + ?Sized>(&self, bits: usize, rng: &mut R) -> EVMU256 {
        if self.is_boundary_draw(rng) {
            if rng.gen() {
                EVMU256::zero()
            } else {
                max_for_bits(bits)
            }
        } else {
            random_bits(rng, bits)
        }
    }

    fn gen_int<R: Rng + ?Sized>(&self, bits: usize, rng: &mut R) -> EVMU256 {
        let raw = if self.is_boundary_draw(rng) {
            let max = max_for_bits(bits - 1);
            match rng.gen_range(0..4) {
                0 => max + 1, // MIN
                1 => max_for_bits(bits), // -1
                2 => EVMU256::zero(),
                _ => max,
            }
        } else {
            random_bits(rng, bits)
        };
        sign_extend(raw, bits)
    }

    fn gen_address<R: Rng + ?Sized>(&self, rng: &mut R) -> EVMAddress {
        let pool_ratio = self.config.address_pool_ratio.clamp(0.0, 1.0);
        if !self.address_pool.is_empty() && rng.gen_bool(pool_ratio) {
            // the first entry is the round's signer
            if rng.gen() {
                self.address_pool[0]
            } else {
                self.address_pool[rng.gen_range(0..self.address_pool.len())]
            }
        } else {
            generate_random_address(rng)
        }
    }
}

/// Widen a `bits`-wide two's complement value to 256 bits
pub fn sign_extend(raw: EVMU256, bits: usize) -> EVMU256 {
    if bits >= 256 || !raw.bit(bits - 1) {
        return raw;
    }
    raw | !max_for_bits(bits)
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::evm::contract_utils::{MemberKind, Mutability};

    const DRAWS: usize = 10_000;

    fn generator() -> ArgGenerator {
        ArgGenerator::new(
            GeneratorConfig::default(),
            vec![EVMAddress::from_low_u64_be(0xdeadbeef), EVMAddress::zero()],
        )
    }

    fn member(mutability: Mutability) -> CallableMember {
        CallableMember {
            name: "f".to_string(),
            kind: MemberKind::Function,
            params: vec![],
            mutability,
        }
    }

    #[test]
    fn test_uint_domain() {
        let gen = generator();
        let mut rng = StdRng::seed_from_u64(0);
        for bits in [8, 16, 64, 160, 256] {
            let max = max_for_bits(bits);
            for _ in 0..DRAWS {
                match gen.generate(&ParamType::Uint(bits), &mut rng) {
                    TypedValue::Uint { bits: b, value } => {
                        assert_eq!(b, bits);
                        assert!(value <= max);
                    }
                    other => panic!("unexpected value {:?}", other),
                }
            }
        }
    }

    #[test]
    fn test_uint_boundaries_sampled() {
        let gen = generator();
        let mut rng = StdRng::seed_from_u64(42);
        for bits in [8, 256] {
            let values = (0..DRAWS)
                .map(|_| match gen.generate(&ParamType::Uint(bits), &mut rng) {
                    TypedValue::Uint { value, .. } => value,
                    other => panic!("unexpected value {:?}", other),
                })
                .collect::<Vec<_>>();
            assert!(values.contains(&EVMU256::zero()));
            assert!(values.contains(&max_for_bits(bits)));
        }
    }

    #[test]
    fn test_int_domain() {
        let gen = generator();
        let mut rng = StdRng::seed_from_u64(3);
        let mut saw_negative = false;
        for _ in 0..DRAWS {
            match gen.generate(&ParamType::Int(8), &mut rng) {
                TypedValue::Int { value, .. } => {
                    if value.bit(255) {
                        saw_negative = true;
                        // sign extended: everything above bit 7 is set
                        assert_eq!(value | EVMU256::from(0xff), EVMU256::MAX);
                        assert!(value.bit(7));
                    } else {
                        assert!(value <= EVMU256::from(127));
                    }
                }
                other => panic!("unexpected value {:?}", other),
            }
        }
        assert!(saw_negative);
    }

    #[test]
    fn test_address_and_bytes_domain() {
        let gen = generator();
        let mut rng = StdRng::seed_from_u64(5);
        let mut from_pool = 0;
        for _ in 0..DRAWS {
            match gen.generate(&ParamType::Address, &mut rng) {
                TypedValue::Address(addr) => {
                    assert_eq!(addr.as_bytes().len(), 20);
                    if gen.address_pool().contains(&addr) {
                        from_pool += 1;
                    }
                }
                other => panic!("unexpected value {:?}", other),
            }
            match gen.generate(&ParamType::FixedBytes(4), &mut rng) {
                TypedValue::FixedBytes(data) => assert_eq!(data.len(), 4),
                other => panic!("unexpected value {:?}", other),
            }
            match gen.generate(&ParamType::Bytes, &mut rng) {
                TypedValue::Bytes(data) => assert!(data.len() <= 64),
                other => panic!("unexpected value {:?}", other),
            }
        }
        // roughly 30% of draws come from the pool
        assert!(from_pool > DRAWS / 5 && from_pool < DRAWS / 2);
    }

    #[test]
    fn test_string_domain() {
        let gen = generator();
        let mut rng = StdRng::seed_from_u64(9);
        let mut saw_empty = false;
        for _ in 0..DRAWS {
            match gen.generate(&ParamType::String, &mut rng) {
                TypedValue::String(s) => {
                    assert!(s.chars().count() <= 32);
                    assert!(s.chars().all(|c| !c.is_control()));
                    saw_empty |= s.is_empty();
                }
                other => panic!("unexpected value {:?}", other),
            }
        }
        assert!(saw_empty);
    }

    #[test]
    fn test_bool_takes_both_values() {
        let gen = generator();
        let mut rng = StdRng::seed_from_u64(11);
        let values = (0..100)
            .map(|_| gen.generate(&ParamType::Bool, &mut rng))
            .collect::<Vec<_>>();
        assert!(values.contains(&TypedValue::Bool(true)));
        assert!(values.contains(&TypedValue::Bool(false)));
    }

    #[test]
    fn test_value_bounded_and_zero_for_non_payable() {
        let gen = generator();
        let mut rng = StdRng::seed_from_u64(13);
        let payable = member(Mutability::Payable);
        let plain = member(Mutability::NonPayable);
        let max = EVMU256::from(ONE_ETHER);
        for _ in 0..DRAWS {
            assert!(gen.generate_value(&payable, &mut rng) <= max);
            assert_eq!(gen.generate_value(&plain, &mut rng), EVMU256::zero());
        }
    }

    #[test]
    fn test_same_seed_same_args() {
        let gen = generator();
        let mut params = member(Mutability::NonPayable);
        params.params = vec![
            ("a".to_string(), ParamType::Uint(256)),
            ("b".to_string(), ParamType::String),
            ("c".to_string(), ParamType::Address),
        ];
        let first = gen.generate_args(&params, &mut StdRng::seed_from_u64(99));
        let second = gen.generate_args(&params, &mut StdRng::seed_from_u64(99));
        assert_eq!(first, second);
    }

    #[test]
    fn test_round_signer_drawn_most() {
        let accounts = (1..=20).map(EVMAddress::from_low_u64_be).collect::<Vec<_>>();
        let signer = accounts[7];
        let instance = EVMAddress::from_low_u64_be(0xc000);
        let gen = ArgGenerator::new(GeneratorConfig::default(), accounts).for_round(signer, instance);
        assert_eq!(gen.address_pool()[0], signer);
        assert_eq!(gen.address_pool().iter().filter(|a| **a == signer).count(), 1);
        assert_eq!(gen.address_pool().last(), Some(&instance));

        let mut rng = StdRng::seed_from_u64(11);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..DRAWS {
            if let TypedValue::Address(addr) = gen.generate(&ParamType::Address, &mut rng) {
                *counts.entry(addr).or_insert(0usize) += 1;
            }
        }
        let signer_hits = counts[&signer];
        // about 0.3 * (0.5 + 0.5 / 21) of all draws
        assert!(signer_hits > DRAWS / 8, "signer drawn {} times", signer_hits);
        assert!(counts
            .iter()
            .filter(|(a, _)| **a != signer)
            .all(|(_, n)| *n < signer_hits));
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(EVMU256::from(0x80), 8), !EVMU256::from(0x7f));
        assert_eq!(sign_extend(EVMU256::from(0x7f), 8), EVMU256::from(0x7f));
    }
}
