use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::uintarith::{
	exponentiate_u64_mod, get_power_of_two, is_prime, multiply_u64_mod, try_invert_u64_mod,
};

/// Largest bit count the scalar machinery supports for a single modulus.
pub(crate) const MOD_BIT_COUNT_MAX: u32 = 62;

/// Bounds on user-supplied coefficient modulus primes.
pub(crate) const COEFF_MOD_BIT_COUNT_MIN: u32 = 30;
/// Upper bound on user-supplied coefficient modulus primes. The auxiliary
/// base of the scheme-B multiplication uses 61-bit primes; keeping user
/// primes one bit below them is what makes every lazy 128-bit accumulation
/// in the base converter fit.
pub(crate) const COEFF_MOD_BIT_COUNT_MAX: u32 = 60;

/// Bit width of the internally generated auxiliary/correction primes.
pub(crate) const INTERNAL_MOD_BIT_COUNT: u32 = 61;

/// Maximum number of coefficient modulus primes in a parameter set.
pub(crate) const COEFF_MOD_COUNT_MAX: usize = 62;

/// Bounds on the polynomial modulus degree. Degrees below 1024 never pass
/// the security table and are reachable only through insecure construction.
pub(crate) const POLY_DEGREE_MIN: u64 = 8;
pub(crate) const POLY_DEGREE_MAX: u64 = 32768;

/// The degree of the polynomial modulus X^N + 1.
///
/// Degrees below 1024 fail the HomomorphicEncryption.org security table and
/// exist for testing through the insecure construction path only.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u64)]
pub enum DegreeType {
	/// N = 64 (insecure, testing only)
	D64 = 64,
	/// N = 128 (insecure, testing only)
	D128 = 128,
	/// N = 256 (insecure, testing only)
	D256 = 256,
	/// N = 512 (insecure, testing only)
	D512 = 512,
	/// N = 1024
	D1024 = 1024,
	/// N = 2048
	D2048 = 2048,
	/// N = 4096
	D4096 = 4096,
	/// N = 8192
	D8192 = 8192,
	/// N = 16384
	D16384 = 16384,
	/// N = 32768
	D32768 = 32768,
}

impl From<DegreeType> for u64 {
	fn from(value: DegreeType) -> Self {
		value as u64
	}
}

/// Standard security levels based on the HomomorphicEncryption.org security
/// standard, expressed as bits of security against classical attacks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityLevel {
	/// 128-bit classical security.
	TC128,
	/// 192-bit classical security.
	TC192,
	/// 256-bit classical security.
	TC256,
}

impl Default for SecurityLevel {
	fn default() -> Self {
		SecurityLevel::TC128
	}
}

impl SecurityLevel {
	/// Largest total coefficient modulus bit count the standard permits for
	/// the given degree, or `None` when the degree is below the table.
	pub fn max_total_bit_count(&self, poly_modulus_degree: u64) -> Option<u32> {
		let row = match poly_modulus_degree {
			1024 => [27, 19, 14],
			2048 => [54, 37, 29],
			4096 => [109, 75, 58],
			8192 => [218, 152, 118],
			16384 => [438, 300, 237],
			32768 => [881, 611, 476],
			_ => return None,
		};
		let column = match self {
			SecurityLevel::TC128 => 0,
			SecurityLevel::TC192 => 1,
			SecurityLevel::TC256 => 2,
		};
		Some(row[column])
	}
}

/// A prime of at most 62 bits together with its precomputed Barrett
/// constants `⌊2^128 / q⌋`, enabling fast reduction of 128-bit intermediates.
///
/// The modulus value zero is reserved to mean "not set" (the plaintext
/// modulus of the CKKS scheme); all arithmetic on a zero modulus is a logic
/// error of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modulus {
	value: u64,
	bit_count: u32,
	const_ratio: [u64; 3],
}

/// A value paired with its Shoup multiplier `⌊2^64·y/q⌋`, used by the lazy
/// modular multiplications inside the NTT butterflies.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShoupOperand {
	/// The raw operand, already reduced modulo q.
	pub operand: u64,
	/// The precomputed quotient.
	pub quotient: u64,
}

impl Modulus {
	/// Creates a modulus from the given value. The value must be zero or a
	/// positive integer of 2 to 62 bits.
	pub fn new(value: u64) -> Result<Self> {
		if value == 0 {
			return Ok(Self::zero());
		}
		if value == 1 || value >> MOD_BIT_COUNT_MAX != 0 {
			return Err(Error::InvalidArgument("modulus value out of range"));
		}
		let bit_count = 64 - value.leading_zeros();

		// const_ratio = floor(2^128 / value) plus the remainder word.
		let quotient = u128::MAX / value as u128;
		let remainder = u128::MAX % value as u128;
		let (ratio, rem) = if remainder == value as u128 - 1 {
			(quotient + 1, 0)
		} else {
			(quotient, remainder + 1)
		};
		Ok(Self {
			value,
			bit_count,
			const_ratio: [ratio as u64, (ratio >> 64) as u64, rem as u64],
		})
	}

	/// The zero (unset) modulus.
	pub fn zero() -> Self {
		Self {
			value: 0,
			bit_count: 0,
			const_ratio: [0; 3],
		}
	}

	/// Returns the value of the modulus.
	pub fn value(&self) -> u64 {
		self.value
	}

	/// Returns the number of significant bits of the modulus.
	pub fn bit_count(&self) -> u32 {
		self.bit_count
	}

	/// Returns whether the modulus is zero (unset).
	pub fn is_zero(&self) -> bool {
		self.value == 0
	}

	/// Returns whether the modulus value is prime.
	pub fn is_prime(&self) -> bool {
		is_prime(self.value)
	}

	/// Barrett reduction of a value below 2^63 to `[0, q)`.
	#[inline]
	pub fn reduce(&self, input: u64) -> u64 {
		debug_assert!(input >> 63 == 0);
		let tmp = ((input as u128 * self.const_ratio[1] as u128) >> 64) as u64;
		let reduced = input.wrapping_sub(tmp.wrapping_mul(self.value));
		if reduced >= self.value {
			reduced - self.value
		} else {
			reduced
		}
	}

	/// Barrett reduction of a 128-bit value to `[0, q)`.
	#[inline]
	pub fn reduce_u128(&self, input: u128) -> u64 {
		let (z0, z1) = (input as u64, (input >> 64) as u64);
		let [r0, r1, _] = self.const_ratio;

		// Multiply input and const_ratio, keeping the bits that survive the
		// shift by 128.
		let carry = ((z0 as u128 * r0 as u128) >> 64) as u64;
		let tmp = z0 as u128 * r1 as u128;
		let (low, overflow) = (tmp as u64).overflowing_add(carry);
		let tmp3 = (tmp >> 64) as u64 + overflow as u64;

		let tmp = z1 as u128 * r0 as u128;
		let (_, overflow) = (tmp as u64).overflowing_add(low);
		let carry = (tmp >> 64) as u64 + overflow as u64;

		let quotient = z1
			.wrapping_mul(r1)
			.wrapping_add(tmp3)
			.wrapping_add(carry);

		let reduced = z0.wrapping_sub(quotient.wrapping_mul(self.value));
		if reduced >= self.value {
			reduced - self.value
		} else {
			reduced
		}
	}

	/// Modular addition; operands must already be reduced.
	#[inline]
	pub fn add_mod(&self, operand1: u64, operand2: u64) -> u64 {
		debug_assert!(operand1 < self.value && operand2 < self.value);
		let sum = operand1 + operand2;
		if sum >= self.value {
			sum - self.value
		} else {
			sum
		}
	}

	/// Modular subtraction; operands must already be reduced.
	#[inline]
	pub fn sub_mod(&self, operand1: u64, operand2: u64) -> u64 {
		debug_assert!(operand1 < self.value && operand2 < self.value);
		let (diff, borrow) = operand1.overflowing_sub(operand2);
		if borrow {
			diff.wrapping_add(self.value)
		} else {
			diff
		}
	}

	/// Modular negation; the operand must already be reduced.
	#[inline]
	pub fn negate_mod(&self, operand: u64) -> u64 {
		debug_assert!(operand < self.value);
		if operand == 0 {
			0
		} else {
			self.value - operand
		}
	}

	/// Modular multiplication through the 128-bit Barrett reduction.
	#[inline]
	pub fn multiply_mod(&self, operand1: u64, operand2: u64) -> u64 {
		self.reduce_u128(operand1 as u128 * operand2 as u128)
	}

	/// Modular exponentiation by squaring.
	pub fn exponentiate_mod(&self, operand: u64, exponent: u64) -> u64 {
		exponentiate_u64_mod(operand, exponent, self.value)
	}

	/// Attempts to invert `operand` modulo the modulus.
	pub fn try_invert_mod(&self, operand: u64) -> Option<u64> {
		try_invert_u64_mod(operand, self.value)
	}

	/// Precomputes the Shoup multiplier for `operand`, which must already be
	/// reduced.
	pub fn shoup(&self, operand: u64) -> ShoupOperand {
		debug_assert!(operand < self.value);
		ShoupOperand {
			operand,
			quotient: (((operand as u128) << 64) / self.value as u128) as u64,
		}
	}

	/// Lazy Shoup multiplication; the result lies in `[0, 2q)`.
	#[inline]
	pub fn multiply_shoup_lazy(&self, x: u64, y: ShoupOperand) -> u64 {
		let hi = ((x as u128 * y.quotient as u128) >> 64) as u64;
		x.wrapping_mul(y.operand)
			.wrapping_sub(hi.wrapping_mul(self.value))
	}

	/// Shoup multiplication reduced to `[0, q)`.
	#[inline]
	pub fn multiply_shoup(&self, x: u64, y: ShoupOperand) -> u64 {
		let reduced = self.multiply_shoup_lazy(x, y);
		if reduced >= self.value {
			reduced - self.value
		} else {
			reduced
		}
	}
}

/// Generates distinct primes of the given bit size, congruent to 1 modulo
/// `factor`, searching downward from the largest candidate.
pub(crate) fn generate_primes(
	factor: u64,
	bit_size: u32,
	count: usize,
	exclude: &[u64],
) -> Result<Vec<u64>> {
	if bit_size < 2 || bit_size > MOD_BIT_COUNT_MAX {
		return Err(Error::InvalidArgument("prime bit size out of range"));
	}
	let mut primes = Vec::with_capacity(count);
	// Largest candidate of the requested size congruent to 1 mod factor.
	let upper = (1u64 << bit_size) - 1;
	let mut candidate = upper - (upper - 1) % factor;
	let floor = 1u64 << (bit_size - 1);
	while primes.len() < count {
		if candidate <= floor {
			return Err(Error::LogicError("failed to find enough qualifying primes"));
		}
		if is_prime(candidate) && !exclude.contains(&candidate) && !primes.contains(&candidate) {
			primes.push(candidate);
		}
		candidate -= factor;
	}
	Ok(primes)
}

/// Factory producing coefficient modulus prime chains.
pub struct CoefficientModulusFactory;

impl CoefficientModulusFactory {
	/// Generates distinct NTT-friendly primes (congruent to 1 modulo 2N) of
	/// the requested bit sizes, suitable as a coefficient modulus for the
	/// given polynomial degree.
	pub fn build(degree: DegreeType, bit_sizes: &[u32]) -> Result<Vec<Modulus>> {
		Self::build_degree(degree.into(), bit_sizes)
	}

	/// As [`CoefficientModulusFactory::build`] for a raw degree value.
	pub fn build_degree(poly_modulus_degree: u64, bit_sizes: &[u32]) -> Result<Vec<Modulus>> {
		if get_power_of_two(poly_modulus_degree).is_none()
			|| !(POLY_DEGREE_MIN..=POLY_DEGREE_MAX).contains(&poly_modulus_degree)
		{
			return Err(Error::InvalidArgument("poly_modulus_degree is not valid"));
		}
		if bit_sizes.is_empty() || bit_sizes.len() > COEFF_MOD_COUNT_MAX {
			return Err(Error::InvalidArgument("invalid number of bit sizes"));
		}
		if bit_sizes
			.iter()
			.any(|b| !(COEFF_MOD_BIT_COUNT_MIN..=COEFF_MOD_BIT_COUNT_MAX).contains(b))
		{
			return Err(Error::InvalidArgument("prime bit size out of range"));
		}

		let factor = 2 * poly_modulus_degree;
		let mut found: Vec<u64> = Vec::with_capacity(bit_sizes.len());
		// Group the requested sizes so equal sizes yield distinct primes.
		let mut sorted = bit_sizes.to_vec();
		sorted.sort_unstable();
		let mut index = 0;
		while index < sorted.len() {
			let size = sorted[index];
			let same = sorted[index..].iter().take_while(|s| **s == size).count();
			let primes = generate_primes(factor, size, same, &found)?;
			found.extend(primes);
			index += same;
		}

		// Restore the caller's ordering.
		let mut by_size: std::collections::HashMap<u32, Vec<u64>> = std::collections::HashMap::new();
		for prime in found {
			let bits = 64 - prime.leading_zeros();
			by_size.entry(bits).or_default().push(prime);
		}
		bit_sizes
			.iter()
			.map(|size| {
				let prime = by_size
					.get_mut(size)
					.and_then(|v| v.pop())
					.ok_or(Error::LogicError("prime bookkeeping failed"))?;
				Modulus::new(prime)
			})
			.collect()
	}

	/// Returns a default coefficient modulus for the BFV scheme guaranteed
	/// to fit the security level's total bit budget.
	pub fn bfv_default(degree: DegreeType, security_level: SecurityLevel) -> Result<Vec<Modulus>> {
		let poly_modulus_degree: u64 = degree.into();
		let bit_sizes: &[u32] = match (poly_modulus_degree, security_level) {
			(2048, SecurityLevel::TC128) => &[54],
			(4096, SecurityLevel::TC128) => &[36, 36, 37],
			(8192, SecurityLevel::TC128) => &[43, 43, 44, 44, 44],
			(16384, SecurityLevel::TC128) => &[48, 48, 48, 49, 49, 49, 49, 49, 49],
			(32768, SecurityLevel::TC128) => &[55; 16],
			(4096, SecurityLevel::TC192) => &[37, 38],
			(8192, SecurityLevel::TC192) => &[50, 50, 52],
			(16384, SecurityLevel::TC192) => &[50, 50, 50, 50, 50, 50],
			(32768, SecurityLevel::TC192) => &[55, 55, 55, 55, 55, 55, 55, 56, 56, 56, 56],
			(4096, SecurityLevel::TC256) => &[58],
			(8192, SecurityLevel::TC256) => &[39, 39, 40],
			(16384, SecurityLevel::TC256) => &[47, 47, 47, 48, 48],
			(32768, SecurityLevel::TC256) => &[59; 8],
			_ => {
				return Err(Error::InvalidArgument(
					"no default coefficient modulus for this degree and security level",
				))
			}
		};
		Self::build_degree(poly_modulus_degree, bit_sizes)
	}
}

/// Factory producing plaintext moduli.
pub struct PlainModulusFactory;

impl PlainModulusFactory {
	/// Creates a plain modulus from a raw value.
	pub fn raw(value: u64) -> Result<Modulus> {
		if value >> COEFF_MOD_BIT_COUNT_MAX != 0 {
			return Err(Error::InvalidArgument("plain modulus value out of range"));
		}
		Modulus::new(value)
	}

	/// Creates a prime plaintext modulus of the given bit size congruent to
	/// 1 modulo 2N, enabling batching for the given degree.
	pub fn batching(degree: DegreeType, bit_size: u32) -> Result<Modulus> {
		let poly_modulus_degree: u64 = degree.into();
		if bit_size > COEFF_MOD_BIT_COUNT_MAX {
			return Err(Error::InvalidArgument("plain modulus bit size out of range"));
		}
		let primes = generate_primes(2 * poly_modulus_degree, bit_size, 1, &[])?;
		Modulus::new(primes[0])
	}
}
