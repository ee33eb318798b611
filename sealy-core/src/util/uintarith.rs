//! Multi-precision unsigned arithmetic over little-endian `u64` word slices,
//! plus the scalar number theory the parameter machinery rests on.

/// Returns the exponent when `value` is a power of two, `None` otherwise.
pub fn get_power_of_two(value: u64) -> Option<u32> {
	if value == 0 || !value.is_power_of_two() {
		return None;
	}
	Some(value.trailing_zeros())
}

/// Reverses the lowest `bit_count` bits of `operand`.
pub fn reverse_bits(operand: u64, bit_count: u32) -> u64 {
	if bit_count == 0 {
		return 0;
	}
	operand.reverse_bits() >> (64 - bit_count)
}

/// Number of significant bits in a word slice.
pub fn significant_bit_count(value: &[u64]) -> u32 {
	for (i, w) in value.iter().enumerate().rev() {
		if *w != 0 {
			return (i as u32) * 64 + (64 - w.leading_zeros());
		}
	}
	0
}

/// Adds `scalar` into the multi-word `value`, returning the final carry.
pub fn add_uint_u64(value: &[u64], scalar: u64, result: &mut [u64]) -> bool {
	debug_assert_eq!(value.len(), result.len());
	let mut carry = scalar;
	for (r, v) in result.iter_mut().zip(value.iter()) {
		let (sum, c) = v.overflowing_add(carry);
		*r = sum;
		carry = c as u64;
	}
	carry != 0
}

/// Adds two equally sized word slices, returning the final carry.
pub fn add_uint(operand1: &[u64], operand2: &[u64], result: &mut [u64]) -> bool {
	debug_assert_eq!(operand1.len(), operand2.len());
	debug_assert_eq!(operand1.len(), result.len());
	let mut carry = 0u64;
	for ((r, a), b) in result.iter_mut().zip(operand1).zip(operand2) {
		let wide = *a as u128 + *b as u128 + carry as u128;
		*r = wide as u64;
		carry = (wide >> 64) as u64;
	}
	carry != 0
}

/// Subtracts `operand2` from `operand1`, returning the final borrow.
pub fn sub_uint(operand1: &[u64], operand2: &[u64], result: &mut [u64]) -> bool {
	debug_assert_eq!(operand1.len(), operand2.len());
	debug_assert_eq!(operand1.len(), result.len());
	let mut borrow = 0u64;
	for ((r, a), b) in result.iter_mut().zip(operand1).zip(operand2) {
		let (diff, b1) = a.overflowing_sub(*b);
		let (diff, b2) = diff.overflowing_sub(borrow);
		*r = diff;
		borrow = (b1 || b2) as u64;
	}
	borrow != 0
}

/// Multiplies a multi-word value by a single word, truncating to the width of
/// `result`.
pub fn multiply_uint_u64(value: &[u64], scalar: u64, result: &mut [u64]) {
	debug_assert_eq!(value.len(), result.len());
	let mut carry = 0u64;
	for (r, v) in result.iter_mut().zip(value.iter()) {
		let wide = (*v as u128) * (scalar as u128) + carry as u128;
		*r = wide as u64;
		carry = (wide >> 64) as u64;
	}
}

/// Compares two equally sized word slices.
pub fn compare_uint(operand1: &[u64], operand2: &[u64]) -> std::cmp::Ordering {
	debug_assert_eq!(operand1.len(), operand2.len());
	for (a, b) in operand1.iter().zip(operand2.iter()).rev() {
		match a.cmp(b) {
			std::cmp::Ordering::Equal => continue,
			other => return other,
		}
	}
	std::cmp::Ordering::Equal
}

/// Returns `true` when `operand1 >= operand2`.
pub fn is_greater_or_equal_uint(operand1: &[u64], operand2: &[u64]) -> bool {
	compare_uint(operand1, operand2) != std::cmp::Ordering::Less
}

/// Divides a multi-word numerator by a single word, writing the quotient and
/// returning the remainder.
pub fn divide_uint_by_u64(numerator: &[u64], divisor: u64, quotient: &mut [u64]) -> u64 {
	debug_assert!(divisor != 0);
	debug_assert_eq!(numerator.len(), quotient.len());
	let mut remainder = 0u64;
	for (q, n) in quotient.iter_mut().zip(numerator.iter()).rev() {
		let wide = ((remainder as u128) << 64) | *n as u128;
		*q = (wide / divisor as u128) as u64;
		remainder = (wide % divisor as u128) as u64;
	}
	remainder
}

/// Reduces a multi-word value modulo a single word.
pub fn modulo_uint(value: &[u64], modulus: u64) -> u64 {
	debug_assert!(modulus != 0);
	let mut remainder = 0u64;
	for w in value.iter().rev() {
		let wide = ((remainder as u128) << 64) | *w as u128;
		remainder = (wide % modulus as u128) as u64;
	}
	remainder
}

/// Modular multiplication with a 128-bit intermediate.
pub fn multiply_u64_mod(operand1: u64, operand2: u64, modulus: u64) -> u64 {
	((operand1 as u128 * operand2 as u128) % modulus as u128) as u64
}

/// Modular exponentiation by squaring.
pub fn exponentiate_u64_mod(operand: u64, mut exponent: u64, modulus: u64) -> u64 {
	debug_assert!(modulus > 1);
	let mut base = operand % modulus;
	let mut result = 1u64;
	while exponent != 0 {
		if exponent & 1 != 0 {
			result = multiply_u64_mod(result, base, modulus);
		}
		base = multiply_u64_mod(base, base, modulus);
		exponent >>= 1;
	}
	result
}

/// Inverts `operand` modulo `modulus` via the extended Euclidean algorithm.
/// The modulus does not have to be prime; returns `None` when the inverse
/// does not exist.
pub fn try_invert_u64_mod(operand: u64, modulus: u64) -> Option<u64> {
	if modulus < 2 {
		return None;
	}
	let operand = operand % modulus;
	if operand == 0 {
		return None;
	}
	let (mut r0, mut r1) = (modulus as i128, operand as i128);
	let (mut t0, mut t1) = (0i128, 1i128);
	while r1 != 0 {
		let q = r0 / r1;
		let r = r0 - q * r1;
		r0 = r1;
		r1 = r;
		let t = t0 - q * t1;
		t0 = t1;
		t1 = t;
	}
	if r0 != 1 {
		return None;
	}
	if t0 < 0 {
		t0 += modulus as i128;
	}
	Some(t0 as u64)
}

/// Deterministic Miller-Rabin primality test for 64-bit integers.
pub fn is_prime(value: u64) -> bool {
	if value < 2 {
		return false;
	}
	for p in [2u64, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37] {
		if value == p {
			return true;
		}
		if value % p == 0 {
			return false;
		}
	}
	let mut d = value - 1;
	let mut r = 0u32;
	while d & 1 == 0 {
		d >>= 1;
		r += 1;
	}
	// This witness set decides primality for every 64-bit integer.
	'witness: for a in [2u64, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37] {
		let mut x = exponentiate_u64_mod(a, d, value);
		if x == 1 || x == value - 1 {
			continue;
		}
		for _ in 0..r - 1 {
			x = multiply_u64_mod(x, x, value);
			if x == value - 1 {
				continue 'witness;
			}
		}
		return false;
	}
	true
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bit_reversal() {
		assert_eq!(reverse_bits(0, 10), 0);
		assert_eq!(reverse_bits(1, 10), 512);
		assert_eq!(reverse_bits(0b1100000000, 10), 0b0000000011);
		assert_eq!(reverse_bits(5, 3), 5);
	}

	#[test]
	fn significant_bits() {
		assert_eq!(significant_bit_count(&[0, 0]), 0);
		assert_eq!(significant_bit_count(&[1, 0]), 1);
		assert_eq!(significant_bit_count(&[0, 1]), 65);
		assert_eq!(significant_bit_count(&[u64::MAX, u64::MAX]), 128);
	}

	#[test]
	fn add_sub_roundtrip() {
		let a = [u64::MAX, 1, 0];
		let b = [1, 0, 0];
		let mut sum = [0u64; 3];
		assert!(!add_uint(&a, &b, &mut sum));
		assert_eq!(sum, [0, 2, 0]);

		let mut diff = [0u64; 3];
		assert!(!sub_uint(&sum, &b, &mut diff));
		assert_eq!(diff, a);

		let mut borrowed = [0u64; 3];
		assert!(sub_uint(&b, &sum, &mut borrowed));
	}

	#[test]
	fn scalar_multiply_and_divide() {
		// (2^64 + 5) * 7 = 7 * 2^64 + 35
		let value = [5u64, 1];
		let mut product = [0u64; 2];
		multiply_uint_u64(&value, 7, &mut product);
		assert_eq!(product, [35, 7]);

		let mut quotient = [0u64; 2];
		let remainder = divide_uint_by_u64(&product, 7, &mut quotient);
		assert_eq!(remainder, 0);
		assert_eq!(quotient, value);

		let remainder = divide_uint_by_u64(&product, 10, &mut quotient);
		assert_eq!(remainder as u128, ((7u128 << 64) + 35) % 10);
	}

	#[test]
	fn modulo_matches_division() {
		let value = [0x1234_5678_9abc_def0u64, 0xfedc_ba98_7654_3210];
		let modulus = 0x0fff_ffff_ffff_ffd3u64;
		let mut quotient = [0u64; 2];
		let remainder = divide_uint_by_u64(&value, modulus, &mut quotient);
		assert_eq!(modulo_uint(&value, modulus), remainder);
	}

	#[test]
	fn invert_mod() {
		assert_eq!(try_invert_u64_mod(3, 8192), Some(2731));
		assert_eq!(multiply_u64_mod(2731, 3, 8192), 1);
		assert_eq!(try_invert_u64_mod(2, 8192), None);
		assert_eq!(try_invert_u64_mod(0, 17), None);
		let inv = try_invert_u64_mod(1234, 40961).unwrap();
		assert_eq!(multiply_u64_mod(inv, 1234, 40961), 1);
	}

	#[test]
	fn primality() {
		assert!(is_prime(2));
		assert!(is_prime(40961));
		assert!(is_prime(0x1fff_ffff_ffe0_0001));
		assert!(!is_prime(1));
		assert!(!is_prime(40962));
		assert!(!is_prime(0xffff_ffff_ffff_ffff));
	}
}
