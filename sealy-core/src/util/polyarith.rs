//! Coefficient-wise polynomial arithmetic modulo a single small prime, plus
//! the negacyclic monomial and Galois permutations.

use itertools::izip;

use crate::modulus::Modulus;
use crate::util::uintarith::reverse_bits;

/// `result = operand1 + operand2` coefficient-wise.
pub fn add_poly(operand1: &[u64], operand2: &[u64], modulus: &Modulus, result: &mut [u64]) {
	for (r, a, b) in izip!(result.iter_mut(), operand1, operand2) {
		*r = modulus.add_mod(*a, *b);
	}
}

/// `result = operand1 - operand2` coefficient-wise.
pub fn sub_poly(operand1: &[u64], operand2: &[u64], modulus: &Modulus, result: &mut [u64]) {
	for (r, a, b) in izip!(result.iter_mut(), operand1, operand2) {
		*r = modulus.sub_mod(*a, *b);
	}
}

/// `operand1 += operand2` coefficient-wise.
pub fn add_poly_assign(operand1: &mut [u64], operand2: &[u64], modulus: &Modulus) {
	for (a, b) in operand1.iter_mut().zip(operand2) {
		*a = modulus.add_mod(*a, *b);
	}
}

/// `operand1 -= operand2` coefficient-wise.
pub fn sub_poly_assign(operand1: &mut [u64], operand2: &[u64], modulus: &Modulus) {
	for (a, b) in operand1.iter_mut().zip(operand2) {
		*a = modulus.sub_mod(*a, *b);
	}
}

/// `poly *= scalar` coefficient-wise; the scalar does not have to be
/// reduced.
pub fn multiply_poly_scalar_assign(poly: &mut [u64], scalar: u64, modulus: &Modulus) {
	let scalar = if scalar >= modulus.value() {
		modulus.reduce_u128(scalar as u128)
	} else {
		scalar
	};
	let scalar = modulus.shoup(scalar);
	for c in poly.iter_mut() {
		*c = modulus.multiply_shoup(*c, scalar);
	}
}

/// `operand1 *= operand2` pointwise.
pub fn dyadic_product_assign(operand1: &mut [u64], operand2: &[u64], modulus: &Modulus) {
	for (a, b) in operand1.iter_mut().zip(operand2) {
		*a = modulus.reduce_u128(*a as u128 * *b as u128);
	}
}

/// Negates every coefficient in place.
pub fn negate_poly(poly: &mut [u64], modulus: &Modulus) {
	for c in poly.iter_mut() {
		*c = modulus.negate_mod(*c);
	}
}

/// `result = scalar * poly` coefficient-wise; the scalar does not have to be
/// reduced.
pub fn multiply_poly_scalar(poly: &[u64], scalar: u64, modulus: &Modulus, result: &mut [u64]) {
	let scalar = if scalar >= modulus.value() {
		modulus.reduce_u128(scalar as u128)
	} else {
		scalar
	};
	let scalar = modulus.shoup(scalar);
	for (r, c) in result.iter_mut().zip(poly.iter()) {
		*r = modulus.multiply_shoup(*c, scalar);
	}
}

/// Pointwise product of two polynomials, the NTT-domain multiplication.
pub fn dyadic_product(operand1: &[u64], operand2: &[u64], modulus: &Modulus, result: &mut [u64]) {
	for (r, a, b) in izip!(result.iter_mut(), operand1, operand2) {
		*r = modulus.reduce_u128(*a as u128 * *b as u128);
	}
}

/// Reduces coefficients below 2^63 into `[0, q)`.
pub fn modulo_poly_coeffs(poly: &[u64], modulus: &Modulus, result: &mut [u64]) {
	for (r, c) in result.iter_mut().zip(poly.iter()) {
		*r = modulus.reduce(*c);
	}
}

/// Centered infinity norm of the polynomial, i.e. the largest distance of a
/// coefficient from the nearest multiple of q.
pub fn poly_infty_norm(poly: &[u64], modulus: &Modulus) -> u64 {
	let threshold = (modulus.value() + 1) >> 1;
	let mut norm = 0u64;
	for c in poly {
		let mut c = modulus.reduce(*c);
		if c >= threshold {
			c = modulus.value() - c;
		}
		norm = norm.max(c);
	}
	norm
}

/// Multiplies by the monomial `scalar * X^shift` in R_q. The coefficient
/// count must be a power of two and `shift < 2 * coeff_count`.
pub fn negacyclic_multiply_poly_mono(
	poly: &[u64],
	scalar: u64,
	shift: usize,
	modulus: &Modulus,
	result: &mut [u64],
) {
	let coeff_count = poly.len();
	debug_assert!(coeff_count.is_power_of_two());
	debug_assert_eq!(result.len(), coeff_count);
	let scalar = if scalar >= modulus.value() {
		modulus.reduce_u128(scalar as u128)
	} else {
		scalar
	};
	let scalar = modulus.shoup(scalar);
	let mask = coeff_count - 1;
	for (i, c) in poly.iter().enumerate() {
		let index_raw = i + shift;
		let index = index_raw & mask;
		let value = modulus.multiply_shoup(*c, scalar);
		// Wrapping past a multiple of X^N flips the sign.
		if index_raw & coeff_count == 0 || value == 0 {
			result[index] = value;
		} else {
			result[index] = modulus.value() - value;
		}
	}
}

/// Applies the Galois automorphism X -> X^galois_elt to a polynomial in
/// coefficient representation. `galois_elt` must be odd and below 2N.
pub fn apply_galois(
	poly: &[u64],
	coeff_count_power: u32,
	galois_elt: u64,
	modulus: &Modulus,
	result: &mut [u64],
) {
	let coeff_count = 1usize << coeff_count_power;
	debug_assert_eq!(poly.len(), coeff_count);
	debug_assert!(galois_elt & 1 == 1 && galois_elt < 2 * coeff_count as u64);
	let mask = (coeff_count as u64) - 1;
	let mut index_raw = 0u64;
	for c in poly.iter() {
		let index = (index_raw & mask) as usize;
		if index_raw & (coeff_count as u64) == 0 || *c == 0 {
			result[index] = *c;
		} else {
			result[index] = modulus.value() - *c;
		}
		index_raw = (index_raw + galois_elt) & (2 * coeff_count as u64 - 1);
	}
}

/// Applies the Galois automorphism to a polynomial already in NTT
/// representation; a pure permutation of the evaluation points.
pub fn apply_galois_ntt(poly: &[u64], coeff_count_power: u32, galois_elt: u64, result: &mut [u64]) {
	let coeff_count = 1usize << coeff_count_power;
	debug_assert_eq!(poly.len(), coeff_count);
	let m = 2 * coeff_count as u64;
	for i in 0..coeff_count {
		let reversed = reverse_bits(i as u64, coeff_count_power);
		let index_raw = (galois_elt * (2 * reversed + 1)) & (m - 1);
		let index = reverse_bits((index_raw - 1) >> 1, coeff_count_power) as usize;
		result[i] = poly[index];
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn modulus() -> Modulus {
		Modulus::new(40961).unwrap()
	}

	#[test]
	fn add_sub_negate() {
		let q = modulus();
		let a = [1u64, 40960, 0, 7];
		let b = [2u64, 2, 0, 40960];
		let mut sum = [0u64; 4];
		add_poly(&a, &b, &q, &mut sum);
		assert_eq!(sum, [3, 1, 0, 6]);
		let mut diff = [0u64; 4];
		sub_poly(&sum, &b, &q, &mut diff);
		assert_eq!(diff, a);
		let mut neg = a;
		negate_poly(&mut neg, &q);
		assert_eq!(neg, [40960, 1, 0, 40954]);
	}

	#[test]
	fn scalar_and_dyadic() {
		let q = modulus();
		let a = [1u64, 2, 3, 40960];
		let mut scaled = [0u64; 4];
		multiply_poly_scalar(&a, 3, &q, &mut scaled);
		assert_eq!(scaled, [3, 6, 9, 40958]);
		let mut prod = [0u64; 4];
		dyadic_product(&a, &scaled, &q, &mut prod);
		assert_eq!(prod, [3, 12, 27, (40960u64 * 40958) % 40961]);
	}

	#[test]
	fn monomial_multiplication_wraps_negacyclically() {
		let q = modulus();
		// (1 + 2x + 3x^2 + 4x^3) * x^2 in Z_q[x]/(x^4+1)
		let a = [1u64, 2, 3, 4];
		let mut result = [0u64; 4];
		negacyclic_multiply_poly_mono(&a, 1, 2, &q, &mut result);
		assert_eq!(result, [q.value() - 3, q.value() - 4, 1, 2]);

		// Shift by 2n is the identity times -1 twice.
		let mut twice = [0u64; 4];
		negacyclic_multiply_poly_mono(&result, 1, 2, &q, &mut twice);
		let mut expected = a;
		negate_poly(&mut expected, &q);
		assert_eq!(twice, expected);
	}

	#[test]
	fn galois_permutes_coefficients() {
		let q = modulus();
		// x -> x^3 on 1 + 2x + 3x^2 + 4x^3 over x^4+1:
		// x^3 -> x^9 = x^8 * x = x, with x^8 = (x^4)^2 = 1, so 4x^3 -> 4x.
		// 2x -> 2x^3, 3x^2 -> 3x^6 = -3x^2.
		let a = [1u64, 2, 3, 4];
		let mut result = [0u64; 4];
		apply_galois(&a, 2, 3, &q, &mut result);
		assert_eq!(result, [1, 4, q.value() - 3, 2]);
	}

	#[test]
	fn infty_norm_is_centered() {
		let q = modulus();
		assert_eq!(poly_infty_norm(&[0, 1, 40960], &q), 1);
		assert_eq!(poly_infty_norm(&[20480, 0], &q), 20480);
		assert_eq!(poly_infty_norm(&[20481, 0], &q), 20480);
	}
}
