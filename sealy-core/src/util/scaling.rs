//! The scaling variant of plaintext embedding: folding Delta * m into a
//! ciphertext component with exact 128-bit rounding, and the gamma-scaled
//! division recovering m during decryption.

use crate::context_data::ContextData;
use crate::error::{Error, Result};
use crate::memory::MemoryPool;
use crate::plaintext::Plaintext;
use crate::util::polyarith::multiply_poly_scalar;

/// Adds round(q * m / t) into `destination` (the c_0 component of a
/// ciphertext, laid out prime by prime).
///
/// The scaled coefficient is computed exactly as
/// floor((q * m + floor((t+1)/2)) / t) = Delta * m + fix with the fix
/// derived from (q mod t) * m in a 128-bit intermediate.
pub fn multiply_add_plain_with_scaling_variant(
	plain: &Plaintext,
	context_data: &ContextData,
	destination: &mut [u64],
) {
	scale_plain_into(plain, context_data, destination, false)
}

/// Subtracts round(q * m / t) from `destination`.
pub fn multiply_sub_plain_with_scaling_variant(
	plain: &Plaintext,
	context_data: &ContextData,
	destination: &mut [u64],
) {
	scale_plain_into(plain, context_data, destination, true)
}

fn scale_plain_into(
	plain: &Plaintext,
	context_data: &ContextData,
	destination: &mut [u64],
	subtract: bool,
) {
	let parms = context_data.parms();
	let coeff_modulus = parms.get_coefficient_modulus();
	let n = parms.get_poly_modulus_degree() as usize;
	let plain_modulus = parms.get_plain_modulus().value();
	let coeff_div_plain_modulus = context_data.coeff_div_plain_modulus();
	let plain_upper_half_threshold = context_data.plain_upper_half_threshold();
	let q_mod_t = context_data.coeff_mod_plain_modulus();

	for (i, m) in plain.data().iter().enumerate() {
		// fix = floor(((q mod t) * m + ceil(t/2)) / t)
		let numerator = *m as u128 * q_mod_t as u128 + plain_upper_half_threshold as u128;
		let fix = (numerator / plain_modulus as u128) as u64;

		for (j, q) in coeff_modulus.iter().enumerate() {
			let scaled =
				q.reduce_u128(coeff_div_plain_modulus[j] as u128 * *m as u128 + fix as u128);
			let target = &mut destination[j * n + i];
			*target = if subtract {
				q.sub_mod(*target, scaled)
			} else {
				q.add_mod(*target, scaled)
			};
		}
	}
}

/// Recovers the plaintext polynomial from the decryption phase
/// phi = sum(c_i * s^i) mod q by computing round(gamma * t * phi / q) in the
/// base {t, gamma} and correcting by gamma^{-1} modulo t.
pub fn divide_phase_by_scaling_variant(
	phase: &[u64],
	context_data: &ContextData,
	destination: &mut [u64],
	pool: &MemoryPool,
) -> Result<()> {
	let parms = context_data.parms();
	let coeff_modulus = parms.get_coefficient_modulus();
	let n = parms.get_poly_modulus_degree() as usize;
	let k = coeff_modulus.len();
	let base_converter = context_data.base_converter();
	let plain_gamma_base = base_converter.plain_gamma_base();
	if plain_gamma_base.len() != 2 {
		return Err(Error::LogicError("base converter lacks the plain-gamma base"));
	}
	let neg_inv_coeff = base_converter.neg_inv_coeff_whole_mod_plain_gamma();
	let inv_gamma = base_converter.inv_gamma_mod_plain();
	debug_assert_eq!(destination.len(), n);

	// |gamma * t|_{q_i} * phi
	let mut temp = pool.allocate(k * n);
	for (i, q) in coeff_modulus.iter().enumerate() {
		multiply_poly_scalar(
			&phase[i * n..(i + 1) * n],
			base_converter.plain_gamma_product_mod_coeff()[i],
			q,
			&mut temp[i * n..(i + 1) * n],
		);
	}

	// Convert from q to {t, gamma} and multiply by -q^{-1}.
	let mut plain_gamma = pool.allocate(2 * n);
	base_converter.fastbconv_plain_gamma(&temp, &mut plain_gamma, pool);
	for (i, b) in plain_gamma_base.iter().enumerate() {
		let scaled = plain_gamma[i * n..(i + 1) * n].to_vec();
		multiply_poly_scalar(&scaled, neg_inv_coeff[i], b, &mut plain_gamma[i * n..(i + 1) * n]);
	}

	// Remove the gamma-scaled error, correcting values past gamma/2 for the
	// centered representative, then cancel gamma modulo t.
	let plain = plain_gamma_base[0];
	let gamma = plain_gamma_base[1];
	let gamma_half = gamma.value() >> 1;
	for (i, dest) in destination.iter_mut().enumerate() {
		let t_part = plain_gamma[i];
		let gamma_part = plain_gamma[n + i];
		*dest = if gamma_part > gamma_half {
			plain.add_mod(t_part, plain.reduce_u128((gamma.value() - gamma_part) as u128))
		} else {
			plain.sub_mod(t_part, plain.reduce_u128(gamma_part as u128))
		};
		if *dest != 0 {
			*dest = plain.multiply_mod(*dest, inv_gamma);
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::util::uintarith::{add_uint_u64, divide_uint_by_u64, modulo_uint, multiply_uint_u64};
	use crate::*;

	fn test_context() -> Context {
		let params = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D1024)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D1024, &[36, 36]).unwrap(),
			)
			.set_plain_modulus_u64(256)
			.build()
			.unwrap();
		Context::new_insecure(&params, false).unwrap()
	}

	#[test]
	fn scaling_variant_embeds_and_recovers() {
		// Fold round(q*m/t) into an empty c_0, then recover m through the
		// gamma-scaled division: a noiseless encrypt/decrypt of the
		// plaintext embedding.
		let ctx = test_context();
		let context_data = ctx.first_context_data();
		let parms = context_data.parms();
		let n = parms.get_poly_modulus_degree() as usize;
		let k = parms.get_coefficient_modulus().len();
		let pool = MemoryPool::new();

		let plain = Plaintext::from_coefficients(vec![0, 1, 42, 127, 128, 200, 255]);
		let mut c0 = vec![0u64; k * n];
		multiply_add_plain_with_scaling_variant(&plain, &context_data, &mut c0);

		let mut recovered = vec![0u64; n];
		divide_phase_by_scaling_variant(&c0, &context_data, &mut recovered, &pool).unwrap();
		assert_eq!(&recovered[..plain.len()], plain.data());
		assert!(recovered[plain.len()..].iter().all(|c| *c == 0));

		// Subtracting the same embedding leaves nothing behind.
		multiply_sub_plain_with_scaling_variant(&plain, &context_data, &mut c0);
		assert!(c0.iter().all(|c| *c == 0));
	}

	#[test]
	fn scaled_coefficients_match_exact_rounding() {
		let ctx = test_context();
		let context_data = ctx.first_context_data();
		let parms = context_data.parms();
		let n = parms.get_poly_modulus_degree() as usize;
		let coeff_modulus = parms.get_coefficient_modulus();
		let k = coeff_modulus.len();
		let t = parms.get_plain_modulus().value();

		let m = 200u64;
		let plain = Plaintext::from_coefficients(vec![m]);
		let mut c0 = vec![0u64; k * n];
		multiply_add_plain_with_scaling_variant(&plain, &context_data, &mut c0);

		// floor((q*m + ceil(t/2)) / t) computed in multiprecision.
		let mut numerator = vec![0u64; k + 1];
		let total = context_data.total_coeff_modulus();
		multiply_uint_u64(&[total[0], total[1], 0], m, &mut numerator);
		let tmp = numerator.clone();
		add_uint_u64(&tmp, (t + 1) >> 1, &mut numerator);
		let mut expected = vec![0u64; k + 1];
		divide_uint_by_u64(&numerator, t, &mut expected);

		for (i, q) in coeff_modulus.iter().enumerate() {
			assert_eq!(c0[i * n], modulo_uint(&expected, q.value()));
		}
	}
}

