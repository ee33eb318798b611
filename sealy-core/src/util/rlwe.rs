//! Sampling of ternary, centered-clipped-Gaussian and uniform RNS
//! polynomials, and the zero encryptions every key and ciphertext starts
//! from.

use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal};

use crate::ciphertext::Ciphertext;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::memory::MemoryPool;
use crate::parameters::{EncryptionParameters, ParmsId};
use crate::random::RandomSeed;
use crate::util::ntt::{inverse_ntt_negacyclic, ntt_negacyclic};
use crate::util::polyarith::{add_poly_assign, dyadic_product, negate_poly};

/// Marker planted in the first word of c_1 by the save-seed encryption; the
/// four seed words follow it.
pub const SEED_MARKER: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Samples a polynomial with coefficients independently uniform on
/// {-1, 0, 1}, replicated across all RNS primes.
pub fn sample_poly_ternary(
	rng: &mut (dyn RngCore + Send),
	parms: &EncryptionParameters,
	destination: &mut [u64],
) {
	let coeff_modulus = parms.get_coefficient_modulus();
	let n = parms.get_poly_modulus_degree() as usize;
	for i in 0..n {
		let value = rng.gen_range(-1i32..=1);
		for (j, q) in coeff_modulus.iter().enumerate() {
			destination[i + j * n] = match value {
				1 => 1,
				-1 => q.value() - 1,
				_ => 0,
			};
		}
	}
}

/// Samples a polynomial from the centered clipped Gaussian: normal draws of
/// the configured standard deviation are rejected beyond the clipping bound
/// and rounded to integers, then lifted to RNS.
pub fn sample_poly_normal(
	rng: &mut (dyn RngCore + Send),
	parms: &EncryptionParameters,
	destination: &mut [u64],
) {
	let coeff_modulus = parms.get_coefficient_modulus();
	let n = parms.get_poly_modulus_degree() as usize;
	let standard_deviation = parms.noise_standard_deviation();
	let max_deviation = parms.noise_max_deviation();

	if max_deviation <= 0.0 {
		destination[..n * coeff_modulus.len()].fill(0);
		return;
	}
	let normal = Normal::new(0.0, standard_deviation).expect("standard deviation is positive");

	for i in 0..n {
		let noise = loop {
			let candidate: f64 = normal.sample(rng);
			if candidate.abs() <= max_deviation {
				break candidate.round() as i64;
			}
		};
		for (j, q) in coeff_modulus.iter().enumerate() {
			destination[i + j * n] = if noise >= 0 {
				noise as u64
			} else {
				q.value() - noise.unsigned_abs()
			};
		}
	}
}

/// Samples a polynomial with coefficients uniform modulo each prime, via
/// 63-bit draws rejected outside the largest window divisible by the prime.
pub fn sample_poly_uniform(
	rng: &mut (dyn RngCore + Send),
	parms: &EncryptionParameters,
	destination: &mut [u64],
) {
	const MAX_RANDOM: u64 = 0x7FFF_FFFF_FFFF_FFFF;
	let coeff_modulus = parms.get_coefficient_modulus();
	let n = parms.get_poly_modulus_degree() as usize;
	for (j, q) in coeff_modulus.iter().enumerate() {
		let max_multiple = MAX_RANDOM - q.reduce(MAX_RANDOM);
		for value in destination[j * n..(j + 1) * n].iter_mut() {
			let rand = loop {
				let candidate = rng.next_u64() >> 1;
				if candidate < max_multiple {
					break candidate;
				}
			};
			*value = q.reduce(rand);
		}
	}
}

/// Encrypts zero under the public key at the given parameter set:
/// c_j = pk_j * u + e_j with u ternary and e_j Gaussian.
pub fn encrypt_zero_asymmetric(
	public_key: &Ciphertext,
	context: &Context,
	parms_id: ParmsId,
	is_ntt_form: bool,
	destination: &mut Ciphertext,
	pool: &MemoryPool,
) -> Result<()> {
	if public_key.parms_id() != context.key_parms_id() {
		return Err(Error::InvalidArgument("public key parameter mismatch"));
	}
	let context_data = context
		.get_context_data(&parms_id)
		.ok_or(Error::InvalidArgument("parms_id is not valid for the context"))?;
	let parms = context_data.parms();
	let coeff_modulus = parms.get_coefficient_modulus();
	let k = coeff_modulus.len();
	let n = parms.get_poly_modulus_degree() as usize;
	let ntt_tables = context_data.ntt_tables();
	let encrypted_size = public_key.size();
	if encrypted_size < 2 {
		return Err(Error::InvalidArgument("public key has less than 2 parts"));
	}

	destination.resize(context, parms_id, encrypted_size)?;
	destination.set_ntt_form(is_ntt_form);
	destination.set_scale(1.0);

	// u and the error terms share one generator so a seeded encryption can
	// be re-derived end to end.
	let mut rng = parms.random_generator().create();

	let mut u = pool.allocate(k * n);
	sample_poly_ternary(rng.as_mut(), parms, &mut u);

	for (i, q) in coeff_modulus.iter().enumerate() {
		ntt_negacyclic(&mut u[i * n..(i + 1) * n], &ntt_tables[i]);
		for j in 0..encrypted_size {
			dyadic_product(
				&u[i * n..(i + 1) * n],
				&public_key.poly(j)[i * n..(i + 1) * n],
				q,
				&mut destination.poly_mut(j)[i * n..(i + 1) * n],
			);
			// The error is added in the form the ciphertext will carry.
			if !is_ntt_form {
				inverse_ntt_negacyclic(
					&mut destination.poly_mut(j)[i * n..(i + 1) * n],
					&ntt_tables[i],
				);
			}
		}
	}

	for j in 0..encrypted_size {
		sample_poly_normal(rng.as_mut(), parms, &mut u);
		for (i, q) in coeff_modulus.iter().enumerate() {
			if is_ntt_form {
				ntt_negacyclic(&mut u[i * n..(i + 1) * n], &ntt_tables[i]);
			}
			add_poly_assign(
				&mut destination.poly_mut(j)[i * n..(i + 1) * n],
				&u[i * n..(i + 1) * n],
				q,
			);
		}
	}
	Ok(())
}

/// Encrypts zero under the secret key at the given parameter set:
/// (c_0, c_1) = (-(a*s + e), a) with a uniform and e Gaussian.
///
/// When `save_seed` is set, a is derived from a dedicated seeded generator
/// and c_1 is replaced by [`SEED_MARKER`] followed by the seed words, so a
/// compatible loader can re-derive it.
pub fn encrypt_zero_symmetric(
	secret_key: &[u64],
	context: &Context,
	parms_id: ParmsId,
	is_ntt_form: bool,
	save_seed: bool,
	destination: &mut Ciphertext,
	pool: &MemoryPool,
) -> Result<()> {
	let context_data = context
		.get_context_data(&parms_id)
		.ok_or(Error::InvalidArgument("parms_id is not valid for the context"))?;
	let parms = context_data.parms();
	let coeff_modulus = parms.get_coefficient_modulus();
	let k = coeff_modulus.len();
	let n = parms.get_poly_modulus_degree() as usize;
	let ntt_tables = context_data.ntt_tables();

	destination.resize(context, parms_id, 2)?;
	destination.set_ntt_form(is_ntt_form);
	destination.set_scale(1.0);

	let factory = parms.random_generator();
	let mut noise_rng = factory.create();
	let seed: RandomSeed;
	let mut ciphertext_rng = if save_seed {
		// c_1 and the noise must not share a generator, otherwise
		// publishing the seed would reveal the noise.
		seed = factory.random_seed();
		factory.create_from_seed(seed)
	} else {
		seed = [0; 4];
		factory.create()
	};

	// Sample a directly in the representation the ciphertext uses.
	sample_poly_uniform(ciphertext_rng.as_mut(), parms, destination.poly_mut(1));

	let mut noise = pool.allocate(k * n);
	sample_poly_normal(noise_rng.as_mut(), parms, &mut noise);

	for (i, q) in coeff_modulus.iter().enumerate() {
		let (c0, c1) = destination.polys_mut(0, 1);
		dyadic_product(
			&secret_key[i * n..(i + 1) * n],
			&c1[i * n..(i + 1) * n],
			q,
			&mut c0[i * n..(i + 1) * n],
		);
		if is_ntt_form {
			ntt_negacyclic(&mut noise[i * n..(i + 1) * n], &ntt_tables[i]);
		} else {
			inverse_ntt_negacyclic(&mut c0[i * n..(i + 1) * n], &ntt_tables[i]);
		}
		add_poly_assign(&mut c0[i * n..(i + 1) * n], &noise[i * n..(i + 1) * n], q);
		negate_poly(&mut c0[i * n..(i + 1) * n], q);
	}

	if save_seed {
		let c1 = destination.poly_mut(1);
		c1[0] = SEED_MARKER;
		for (word, value) in c1[1..5].iter_mut().zip(seed.iter()) {
			*word = *value;
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::*;

	fn test_parms() -> (EncryptionParameters, Context) {
		let parms = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D1024)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D1024, &[36, 36]).unwrap(),
			)
			.set_plain_modulus_u64(256)
			.build()
			.unwrap();
		let ctx = Context::new_insecure(&parms, false).unwrap();
		(parms, ctx)
	}

	#[test]
	fn ternary_coefficients_replicate_across_primes() {
		let (parms, _ctx) = test_parms();
		let n = 1024;
		let mut poly = vec![0u64; 2 * n];
		let mut rng = parms.random_generator().create();
		sample_poly_ternary(rng.as_mut(), &parms, &mut poly);

		let q0 = parms.get_coefficient_modulus()[0].value();
		let q1 = parms.get_coefficient_modulus()[1].value();
		let mut seen_nonzero = false;
		for i in 0..n {
			let (a, b) = (poly[i], poly[i + n]);
			match a {
				0 => assert_eq!(b, 0),
				1 => assert_eq!(b, 1),
				_ => {
					assert_eq!(a, q0 - 1);
					assert_eq!(b, q1 - 1);
				}
			}
			seen_nonzero |= a != 0;
		}
		assert!(seen_nonzero);
	}

	#[test]
	fn gaussian_respects_clipping_bound() {
		let (parms, _ctx) = test_parms();
		let n = 1024;
		let mut poly = vec![0u64; 2 * n];
		let mut rng = parms.random_generator().create();
		sample_poly_normal(rng.as_mut(), &parms, &mut poly);

		let q0 = parms.get_coefficient_modulus()[0].value();
		let bound = parms.noise_max_deviation() as u64 + 1;
		for c in &poly[..n] {
			assert!(*c <= bound || *c >= q0 - bound);
		}
	}

	#[test]
	fn uniform_stays_below_modulus() {
		let (parms, _ctx) = test_parms();
		let n = 1024;
		let mut poly = vec![0u64; 2 * n];
		let mut rng = parms.random_generator().create();
		sample_poly_uniform(rng.as_mut(), &parms, &mut poly);
		for (j, q) in parms.get_coefficient_modulus().iter().enumerate() {
			assert!(poly[j * n..(j + 1) * n].iter().all(|c| *c < q.value()));
			// A run of 1024 uniform draws collapsing below 2 is broken.
			assert!(poly[j * n..(j + 1) * n].iter().any(|c| *c > 1));
		}
	}

	#[test]
	fn save_seed_plants_marker() {
		let (_parms, ctx) = test_parms();
		let key_data = ctx.key_context_data();
		let parms = key_data.parms();
		let n = parms.get_poly_modulus_degree() as usize;
		let k = parms.get_coefficient_modulus().len();

		// A fake all-ones NTT secret suffices to exercise the layout.
		let secret = vec![1u64; k * n];
		let pool = MemoryPool::new();
		let mut ct = Ciphertext::new();
		encrypt_zero_symmetric(&secret, &ctx, ctx.key_parms_id(), true, true, &mut ct, &pool)
			.unwrap();
		assert_eq!(ct.poly(1)[0], SEED_MARKER);
	}
}
