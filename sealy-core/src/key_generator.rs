use std::sync::RwLock;

use tracing::debug;

use crate::ciphertext::Ciphertext;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::memory::MemoryPool;
use crate::parameters::ParmsId;
use crate::util::ntt::ntt_negacyclic;
use crate::util::polyarith::{add_poly_assign, apply_galois_ntt, dyadic_product, multiply_poly_scalar};
use crate::util::rlwe::{encrypt_zero_symmetric, sample_poly_ternary};
use crate::util::uintarith::{exponentiate_u64_mod, try_invert_u64_mod};

/// The secret key: a ternary polynomial stored in NTT form per prime of the
/// key-level coefficient modulus.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretKey {
	data: Vec<u64>,
	parms_id: ParmsId,
}

impl SecretKey {
	/// The key polynomial in RNS/NTT layout.
	pub fn data(&self) -> &[u64] {
		&self.data
	}

	/// The key-level parameter identifier.
	pub fn parms_id(&self) -> ParmsId {
		self.parms_id
	}
}

/// The public key: an encryption of zero under the secret key, stored at
/// the key level.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicKey {
	data: Ciphertext,
}

impl PublicKey {
	/// The underlying size-2 ciphertext.
	pub fn data(&self) -> &Ciphertext {
		&self.data
	}

	/// The key-level parameter identifier.
	pub fn parms_id(&self) -> ParmsId {
		self.data.parms_id()
	}
}

/// A key-switching key: for each decomposition prime q_j, an encryption of
/// the target polynomial masked onto the j-th RNS digit and scaled by the
/// last key-level prime.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySwitchingKey {
	pub(crate) data: Vec<PublicKey>,
}

/// Relinearization keys: key-switching keys for the powers s^2, s^3, ... of
/// the secret key.
#[derive(Debug, Clone, PartialEq)]
pub struct RelinearizationKey {
	pub(crate) keys: Vec<KeySwitchingKey>,
	pub(crate) parms_id: ParmsId,
}

impl RelinearizationKey {
	/// Number of key-switching keys (one per secret power).
	pub fn size(&self) -> usize {
		self.keys.len()
	}

	/// The key-level parameter identifier.
	pub fn parms_id(&self) -> ParmsId {
		self.parms_id
	}

	/// The storage index for the key targeting the given secret power.
	pub(crate) fn get_index(key_power: usize) -> usize {
		debug_assert!(key_power >= 2);
		key_power - 2
	}
}

/// Galois keys: key-switching keys for the automorphism-permuted secret
/// key, indexed by Galois element.
#[derive(Debug, Clone, PartialEq)]
pub struct GaloisKey {
	pub(crate) keys: Vec<Option<KeySwitchingKey>>,
	pub(crate) parms_id: ParmsId,
}

impl GaloisKey {
	/// The storage index of a Galois element.
	pub(crate) fn get_index(galois_elt: u64) -> usize {
		debug_assert!(galois_elt & 1 == 1);
		((galois_elt - 1) >> 1) as usize
	}

	/// Returns whether a key for the given Galois element is present.
	pub fn has_key(&self, galois_elt: u64) -> bool {
		let index = Self::get_index(galois_elt);
		index < self.keys.len() && self.keys[index].is_some()
	}

	/// The key-level parameter identifier.
	pub fn parms_id(&self) -> ParmsId {
		self.parms_id
	}
}

/// Generates matching secret and public keys, and derives relinearization
/// and Galois keys on request.
///
/// The powers of the secret key needed by relinearization are cached and
/// grown lazily behind a reader-writer lock.
pub struct KeyGenerator {
	context: Context,
	secret_key: SecretKey,
	public_key: PublicKey,
	secret_key_array: RwLock<Vec<u64>>,
	pool: MemoryPool,
}

impl KeyGenerator {
	/// Creates a KeyGenerator and generates a fresh secret and public key.
	pub fn new(context: &Context) -> Result<Self> {
		let pool = MemoryPool::global().clone();
		let secret_key = Self::generate_sk(context)?;
		let public_key = Self::generate_pk(context, &secret_key, &pool)?;
		let secret_key_array = RwLock::new(secret_key.data.clone());
		debug!("secret and public keys generated");
		Ok(Self {
			context: context.clone(),
			secret_key,
			public_key,
			secret_key_array,
			pool,
		})
	}

	/// Creates a KeyGenerator reusing an existing secret key; a fresh public
	/// key is generated.
	pub fn new_from_secret_key(context: &Context, secret_key: &SecretKey) -> Result<Self> {
		if secret_key.parms_id() != context.key_parms_id() {
			return Err(Error::InvalidArgument(
				"secret key is not valid for encryption parameters",
			));
		}
		let pool = MemoryPool::global().clone();
		let public_key = Self::generate_pk(context, secret_key, &pool)?;
		let secret_key_array = RwLock::new(secret_key.data.clone());
		Ok(Self {
			context: context.clone(),
			secret_key: secret_key.clone(),
			public_key,
			secret_key_array,
			pool,
		})
	}

	fn generate_sk(context: &Context) -> Result<SecretKey> {
		let context_data = context.key_context_data();
		let parms = context_data.parms();
		let coeff_modulus = parms.get_coefficient_modulus();
		let n = parms.get_poly_modulus_degree() as usize;

		let mut data = vec![0u64; coeff_modulus.len() * n];
		let mut rng = parms.random_generator().create();
		sample_poly_ternary(rng.as_mut(), parms, &mut data);
		for (i, tables) in context_data.ntt_tables().iter().enumerate() {
			ntt_negacyclic(&mut data[i * n..(i + 1) * n], tables);
		}
		Ok(SecretKey {
			data,
			parms_id: context_data.parms_id(),
		})
	}

	fn generate_pk(context: &Context, secret_key: &SecretKey, pool: &MemoryPool) -> Result<PublicKey> {
		let mut data = Ciphertext::new();
		encrypt_zero_symmetric(
			&secret_key.data,
			context,
			context.key_parms_id(),
			true,
			false,
			&mut data,
			pool,
		)?;
		Ok(PublicKey {
			data,
		})
	}

	/// Returns the secret key.
	pub fn secret_key(&self) -> &SecretKey {
		&self.secret_key
	}

	/// Returns a copy of the public key.
	pub fn create_public_key(&self) -> PublicKey {
		self.public_key.clone()
	}

	/// Creates relinearization keys sufficient to contract a size-3
	/// ciphertext back to size 2.
	pub fn create_relinearization_keys(&self) -> Result<RelinearizationKey> {
		self.relinearization_keys(1)
	}

	/// Creates relinearization keys for the secret powers s^2, ...,
	/// s^{count+1}, allowing contraction of ciphertexts up to size count+2.
	pub fn relinearization_keys(&self, count: usize) -> Result<RelinearizationKey> {
		if !self.context.using_keyswitching() {
			return Err(Error::LogicError("keyswitching is not supported by the context"));
		}
		if count == 0 || count > 60 {
			return Err(Error::InvalidArgument("invalid relinearization key count"));
		}
		let context_data = self.context.key_context_data();
		let parms = context_data.parms();
		let k = parms.get_coefficient_modulus().len();
		let n = parms.get_poly_modulus_degree() as usize;

		self.compute_secret_key_array(count + 1)?;

		let array = self
			.secret_key_array
			.read()
			.unwrap_or_else(|e| e.into_inner());
		let mut keys = Vec::with_capacity(count);
		for l in 0..count {
			// The (l+2)-nd power of the secret sits at offset l+1.
			let power = &array[(l + 1) * k * n..(l + 2) * k * n];
			keys.push(self.generate_one_kswitch_key(power)?);
		}
		debug!(count, "relinearization keys generated");
		Ok(RelinearizationKey {
			keys,
			parms_id: context_data.parms_id(),
		})
	}

	/// Creates Galois keys for a logarithmically small generator set (the
	/// powers of 3 and its inverse, plus 2N-1) from which any rotation can
	/// be composed.
	pub fn create_galois_keys(&self) -> Result<GaloisKey> {
		let n = self
			.context
			.key_context_data()
			.parms()
			.get_poly_modulus_degree();
		let m = n << 1;
		let log_n = n.trailing_zeros();

		let mut elts = vec![m - 1];
		let mut power_of_three = 3u64;
		let mut neg_power_of_three =
			try_invert_u64_mod(3, m).ok_or(Error::LogicError("2N is not divisible by 3"))?;
		for _ in 0..log_n.saturating_sub(1) {
			elts.push(power_of_three);
			power_of_three = power_of_three.wrapping_mul(power_of_three) & (m - 1);
			elts.push(neg_power_of_three);
			neg_power_of_three = neg_power_of_three.wrapping_mul(neg_power_of_three) & (m - 1);
		}
		self.create_galois_keys_from_elements(&elts)
	}

	/// Creates Galois keys enabling exactly the given rotation steps.
	pub fn create_galois_keys_from_steps(&self, steps: &[i32]) -> Result<GaloisKey> {
		let context_data = self.context.key_context_data();
		if !context_data.qualifiers().using_batching {
			return Err(Error::LogicError("encryption parameters do not support batching"));
		}
		let n = context_data.parms().get_poly_modulus_degree();
		let elts: Vec<u64> = steps
			.iter()
			.map(|s| steps_to_galois_elt(*s, n))
			.collect::<Result<_>>()?;
		self.create_galois_keys_from_elements(&elts)
	}

	/// Creates Galois keys for the given Galois elements, each of which must
	/// be odd and in [1, 2N).
	pub fn create_galois_keys_from_elements(&self, galois_elts: &[u64]) -> Result<GaloisKey> {
		if !self.context.using_keyswitching() {
			return Err(Error::LogicError("keyswitching is not supported by the context"));
		}
		let context_data = self.context.key_context_data();
		let parms = context_data.parms();
		let n = parms.get_poly_modulus_degree() as usize;
		let k = parms.get_coefficient_modulus().len();
		let power = n.trailing_zeros();

		let mut keys: Vec<Option<KeySwitchingKey>> = vec![None; n];
		for galois_elt in galois_elts {
			if galois_elt & 1 == 0 || *galois_elt >= 2 * n as u64 {
				return Err(Error::InvalidArgument("Galois element is not valid"));
			}
			let index = GaloisKey::get_index(*galois_elt);
			if keys[index].is_some() {
				continue;
			}

			// The secret key is stored in NTT form, where the automorphism
			// is a permutation of the evaluation points.
			let mut rotated = vec![0u64; k * n];
			for i in 0..k {
				apply_galois_ntt(
					&self.secret_key.data[i * n..(i + 1) * n],
					power,
					*galois_elt,
					&mut rotated[i * n..(i + 1) * n],
				);
			}
			keys[index] = Some(self.generate_one_kswitch_key(&rotated)?);
		}
		debug!(count = galois_elts.len(), "Galois keys generated");
		Ok(GaloisKey {
			keys,
			parms_id: context_data.parms_id(),
		})
	}

	/// Builds one key-switching key for the given target polynomial (in NTT
	/// form over the key-level base): element j is a zero encryption with
	/// target_j * (q_last mod q_j) folded onto RNS digit j of its first
	/// component.
	fn generate_one_kswitch_key(&self, new_key: &[u64]) -> Result<KeySwitchingKey> {
		let key_context_data = self.context.key_context_data();
		let key_parms = key_context_data.parms();
		let key_modulus = key_parms.get_coefficient_modulus();
		let n = key_parms.get_poly_modulus_degree() as usize;
		let decomp_mod_count = self
			.context
			.first_context_data()
			.parms()
			.get_coefficient_modulus()
			.len();

		let last_value = key_modulus
			.last()
			.expect("key level has at least one prime")
			.value();
		let mut data = Vec::with_capacity(decomp_mod_count);
		let mut temp = vec![0u64; n];
		for j in 0..decomp_mod_count {
			let mut key_ct = Ciphertext::new();
			encrypt_zero_symmetric(
				&self.secret_key.data,
				&self.context,
				key_context_data.parms_id(),
				true,
				false,
				&mut key_ct,
				&self.pool,
			)?;

			let q_j = &key_modulus[j];
			let factor = q_j.reduce_u128(last_value as u128);
			multiply_poly_scalar(&new_key[j * n..(j + 1) * n], factor, q_j, &mut temp);
			add_poly_assign(&mut key_ct.poly_mut(0)[j * n..(j + 1) * n], &temp, q_j);
			data.push(PublicKey {
				data: key_ct,
			});
		}
		Ok(KeySwitchingKey {
			data,
		})
	}

	fn compute_secret_key_array(&self, max_power: usize) -> Result<()> {
		let context_data = self.context.key_context_data();
		let parms = context_data.parms();
		let coeff_modulus = parms.get_coefficient_modulus();
		let k = coeff_modulus.len();
		let n = parms.get_poly_modulus_degree() as usize;
		let poly_len = k * n;

		{
			let array = self
				.secret_key_array
				.read()
				.unwrap_or_else(|e| e.into_inner());
			if array.len() >= max_power * poly_len {
				return Ok(());
			}
		}

		let mut array = self
			.secret_key_array
			.write()
			.unwrap_or_else(|e| e.into_inner());
		// Another writer may have extended the cache meanwhile.
		let old_power = array.len() / poly_len;
		if old_power >= max_power {
			return Ok(());
		}
		array.resize(max_power * poly_len, 0);
		// All powers are NTT transformed, so the next one is a dyadic
		// product of the previous with the first.
		for power in old_power..max_power {
			let (prev, next) = array.split_at_mut(power * poly_len);
			let base = &prev[..poly_len];
			let prev_poly = &prev[(power - 1) * poly_len..];
			for (i, q) in coeff_modulus.iter().enumerate() {
				dyadic_product(
					&prev_poly[i * n..(i + 1) * n],
					&base[i * n..(i + 1) * n],
					q,
					&mut next[i * n..(i + 1) * n],
				);
			}
		}
		Ok(())
	}
}

/// Maps a batching rotation step count to its Galois element 3^step (2N-1
/// for the column swap at step zero).
pub(crate) fn steps_to_galois_elt(steps: i32, poly_modulus_degree: u64) -> Result<u64> {
	let n = poly_modulus_degree;
	let m = n << 1;
	let subgroup_size = n >> 1;
	if steps == 0 {
		return Ok(m - 1);
	}
	let step_abs = steps.unsigned_abs() as u64;
	if step_abs >= subgroup_size {
		return Err(Error::InvalidArgument("rotation step count out of range"));
	}
	let exponent = if steps < 0 {
		subgroup_size - step_abs
	} else {
		step_abs
	};
	Ok(exponentiate_u64_mod(3, exponent, m))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::*;

	fn test_context() -> Context {
		let params = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D4096, &[36, 36, 37]).unwrap(),
			)
			.set_plain_modulus_u64(256)
			.build()
			.unwrap();
		Context::new(&params, false, SecurityLevel::TC128).unwrap()
	}

	#[test]
	fn can_create_and_destroy_key_generator() {
		let ctx = test_context();
		let gen = KeyGenerator::new(&ctx).unwrap();

		std::mem::drop(gen);
	}

	#[test]
	fn keys_carry_key_level_parms_id() {
		let ctx = test_context();
		let gen = KeyGenerator::new(&ctx).unwrap();

		assert_eq!(gen.secret_key().parms_id(), ctx.key_parms_id());
		assert_eq!(gen.create_public_key().parms_id(), ctx.key_parms_id());

		let relin = gen.create_relinearization_keys().unwrap();
		assert_eq!(relin.parms_id(), ctx.key_parms_id());
		assert_eq!(relin.size(), 1);
		// One pair per decomposition prime.
		assert_eq!(relin.keys[0].data.len(), 2);
	}

	#[test]
	fn secret_key_is_reusable() {
		let ctx = test_context();
		let gen = KeyGenerator::new(&ctx).unwrap();
		let sk = gen.secret_key().clone();

		let gen2 = KeyGenerator::new_from_secret_key(&ctx, &sk).unwrap();
		assert_eq!(gen2.secret_key(), &sk);
		// Fresh randomness produces a different public key for the same
		// secret.
		assert_ne!(gen.create_public_key(), gen2.create_public_key());
	}

	#[test]
	fn galois_keys_cover_requested_elements() {
		let ctx = test_context();
		let gen = KeyGenerator::new(&ctx).unwrap();

		let keys = gen.create_galois_keys_from_elements(&[3, 9, 8191]).unwrap();
		assert!(keys.has_key(3));
		assert!(keys.has_key(9));
		assert!(keys.has_key(8191));
		assert!(!keys.has_key(5));

		assert!(gen.create_galois_keys_from_elements(&[2]).is_err());
		assert!(gen.create_galois_keys_from_elements(&[8193]).is_err());
	}

	#[test]
	fn default_galois_set_is_logarithmic() {
		let ctx = test_context();
		let gen = KeyGenerator::new(&ctx).unwrap();
		let keys = gen.create_galois_keys().unwrap();
		// 2N - 1 plus powers of 3 and 3^{-1}.
		assert!(keys.has_key(8191));
		assert!(keys.has_key(3));
		let count = keys.keys.iter().filter(|k| k.is_some()).count();
		assert!(count <= 2 * 12);
	}

	#[test]
	fn step_to_galois_element_mapping() {
		assert_eq!(steps_to_galois_elt(0, 8).unwrap(), 15);
		assert_eq!(steps_to_galois_elt(1, 8).unwrap(), 3);
		assert_eq!(steps_to_galois_elt(-1, 8).unwrap(), 3u64.pow(3) % 16);
		assert!(steps_to_galois_elt(4, 8).is_err());
	}
}
