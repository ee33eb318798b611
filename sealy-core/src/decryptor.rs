use std::sync::RwLock;

use crate::ciphertext::Ciphertext;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::key_generator::SecretKey;
use crate::memory::MemoryPool;
use crate::parameters::SchemeType;
use crate::plaintext::Plaintext;
use crate::util::ntt::{inverse_ntt_negacyclic, ntt_negacyclic};
use crate::util::polyarith::{add_poly_assign, dyadic_product, multiply_poly_scalar};
use crate::util::scaling::divide_phase_by_scaling_variant;
use crate::util::uintarith::{is_greater_or_equal_uint, significant_bit_count, sub_uint};

/// Decrypts Ciphertext objects into Plaintext objects.
///
/// Constructing a Decryptor requires a Context with valid encryption
/// parameters and the secret key. The Decryptor also computes the invariant
/// noise budget of a ciphertext under the BFV scheme, a measure of how many
/// more noise-adding operations the ciphertext supports before decryption
/// fails.
pub struct Decryptor {
	context: Context,
	secret_key: SecretKey,
	// Powers of the secret, grown lazily for larger ciphertext sizes.
	secret_key_array: RwLock<Vec<u64>>,
	pool: MemoryPool,
}

impl Decryptor {
	/// Creates a Decryptor instance initialized with the specified Context
	/// and secret key.
	pub fn new(context: &Context, secret_key: &SecretKey) -> Result<Self> {
		if secret_key.parms_id() != context.key_parms_id() {
			return Err(Error::InvalidArgument(
				"secret key is not valid for encryption parameters",
			));
		}
		Ok(Self {
			context: context.clone(),
			secret_key: secret_key.clone(),
			secret_key_array: RwLock::new(secret_key.data().to_vec()),
			pool: MemoryPool::global().clone(),
		})
	}

	/// Decrypts a ciphertext.
	pub fn decrypt(&self, encrypted: &Ciphertext) -> Result<Plaintext> {
		let context_data = self
			.context
			.get_context_data(&encrypted.parms_id())
			.ok_or(Error::InvalidArgument("encrypted is not valid for encryption parameters"))?;
		if encrypted.size() < 2 {
			return Err(Error::InvalidArgument("encrypted size must be at least 2"));
		}
		let parms = context_data.parms();
		match parms.get_scheme() {
			SchemeType::Bfv => {
				if encrypted.is_ntt_form() {
					return Err(Error::InvalidArgument("BFV encrypted cannot be in NTT form"));
				}
				let n = parms.get_poly_modulus_degree() as usize;
				let k = parms.get_coefficient_modulus().len();
				let mut phase = self.pool.allocate(k * n);
				self.dot_product_with_secret_powers(encrypted, &context_data, &mut phase)?;

				// Scale the phase by t/q with the gamma correction to
				// recover the plaintext coefficients.
				let mut destination = Plaintext::new();
				destination.resize(n);
				divide_phase_by_scaling_variant(
					&phase,
					&context_data,
					destination.data_mut(),
					&self.pool,
				)?;
				let significant = destination.significant_coeff_count().max(1);
				destination.resize(significant);
				Ok(destination)
			}
			SchemeType::Ckks => {
				if !encrypted.is_ntt_form() {
					return Err(Error::InvalidArgument("CKKS encrypted must be in NTT form"));
				}
				let n = parms.get_poly_modulus_degree() as usize;
				let k = parms.get_coefficient_modulus().len();
				let mut phase = self.pool.allocate(k * n);
				self.dot_product_with_secret_powers(encrypted, &context_data, &mut phase)?;

				let mut destination = Plaintext::from_coefficients(phase.to_vec());
				destination.set_parms_id(encrypted.parms_id());
				destination.set_ntt_form(true);
				destination.set_scale(encrypted.scale());
				Ok(destination)
			}
			SchemeType::None => Err(Error::Unsupported("unsupported scheme")),
		}
	}

	/// Computes the invariant noise budget (in bits) of a BFV ciphertext:
	/// floor(log2(q/t) - log2(||phase * t/q - round(...)||_inf * t)). The
	/// ciphertext decrypts correctly while the budget is positive.
	pub fn invariant_noise_budget(&self, encrypted: &Ciphertext) -> Result<u32> {
		let context_data = self
			.context
			.get_context_data(&encrypted.parms_id())
			.ok_or(Error::InvalidArgument("encrypted is not valid for encryption parameters"))?;
		let parms = context_data.parms();
		if parms.get_scheme() != SchemeType::Bfv {
			return Err(Error::Unsupported(
				"invariant noise budget is only defined for the BFV scheme",
			));
		}
		if encrypted.is_ntt_form() {
			return Err(Error::InvalidArgument("BFV encrypted cannot be in NTT form"));
		}
		if encrypted.size() < 2 {
			return Err(Error::InvalidArgument("encrypted size must be at least 2"));
		}

		let coeff_modulus = parms.get_coefficient_modulus();
		let n = parms.get_poly_modulus_degree() as usize;
		let k = coeff_modulus.len();
		let t = parms.get_plain_modulus().value();

		let mut phase = self.pool.allocate(k * n);
		self.dot_product_with_secret_powers(encrypted, &context_data, &mut phase)?;

		// t * phase mod q is q times the invariant noise.
		for (i, q) in coeff_modulus.iter().enumerate() {
			let scaled = phase[i * n..(i + 1) * n].to_vec();
			multiply_poly_scalar(&scaled, t, q, &mut phase[i * n..(i + 1) * n]);
		}

		// Compose each coefficient and take the centered infinity norm.
		let base_converter = context_data.base_converter();
		let total = context_data.total_coeff_modulus();
		let mut half = vec![0u64; k];
		for (i, w) in total.iter().enumerate() {
			half[i] = (w >> 1)
				| total
					.get(i + 1)
					.map(|next| next << 63)
					.unwrap_or(0);
		}

		let mut norm = vec![0u64; k];
		let mut value = vec![0u64; k];
		let mut residues = vec![0u64; k];
		let mut centered = vec![0u64; k];
		for coeff in 0..n {
			for i in 0..k {
				residues[i] = phase[i * n + coeff];
			}
			base_converter.compose_coeff(&residues, &mut value);
			if is_greater_or_equal_uint(&value, &half) {
				sub_uint(total, &value, &mut centered);
			} else {
				centered.copy_from_slice(&value);
			}
			if is_greater_or_equal_uint(&centered, &norm) {
				norm.copy_from_slice(&centered);
			}
		}

		let total_bits = context_data.total_coeff_modulus_bit_count();
		let norm_bits = significant_bit_count(&norm);
		Ok(total_bits.saturating_sub(norm_bits + 1))
	}

	/// Evaluates the ciphertext polynomial at the secret key:
	/// phase = sum(c_i * s^i) mod q, in the representation the ciphertext
	/// uses (coefficient domain for BFV, NTT domain for CKKS).
	fn dot_product_with_secret_powers(
		&self,
		encrypted: &Ciphertext,
		context_data: &crate::context_data::ContextData,
		phase: &mut [u64],
	) -> Result<()> {
		let parms = context_data.parms();
		let coeff_modulus = parms.get_coefficient_modulus();
		let n = parms.get_poly_modulus_degree() as usize;
		let k = coeff_modulus.len();
		let key_k = self
			.context
			.key_context_data()
			.parms()
			.get_coefficient_modulus()
			.len();
		let size = encrypted.size();
		let is_ntt_form = encrypted.is_ntt_form();
		let ntt_tables = context_data.ntt_tables();

		self.compute_secret_key_array(size - 1)?;
		let array = self
			.secret_key_array
			.read()
			.unwrap_or_else(|e| e.into_inner());

		// Accumulate sum(c_i * s^i) for i >= 1 in the NTT domain.
		let mut acc = self.pool.allocate(k * n);
		let mut component = self.pool.allocate(n);
		for index in 1..size {
			let power = &array[(index - 1) * key_k * n..];
			for (i, q) in coeff_modulus.iter().enumerate() {
				let mut product = self.pool.allocate(n);
				if is_ntt_form {
					dyadic_product(
						&encrypted.poly(index)[i * n..(i + 1) * n],
						&power[i * n..(i + 1) * n],
						q,
						&mut product,
					);
				} else {
					component.copy_from_slice(&encrypted.poly(index)[i * n..(i + 1) * n]);
					ntt_negacyclic(&mut component, &ntt_tables[i]);
					dyadic_product(&component, &power[i * n..(i + 1) * n], q, &mut product);
				}
				add_poly_assign(&mut acc[i * n..(i + 1) * n], &product, q);
			}
		}

		// Leave the NTT domain for BFV, then add c_0.
		for (i, q) in coeff_modulus.iter().enumerate() {
			if !is_ntt_form {
				inverse_ntt_negacyclic(&mut acc[i * n..(i + 1) * n], &ntt_tables[i]);
			}
			phase[i * n..(i + 1) * n].copy_from_slice(&acc[i * n..(i + 1) * n]);
			add_poly_assign(
				&mut phase[i * n..(i + 1) * n],
				&encrypted.poly(0)[i * n..(i + 1) * n],
				q,
			);
		}
		Ok(())
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
		let old_power = array.len() / poly_len;
		if old_power >= max_power {
			return Ok(());
		}
		array.resize(max_power * poly_len, 0);
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

#[cfg(test)]
mod tests {
	use crate::*;

	fn mk_ctx() -> Context {
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
	fn can_create_and_destroy_decryptor() {
		let ctx = mk_ctx();
		let gen = KeyGenerator::new(&ctx).unwrap();

		let secret_key = gen.secret_key();
		let decryptor = Decryptor::new(&ctx, secret_key);

		std::mem::drop(decryptor);
	}

	#[test]
	fn can_encrypt_and_decrypt() {
		let ctx = mk_ctx();
		let gen = KeyGenerator::new(&ctx).unwrap();

		let public_key = gen.create_public_key();
		let secret_key = gen.secret_key();

		let encryptor =
			Encryptor::with_public_and_secret_key(&ctx, &public_key, secret_key).unwrap();
		let decryptor = Decryptor::new(&ctx, secret_key).unwrap();

		let plaintext = Plaintext::from_hex_string("2Ax^5 + 1x^1 + 7").unwrap();

		// asymmetric test
		let ciphertext = encryptor.encrypt(&plaintext).unwrap();
		let decrypted = decryptor.decrypt(&ciphertext).unwrap();
		assert_eq!(decrypted, plaintext);

		// symmetric test
		let ciphertext = encryptor.encrypt_symmetric(&plaintext).unwrap();
		let decrypted = decryptor.decrypt(&ciphertext).unwrap();
		assert_eq!(decrypted, plaintext);
	}

	#[test]
	fn decrypts_every_residue_class() {
		let ctx = mk_ctx();
		let gen = KeyGenerator::new(&ctx).unwrap();
		let encryptor = Encryptor::with_secret_key(&ctx, gen.secret_key()).unwrap();
		let decryptor = Decryptor::new(&ctx, gen.secret_key()).unwrap();

		// Both halves of the plaintext range, including t - 1.
		let plaintext = Plaintext::from_coefficients(vec![0, 1, 127, 128, 200, 255]);
		let ciphertext = encryptor.encrypt_symmetric(&plaintext).unwrap();
		let decrypted = decryptor.decrypt(&ciphertext).unwrap();
		assert_eq!(decrypted, plaintext);
	}

	#[test]
	fn fresh_ciphertext_has_noise_budget() {
		let ctx = mk_ctx();
		let gen = KeyGenerator::new(&ctx).unwrap();
		let encryptor = Encryptor::with_secret_key(&ctx, gen.secret_key()).unwrap();
		let decryptor = Decryptor::new(&ctx, gen.secret_key()).unwrap();

		let plaintext = Plaintext::from_hex_string("6").unwrap();
		let ciphertext = encryptor.encrypt_symmetric(&plaintext).unwrap();
		let budget = decryptor.invariant_noise_budget(&ciphertext).unwrap();
		// A fresh encryption at ~72 data bits has substantial budget left.
		assert!(budget > 20);
		assert!(budget < 72);
	}
}
