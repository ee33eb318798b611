use std::marker::PhantomData;

use crate::ciphertext::Ciphertext;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::key_generator::{PublicKey, SecretKey};
use crate::memory::MemoryPool;
use crate::parameters::{ParmsId, SchemeType};
use crate::plaintext::Plaintext;
use crate::util::polyarith::add_poly_assign;
use crate::util::rlwe::{encrypt_zero_asymmetric, encrypt_zero_symmetric};
use crate::util::scaling::multiply_add_plain_with_scaling_variant;

mod sealed {
	pub trait Sealed {}
	impl Sealed for super::Sym {}
	impl Sealed for super::Asym {}
	impl Sealed for super::SymAsym {}
}

/// Marker traits to signify what types of encryptions are supported
pub mod marker {
	/// Supports symmetric encryptions.
	pub trait Sym: super::sealed::Sealed {}
	/// Supports asymmetric encryptions.
	pub trait Asym: super::sealed::Sealed {}
}

/// Symmetric encryptions marker
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Sym;
impl marker::Sym for Sym {}

/// Asymmetric encryptions marker
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Asym;
impl marker::Asym for Asym {}

/// Both symmetric and asymmetric encryptions marker
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SymAsym;
impl marker::Sym for SymAsym {}
impl marker::Asym for SymAsym {}

/// Encrypts Plaintext objects into Ciphertext objects.
///
/// Constructing an Encryptor requires a Context with valid encryption
/// parameters, the public key and/or the secret key. If an Encryptor is
/// given a secret key, it supports symmetric-key encryption; if it is given
/// a public key, it supports asymmetric-key encryption.
///
/// NTT form
/// When using the BFV scheme, all plaintexts and ciphertexts remain by
/// default in the usual coefficient representation, i.e. not in NTT form.
/// When using the CKKS scheme, all plaintexts and ciphertexts remain by
/// default in NTT form. Decryption requires the input ciphertexts to be in
/// the default NTT form and fails otherwise.
pub struct Encryptor<T = ()> {
	context: Context,
	public_key: Option<PublicKey>,
	secret_key: Option<SecretKey>,
	pool: MemoryPool,
	_marker: PhantomData<T>,
}

/// An encryptor capable of symmetric encryptions.
pub type SymmetricEncryptor = Encryptor<Sym>;

/// An encryptor capable of asymmetric encryptions.
pub type AsymmetricEncryptor = Encryptor<Asym>;

/// An encryptor capable of both symmetric and asymmetric encryptions.
pub type SymAsymEncryptor = Encryptor<SymAsym>;

impl Encryptor {
	/// Creates an Encryptor instance initialized with the specified
	/// Context and public key.
	pub fn with_public_key(context: &Context, public_key: &PublicKey) -> Result<AsymmetricEncryptor> {
		if public_key.parms_id() != context.key_parms_id() {
			return Err(Error::InvalidArgument(
				"public key is not valid for encryption parameters",
			));
		}
		Ok(Encryptor {
			context: context.clone(),
			public_key: Some(public_key.clone()),
			secret_key: None,
			pool: MemoryPool::global().clone(),
			_marker: PhantomData,
		})
	}

	/// Creates an Encryptor instance initialized with the specified
	/// Context and secret key.
	pub fn with_secret_key(context: &Context, secret_key: &SecretKey) -> Result<SymmetricEncryptor> {
		if secret_key.parms_id() != context.key_parms_id() {
			return Err(Error::InvalidArgument(
				"secret key is not valid for encryption parameters",
			));
		}
		Ok(Encryptor {
			context: context.clone(),
			public_key: None,
			secret_key: Some(secret_key.clone()),
			pool: MemoryPool::global().clone(),
			_marker: PhantomData,
		})
	}

	/// Creates an Encryptor capable of both symmetric and asymmetric
	/// encryption.
	pub fn with_public_and_secret_key(
		context: &Context,
		public_key: &PublicKey,
		secret_key: &SecretKey,
	) -> Result<SymAsymEncryptor> {
		if public_key.parms_id() != context.key_parms_id()
			|| secret_key.parms_id() != context.key_parms_id()
		{
			return Err(Error::InvalidArgument(
				"keys are not valid for encryption parameters",
			));
		}
		Ok(Encryptor {
			context: context.clone(),
			public_key: Some(public_key.clone()),
			secret_key: Some(secret_key.clone()),
			pool: MemoryPool::global().clone(),
			_marker: PhantomData,
		})
	}
}

impl<T: marker::Asym> Encryptor<T> {
	/// Encrypts a plaintext with the public key and returns the ciphertext
	/// as a serializable object.
	pub fn encrypt(&self, plain: &Plaintext) -> Result<Ciphertext> {
		self.encrypt_internal(plain, true, false)
	}
}

impl<T: marker::Sym> Encryptor<T> {
	/// Encrypts a plaintext with the secret key and returns the ciphertext.
	pub fn encrypt_symmetric(&self, plain: &Plaintext) -> Result<Ciphertext> {
		self.encrypt_internal(plain, false, false)
	}

	/// Encrypts a plaintext with the secret key, deriving the uniform
	/// component from a dedicated seeded generator. The returned ciphertext
	/// carries the seed marker in place of c_1 and cannot be operated on
	/// until a loader re-derives c_1 from the embedded seed.
	pub fn encrypt_symmetric_save_seed(&self, plain: &Plaintext) -> Result<Ciphertext> {
		self.encrypt_internal(plain, false, true)
	}
}

impl<T> Encryptor<T> {
	fn encrypt_zero_internal(
		&self,
		parms_id: ParmsId,
		is_asymmetric: bool,
		save_seed: bool,
		destination: &mut Ciphertext,
	) -> Result<()> {
		let context_data = self
			.context
			.get_context_data(&parms_id)
			.ok_or(Error::InvalidArgument("parms_id is not valid for encryption parameters"))?;
		let is_ntt_form = match context_data.parms().get_scheme() {
			SchemeType::Ckks => true,
			SchemeType::Bfv => false,
			SchemeType::None => return Err(Error::Unsupported("unsupported scheme")),
		};

		if is_asymmetric {
			let public_key = self
				.public_key
				.as_ref()
				.ok_or(Error::LogicError("public key is not set"))?;
			if let Some(prev_parms_id) = context_data.prev_parms_id() {
				// Encrypt at the previous (larger) level, then round the
				// last prime away; the rounding shrinks the fresh noise.
				let prev_context_data = self
					.context
					.get_context_data(&prev_parms_id)
					.ok_or(Error::LogicError("chain link is broken"))?;
				let mut temp = Ciphertext::new();
				encrypt_zero_asymmetric(
					public_key.data(),
					&self.context,
					prev_parms_id,
					is_ntt_form,
					&mut temp,
					&self.pool,
				)?;

				let base_converter = prev_context_data.base_converter();
				let n = prev_context_data.parms().get_poly_modulus_degree() as usize;
				let next_k = context_data.parms().get_coefficient_modulus().len();
				destination.resize(&self.context, parms_id, 2)?;
				for j in 0..2 {
					if is_ntt_form {
						base_converter.round_last_coeff_modulus_ntt_inplace(
							temp.poly_mut(j),
							prev_context_data.ntt_tables(),
							&self.pool,
						);
					} else {
						base_converter.round_last_coeff_modulus_inplace(temp.poly_mut(j), &self.pool);
					}
					destination
						.poly_mut(j)
						.copy_from_slice(&temp.poly(j)[..next_k * n]);
				}
				destination.set_ntt_form(is_ntt_form);
				destination.set_scale(temp.scale());
			} else {
				encrypt_zero_asymmetric(
					public_key.data(),
					&self.context,
					parms_id,
					is_ntt_form,
					destination,
					&self.pool,
				)?;
			}
		} else {
			let secret_key = self
				.secret_key
				.as_ref()
				.ok_or(Error::LogicError("secret key is not set"))?;
			encrypt_zero_symmetric(
				secret_key.data(),
				&self.context,
				parms_id,
				is_ntt_form,
				save_seed,
				destination,
				&self.pool,
			)?;
		}
		Ok(())
	}

	fn encrypt_internal(
		&self,
		plain: &Plaintext,
		is_asymmetric: bool,
		save_seed: bool,
	) -> Result<Ciphertext> {
		let scheme = self
			.context
			.key_context_data()
			.parms()
			.get_scheme();
		let mut destination = Ciphertext::new();
		match scheme {
			SchemeType::Bfv => {
				if plain.is_ntt_form() {
					return Err(Error::InvalidArgument("plain cannot be in NTT form"));
				}
				let first_context_data = self.context.first_context_data();
				let parms = first_context_data.parms();
				if plain.len() > parms.get_poly_modulus_degree() as usize {
					return Err(Error::InvalidArgument("plain is not valid for encryption parameters"));
				}
				let t = parms.get_plain_modulus().value();
				if plain.data().iter().any(|c| *c >= t) {
					return Err(Error::InvalidArgument(
						"plain coefficients must be smaller than the plain modulus",
					));
				}

				self.encrypt_zero_internal(
					self.context.first_parms_id(),
					is_asymmetric,
					save_seed,
					&mut destination,
				)?;

				// Multiply plain by Delta and fold the result into the c_0
				// term.
				multiply_add_plain_with_scaling_variant(
					plain,
					&first_context_data,
					destination.poly_mut(0),
				);
			}
			SchemeType::Ckks => {
				if !plain.is_ntt_form() {
					return Err(Error::InvalidArgument("plain must be in NTT form"));
				}
				let context_data = self
					.context
					.get_context_data(&plain.parms_id())
					.ok_or(Error::InvalidArgument("plain is not valid for encryption parameters"))?;
				let parms = context_data.parms();
				let coeff_modulus = parms.get_coefficient_modulus();
				let n = parms.get_poly_modulus_degree() as usize;
				if plain.len() != coeff_modulus.len() * n {
					return Err(Error::InvalidArgument("plain is not valid for encryption parameters"));
				}

				self.encrypt_zero_internal(
					plain.parms_id(),
					is_asymmetric,
					save_seed,
					&mut destination,
				)?;

				// The plaintext is added directly into the c_0 term.
				for (i, q) in coeff_modulus.iter().enumerate() {
					add_poly_assign(
						&mut destination.poly_mut(0)[i * n..(i + 1) * n],
						&plain.data()[i * n..(i + 1) * n],
						q,
					);
				}
				destination.set_scale(plain.scale());
			}
			SchemeType::None => return Err(Error::Unsupported("unsupported scheme")),
		}
		Ok(destination)
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
	fn can_create_encryptor_from_public_key() {
		let ctx = mk_ctx();
		let gen = KeyGenerator::new(&ctx).unwrap();
		let public_key = gen.create_public_key();

		let encryptor = Encryptor::with_public_key(&ctx, &public_key).unwrap();

		std::mem::drop(encryptor);
	}

	#[test]
	fn can_create_encryptor_from_secret_key() {
		let ctx = mk_ctx();
		let gen = KeyGenerator::new(&ctx).unwrap();
		let secret_key = gen.secret_key();

		let encryptor = Encryptor::with_secret_key(&ctx, secret_key).unwrap();

		std::mem::drop(encryptor);
	}

	#[test]
	fn fresh_ciphertexts_live_at_the_first_level() {
		let ctx = mk_ctx();
		let gen = KeyGenerator::new(&ctx).unwrap();
		let encryptor =
			Encryptor::with_public_and_secret_key(&ctx, &gen.create_public_key(), gen.secret_key())
				.unwrap();

		let plaintext = Plaintext::from_hex_string("6").unwrap();
		let ciphertext = encryptor.encrypt(&plaintext).unwrap();
		assert_eq!(ciphertext.size(), 2);
		assert_eq!(ciphertext.parms_id(), ctx.first_parms_id());
		assert!(!ciphertext.is_ntt_form());
		assert!(!ciphertext.is_transparent());

		let symmetric = encryptor.encrypt_symmetric(&plaintext).unwrap();
		assert_eq!(symmetric.parms_id(), ctx.first_parms_id());
	}

	#[test]
	fn rejects_oversized_plaintext_coefficients() {
		let ctx = mk_ctx();
		let gen = KeyGenerator::new(&ctx).unwrap();
		let encryptor = Encryptor::with_public_key(&ctx, &gen.create_public_key()).unwrap();

		let plaintext = Plaintext::from_coefficients(vec![256]);
		assert!(matches!(
			encryptor.encrypt(&plaintext),
			Err(Error::InvalidArgument(_))
		));
	}

	#[test]
	fn save_seed_marks_c1() {
		let ctx = mk_ctx();
		let gen = KeyGenerator::new(&ctx).unwrap();
		let encryptor = Encryptor::with_secret_key(&ctx, gen.secret_key()).unwrap();

		let plaintext = Plaintext::from_hex_string("6").unwrap();
		let ciphertext = encryptor.encrypt_symmetric_save_seed(&plaintext).unwrap();
		assert_eq!(ciphertext.poly(1)[0], crate::util::rlwe::SEED_MARKER);
	}
}
