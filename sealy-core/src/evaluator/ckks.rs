use crate::evaluator::base::EvaluatorBase;
use crate::{
	Ciphertext, Context, Evaluator, GaloisKey, ParmsId, Plaintext, RelinearizationKey, Result,
};

/// An evaluator that contains additional operations specific to the CKKS
/// scheme: rescaling, and rotations that do not require a batching-enabled
/// plaintext modulus.
pub struct CKKSEvaluator(EvaluatorBase);

impl std::ops::Deref for CKKSEvaluator {
	type Target = EvaluatorBase;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl CKKSEvaluator {
	/// Creates a CKKSEvaluator instance initialized with the specified
	/// Context.
	///  * `ctx` - The context.
	pub fn new(ctx: &Context) -> Result<CKKSEvaluator> {
		Ok(CKKSEvaluator(EvaluatorBase::new(ctx)?))
	}

	/// Divides the ciphertext by the last prime of the chain with rounding
	/// and scales accordingly, trading modulus size for noise headroom.
	pub fn rescale_to_next(&self, a: &Ciphertext) -> Result<Ciphertext> {
		self.0.rescale_to_next(a)
	}

	/// Rescales repeatedly until the ciphertext reaches the target parameter
	/// set.
	pub fn rescale_to(&self, a: &Ciphertext, parms_id: ParmsId) -> Result<Ciphertext> {
		let mut result = a.clone();
		self.0.rescale_to_inplace(&mut result, parms_id)?;
		Ok(result)
	}

	/// As [`CKKSEvaluator::rescale_to`], in place.
	pub fn rescale_to_inplace(&self, a: &mut Ciphertext, parms_id: ParmsId) -> Result<()> {
		self.0.rescale_to_inplace(a, parms_id)
	}

	/// Applies the Galois automorphism X -> X^galois_elt and key-switches
	/// back to the original secret.
	pub fn apply_galois(
		&self,
		a: &Ciphertext,
		galois_elt: u64,
		galois_keys: &GaloisKey,
	) -> Result<Ciphertext> {
		self.0.apply_galois(a, galois_elt, galois_keys)
	}

	/// Rotates the encrypted slot vector cyclically by `steps`.
	pub fn rotate_vector(
		&self,
		a: &Ciphertext,
		steps: i32,
		galois_keys: &GaloisKey,
	) -> Result<Ciphertext> {
		let mut result = a.clone();
		self.0.rotate_vector_internal(&mut result, steps, galois_keys)?;
		Ok(result)
	}

	/// Conjugates the encrypted slot values (the Galois element 2N - 1).
	pub fn complex_conjugate(&self, a: &Ciphertext, galois_keys: &GaloisKey) -> Result<Ciphertext> {
		let context_data = self.0.context().first_context_data();
		let m = 2 * context_data.parms().get_poly_modulus_degree();
		self.0.apply_galois(a, m - 1, galois_keys)
	}
}

impl Evaluator for CKKSEvaluator {
	type Plaintext = Plaintext;
	type Ciphertext = Ciphertext;

	fn negate_inplace(&self, a: &mut Ciphertext) -> Result<()> {
		self.0.negate_inplace(a)
	}

	fn negate(&self, a: &Ciphertext) -> Result<Ciphertext> {
		self.0.negate(a)
	}

	fn add_inplace(&self, a: &mut Ciphertext, b: &Ciphertext) -> Result<()> {
		self.0.add_inplace(a, b)
	}

	fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
		self.0.add(a, b)
	}

	fn add_many(&self, a: &[Ciphertext]) -> Result<Ciphertext> {
		self.0.add_many(a)
	}

	fn multiply_many(
		&self,
		a: &[Ciphertext],
		relin_keys: &RelinearizationKey,
	) -> Result<Ciphertext> {
		self.0.multiply_many(a, relin_keys)
	}

	fn sub_inplace(&self, a: &mut Ciphertext, b: &Ciphertext) -> Result<()> {
		self.0.sub_inplace(a, b)
	}

	fn sub(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
		self.0.sub(a, b)
	}

	fn multiply_inplace(&self, a: &mut Ciphertext, b: &Ciphertext) -> Result<()> {
		self.0.multiply_inplace(a, b)
	}

	fn multiply(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
		self.0.multiply(a, b)
	}

	fn square_inplace(&self, a: &mut Ciphertext) -> Result<()> {
		self.0.square_inplace(a)
	}

	fn square(&self, a: &Ciphertext) -> Result<Ciphertext> {
		self.0.square(a)
	}

	fn mod_switch_to_next(&self, a: &Ciphertext) -> Result<Ciphertext> {
		self.0.mod_switch_to_next(a)
	}

	fn mod_switch_to_next_inplace(&self, a: &mut Ciphertext) -> Result<()> {
		self.0.mod_switch_to_next_inplace(a)
	}

	fn mod_switch_to_next_plaintext(&self, a: &Plaintext) -> Result<Plaintext> {
		self.0.mod_switch_to_next_plaintext(a)
	}

	fn mod_switch_to_next_inplace_plaintext(&self, a: &mut Plaintext) -> Result<()> {
		self.0.mod_switch_to_next_inplace_plaintext(a)
	}

	fn exponentiate(
		&self,
		a: &Ciphertext,
		exponent: u64,
		relin_keys: &RelinearizationKey,
	) -> Result<Ciphertext> {
		let mut result = a.clone();
		self.0.exponentiate_inplace(&mut result, exponent, relin_keys)?;
		Ok(result)
	}

	fn exponentiate_inplace(
		&self,
		a: &mut Ciphertext,
		exponent: u64,
		relin_keys: &RelinearizationKey,
	) -> Result<()> {
		self.0.exponentiate_inplace(a, exponent, relin_keys)
	}

	fn add_plain(&self, a: &Ciphertext, b: &Plaintext) -> Result<Ciphertext> {
		self.0.add_plain(a, b)
	}

	fn add_plain_inplace(&self, a: &mut Ciphertext, b: &Plaintext) -> Result<()> {
		self.0.add_plain_inplace(a, b)
	}

	fn sub_plain(&self, a: &Ciphertext, b: &Plaintext) -> Result<Ciphertext> {
		self.0.sub_plain(a, b)
	}

	fn sub_plain_inplace(&self, a: &mut Ciphertext, b: &Plaintext) -> Result<()> {
		self.0.sub_plain_inplace(a, b)
	}

	fn multiply_plain(&self, a: &Ciphertext, b: &Plaintext) -> Result<Ciphertext> {
		self.0.multiply_plain(a, b)
	}

	fn multiply_plain_inplace(&self, a: &mut Ciphertext, b: &Plaintext) -> Result<()> {
		self.0.multiply_plain_inplace(a, b)
	}

	fn relinearize_inplace(&self, a: &mut Ciphertext, relin_keys: &RelinearizationKey) -> Result<()> {
		self.0.relinearize_inplace(a, relin_keys)
	}

	fn relinearize(&self, a: &Ciphertext, relin_keys: &RelinearizationKey) -> Result<Ciphertext> {
		self.0.relinearize(a, relin_keys)
	}

	fn rotate_rows(&self, a: &Ciphertext, steps: i32, galois_keys: &GaloisKey) -> Result<Ciphertext> {
		self.rotate_vector(a, steps, galois_keys)
	}

	fn rotate_rows_inplace(
		&self,
		a: &mut Ciphertext,
		steps: i32,
		galois_keys: &GaloisKey,
	) -> Result<()> {
		self.0.rotate_vector_internal(a, steps, galois_keys)
	}

	fn rotate_columns(&self, a: &Ciphertext, galois_keys: &GaloisKey) -> Result<Ciphertext> {
		self.complex_conjugate(a, galois_keys)
	}

	fn rotate_columns_inplace(&self, a: &mut Ciphertext, galois_keys: &GaloisKey) -> Result<()> {
		*a = self.complex_conjugate(a, galois_keys)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use crate::*;

	// Builds a CKKS plaintext holding the constant `value` in every slot:
	// the polynomial round(value * scale) + 0x + ..., lifted to NTT form at
	// the first data level.
	fn encode_constant(ctx: &Context, value: f64, scale: f64) -> Plaintext {
		let context_data = ctx.first_context_data();
		let parms = context_data.parms();
		let n = parms.get_poly_modulus_degree() as usize;
		let coeff_modulus = parms.get_coefficient_modulus();

		let scaled = (value * scale).round() as i64;
		let mut data = vec![0u64; coeff_modulus.len() * n];
		for (i, q) in coeff_modulus.iter().enumerate() {
			data[i * n] = if scaled >= 0 {
				(scaled as u64) % q.value()
			} else {
				q.value() - (scaled.unsigned_abs() % q.value())
			};
		}
		for (i, tables) in context_data.ntt_tables().iter().enumerate() {
			crate::util::ntt::ntt_negacyclic(&mut data[i * n..(i + 1) * n], tables);
		}
		let mut plain = Plaintext::from_coefficients(data);
		plain.set_parms_id(ctx.first_parms_id());
		plain.set_ntt_form(true);
		plain.set_scale(scale);
		plain
	}

	// Reads the constant slot value back out of a decrypted plaintext.
	fn decode_constant(ctx: &Context, plain: &Plaintext) -> f64 {
		let context_data = ctx.get_context_data(&plain.parms_id()).unwrap();
		let parms = context_data.parms();
		let n = parms.get_poly_modulus_degree() as usize;
		let q0 = parms.get_coefficient_modulus()[0];

		let mut poly = plain.data()[..n].to_vec();
		crate::util::ntt::inverse_ntt_negacyclic(&mut poly, &context_data.ntt_tables()[0]);
		let c = poly[0];
		let centered = if c > q0.value() / 2 {
			-((q0.value() - c) as f64)
		} else {
			c as f64
		};
		centered / plain.scale()
	}

	fn setup() -> (Context, KeyGenerator) {
		let params = CkksEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D64)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build_degree(64, &[40, 40, 40, 40]).unwrap(),
			)
			.build()
			.unwrap();
		let ctx = Context::new_insecure(&params, true).unwrap();
		let gen = KeyGenerator::new(&ctx).unwrap();
		(ctx, gen)
	}

	#[test]
	fn approximate_encrypt_decrypt_roundtrip() {
		// All-ones vector at scale 2^16: every decoded component stays
		// within 0.5 of 1.0.
		let (ctx, gen) = setup();
		let encryptor =
			Encryptor::with_public_and_secret_key(&ctx, &gen.create_public_key(), gen.secret_key())
				.unwrap();
		let decryptor = Decryptor::new(&ctx, gen.secret_key()).unwrap();

		let scale = 2.0f64.powi(16);
		let plain = encode_constant(&ctx, 1.0, scale);
		let ct = encryptor.encrypt(&plain).unwrap();
		assert!(ct.is_ntt_form());

		let decrypted = decryptor.decrypt(&ct).unwrap();
		assert!(decrypted.is_ntt_form());
		let value = decode_constant(&ctx, &decrypted);
		assert!((value - 1.0).abs() < 0.5, "decoded {}", value);
	}

	#[test]
	fn addition_is_approximate() {
		let (ctx, gen) = setup();
		let encryptor = Encryptor::with_secret_key(&ctx, gen.secret_key()).unwrap();
		let decryptor = Decryptor::new(&ctx, gen.secret_key()).unwrap();
		let evaluator = CKKSEvaluator::new(&ctx).unwrap();

		let scale = 2.0f64.powi(30);
		let a = encryptor.encrypt_symmetric(&encode_constant(&ctx, 2.5, scale)).unwrap();
		let b = encryptor.encrypt_symmetric(&encode_constant(&ctx, 1.25, scale)).unwrap();
		let sum = evaluator.add(&a, &b).unwrap();
		let value = decode_constant(&ctx, &decryptor.decrypt(&sum).unwrap());
		assert!((value - 3.75).abs() < 0.01, "decoded {}", value);
	}

	#[test]
	fn multiplication_multiplies_scales_and_rescales() {
		let (ctx, gen) = setup();
		let encryptor = Encryptor::with_secret_key(&ctx, gen.secret_key()).unwrap();
		let decryptor = Decryptor::new(&ctx, gen.secret_key()).unwrap();
		let evaluator = CKKSEvaluator::new(&ctx).unwrap();
		let relin_keys = gen.create_relinearization_keys().unwrap();

		let scale = 2.0f64.powi(30);
		let a = encryptor.encrypt_symmetric(&encode_constant(&ctx, 3.0, scale)).unwrap();
		let b = encryptor.encrypt_symmetric(&encode_constant(&ctx, 2.0, scale)).unwrap();

		let mut product = evaluator.multiply(&a, &b).unwrap();
		assert_eq!(product.size(), 3);
		assert!((product.scale() - scale * scale).abs() < 1.0);
		evaluator.relinearize_inplace(&mut product, &relin_keys).unwrap();

		let rescaled = evaluator.rescale_to_next(&product).unwrap();
		let last = ctx
			.first_context_data()
			.parms()
			.get_coefficient_modulus()
			.last()
			.unwrap()
			.value() as f64;
		assert!((rescaled.scale() - scale * scale / last).abs() < 1.0);

		let value = decode_constant(&ctx, &decryptor.decrypt(&rescaled).unwrap());
		assert!((value - 6.0).abs() < 0.01, "decoded {}", value);
	}

	#[test]
	fn mod_switch_drops_prime_and_divides_scale() {
		let (ctx, gen) = setup();
		let encryptor = Encryptor::with_secret_key(&ctx, gen.secret_key()).unwrap();
		let evaluator = CKKSEvaluator::new(&ctx).unwrap();

		let scale = 2.0f64.powi(50);
		let ct = encryptor.encrypt_symmetric(&encode_constant(&ctx, 1.0, scale)).unwrap();
		let k = ct.coeff_mod_count();
		let last = ctx
			.first_context_data()
			.parms()
			.get_coefficient_modulus()
			.last()
			.unwrap()
			.value() as f64;

		let switched = evaluator.mod_switch_to_next(&ct).unwrap();
		assert_eq!(switched.coeff_mod_count(), k - 1);
		assert!((switched.scale() - scale / last).abs() / switched.scale() < 1e-10);
		assert!(switched.is_ntt_form());
	}

	#[test]
	fn scale_overflow_is_rejected() {
		let (ctx, gen) = setup();
		let encryptor = Encryptor::with_secret_key(&ctx, gen.secret_key()).unwrap();
		let evaluator = CKKSEvaluator::new(&ctx).unwrap();

		// Two 60-bit scales multiply past the 120-bit data modulus.
		let scale = 2.0f64.powi(60);
		let a = encryptor.encrypt_symmetric(&encode_constant(&ctx, 1.0, scale)).unwrap();
		let b = encryptor.encrypt_symmetric(&encode_constant(&ctx, 1.0, scale)).unwrap();
		assert!(matches!(
			evaluator.multiply(&a, &b),
			Err(Error::InvalidArgument(_))
		));
	}

	#[test]
	fn rescale_is_rejected_for_bfv() {
		let params = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D4096, &[36, 36, 37]).unwrap(),
			)
			.set_plain_modulus_u64(256)
			.build()
			.unwrap();
		let ctx = Context::new(&params, false, SecurityLevel::TC128).unwrap();
		let gen = KeyGenerator::new(&ctx).unwrap();
		let encryptor = Encryptor::with_secret_key(&ctx, gen.secret_key()).unwrap();
		let evaluator = CKKSEvaluator::new(&ctx).unwrap();

		let ct = encryptor
			.encrypt_symmetric(&Plaintext::from_hex_string("6").unwrap())
			.unwrap();
		assert!(matches!(
			evaluator.rescale_to_next(&ct),
			Err(Error::Unsupported(_))
		));
	}

	#[test]
	fn rotation_and_conjugation_roundtrip() {
		let (ctx, gen) = setup();
		let encryptor = Encryptor::with_secret_key(&ctx, gen.secret_key()).unwrap();
		let decryptor = Decryptor::new(&ctx, gen.secret_key()).unwrap();
		let evaluator = CKKSEvaluator::new(&ctx).unwrap();
		let galois_keys = gen.create_galois_keys().unwrap();

		// A constant vector is invariant under slot rotation and
		// conjugation.
		let scale = 2.0f64.powi(30);
		let ct = encryptor.encrypt_symmetric(&encode_constant(&ctx, 4.0, scale)).unwrap();

		let rotated = evaluator.rotate_vector(&ct, 2, &galois_keys).unwrap();
		let value = decode_constant(&ctx, &decryptor.decrypt(&rotated).unwrap());
		assert!((value - 4.0).abs() < 0.01, "decoded {}", value);

		let conjugated = evaluator.complex_conjugate(&ct, &galois_keys).unwrap();
		let value = decode_constant(&ctx, &decryptor.decrypt(&conjugated).unwrap());
		assert!((value - 4.0).abs() < 0.01, "decoded {}", value);
	}
}
