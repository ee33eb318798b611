use crate::evaluator::base::EvaluatorBase;
use crate::{
	Ciphertext, Context, Evaluator, GaloisKey, ParmsId, Plaintext, RelinearizationKey, Result,
};

/// An evaluator that operates on BFV-scheme ciphertexts.
pub struct BFVEvaluator(EvaluatorBase);

impl std::ops::Deref for BFVEvaluator {
	type Target = EvaluatorBase;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl BFVEvaluator {
	/// Creates a BFVEvaluator instance initialized with the specified
	/// Context.
	///  * `ctx` - The context.
	pub fn new(ctx: &Context) -> Result<BFVEvaluator> {
		Ok(BFVEvaluator(EvaluatorBase::new(ctx)?))
	}

	/// Applies the Galois automorphism X -> X^galois_elt to a size-2
	/// ciphertext and key-switches back to the original secret.
	pub fn apply_galois(
		&self,
		a: &Ciphertext,
		galois_elt: u64,
		galois_keys: &GaloisKey,
	) -> Result<Ciphertext> {
		self.0.apply_galois(a, galois_elt, galois_keys)
	}

	/// Iteratively key-switches the top component away until the ciphertext
	/// has the requested size.
	pub fn relinearize_to_size(
		&self,
		a: &Ciphertext,
		relin_keys: &RelinearizationKey,
		destination_size: usize,
	) -> Result<Ciphertext> {
		let mut result = a.clone();
		self.0
			.relinearize_to_size_inplace(&mut result, relin_keys, destination_size)?;
		Ok(result)
	}

	/// Switches a ciphertext down to the given parameter set.
	pub fn mod_switch_to(&self, a: &Ciphertext, parms_id: ParmsId) -> Result<Ciphertext> {
		let mut result = a.clone();
		self.0.mod_switch_to_inplace(&mut result, parms_id)?;
		Ok(result)
	}

	/// Lifts a plaintext to the given parameter set in NTT form, readying it
	/// for repeated NTT-domain plaintext multiplication.
	pub fn transform_to_ntt_plaintext(&self, a: &Plaintext, parms_id: ParmsId) -> Result<Plaintext> {
		self.0.transform_to_ntt_plaintext(a, parms_id)
	}

	/// Transforms a ciphertext to NTT form.
	pub fn transform_to_ntt(&self, a: &Ciphertext) -> Result<Ciphertext> {
		let mut result = a.clone();
		self.0.transform_to_ntt_inplace(&mut result)?;
		Ok(result)
	}

	/// Transforms a ciphertext out of NTT form.
	pub fn transform_from_ntt(&self, a: &Ciphertext) -> Result<Ciphertext> {
		let mut result = a.clone();
		self.0.transform_from_ntt_inplace(&mut result)?;
		Ok(result)
	}
}

impl Evaluator for BFVEvaluator {
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
		let mut result = a.clone();
		self.0.rotate_internal(&mut result, steps, galois_keys)?;
		Ok(result)
	}

	fn rotate_rows_inplace(
		&self,
		a: &mut Ciphertext,
		steps: i32,
		galois_keys: &GaloisKey,
	) -> Result<()> {
		self.0.rotate_internal(a, steps, galois_keys)
	}

	fn rotate_columns(&self, a: &Ciphertext, galois_keys: &GaloisKey) -> Result<Ciphertext> {
		let mut result = a.clone();
		self.0.rotate_columns_internal(&mut result, galois_keys)?;
		Ok(result)
	}

	fn rotate_columns_inplace(&self, a: &mut Ciphertext, galois_keys: &GaloisKey) -> Result<()> {
		self.0.rotate_columns_internal(a, galois_keys)
	}
}

#[cfg(test)]
mod tests {
	use crate::*;

	fn setup(t: u64) -> (Context, KeyGenerator) {
		let params = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D4096, &[36, 36, 37]).unwrap(),
			)
			.set_plain_modulus_u64(t)
			.build()
			.unwrap();
		let ctx = Context::new(&params, false, SecurityLevel::TC128).unwrap();
		let gen = KeyGenerator::new(&ctx).unwrap();
		(ctx, gen)
	}

	fn setup_batching() -> (Context, KeyGenerator) {
		let params = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D4096, &[36, 36, 37]).unwrap(),
			)
			.set_plain_modulus(PlainModulusFactory::batching(DegreeType::D4096, 20).unwrap())
			.build()
			.unwrap();
		let ctx = Context::new(&params, false, SecurityLevel::TC128).unwrap();
		let gen = KeyGenerator::new(&ctx).unwrap();
		(ctx, gen)
	}

	fn tools(
		ctx: &Context,
		gen: &KeyGenerator,
	) -> (SymAsymEncryptor, Decryptor, BFVEvaluator) {
		let encryptor =
			Encryptor::with_public_and_secret_key(ctx, &gen.create_public_key(), gen.secret_key())
				.unwrap();
		let decryptor = Decryptor::new(ctx, gen.secret_key()).unwrap();
		let evaluator = BFVEvaluator::new(ctx).unwrap();
		(encryptor, decryptor, evaluator)
	}

	#[test]
	fn add_sub_negate_roundtrip() {
		let (ctx, gen) = setup(256);
		let (encryptor, decryptor, evaluator) = tools(&ctx, &gen);

		let a = Plaintext::from_hex_string("5x^2 + 3").unwrap();
		let b = Plaintext::from_hex_string("7x^2 + Ax^1 + 4").unwrap();
		let ct_a = encryptor.encrypt(&a).unwrap();
		let ct_b = encryptor.encrypt(&b).unwrap();

		let sum = evaluator.add(&ct_a, &ct_b).unwrap();
		assert_eq!(
			decryptor.decrypt(&sum).unwrap(),
			Plaintext::from_hex_string("Cx^2 + Ax^1 + 7").unwrap()
		);

		let difference = evaluator.sub(&sum, &ct_b).unwrap();
		assert_eq!(decryptor.decrypt(&difference).unwrap(), a);

		let negated = evaluator.negate(&ct_a).unwrap();
		let decrypted = decryptor.decrypt(&negated).unwrap();
		// -3 mod 256 and -5 mod 256.
		assert_eq!(decrypted.get_coefficient(0), 253);
		assert_eq!(decrypted.get_coefficient(2), 251);

		let total = evaluator.add_many(&[ct_a, ct_b.clone(), ct_b]).unwrap();
		assert_eq!(
			decryptor.decrypt(&total).unwrap(),
			Plaintext::from_hex_string("13x^2 + 14x^1 + B").unwrap()
		);
	}

	#[test]
	fn multiply_and_relinearize_roundtrip() {
		let (ctx, gen) = setup(256);
		let (encryptor, decryptor, evaluator) = tools(&ctx, &gen);
		let relin_keys = gen.create_relinearization_keys().unwrap();

		let a = Plaintext::from_hex_string("2x^1 + 3").unwrap();
		let b = Plaintext::from_hex_string("4x^1 + 5").unwrap();
		let ct_a = encryptor.encrypt(&a).unwrap();
		let ct_b = encryptor.encrypt(&b).unwrap();

		let product = evaluator.multiply(&ct_a, &ct_b).unwrap();
		assert_eq!(product.size(), 3);
		// (2x+3)(4x+5) = 8x^2 + 22x + 15
		let expected = Plaintext::from_hex_string("8x^2 + 16x^1 + F").unwrap();
		assert_eq!(decryptor.decrypt(&product).unwrap(), expected);

		let relinearized = evaluator.relinearize(&product, &relin_keys).unwrap();
		assert_eq!(relinearized.size(), 2);
		assert_eq!(decryptor.decrypt(&relinearized).unwrap(), expected);
	}

	#[test]
	fn square_matches_multiply() {
		let (ctx, gen) = setup(256);
		let (encryptor, decryptor, evaluator) = tools(&ctx, &gen);

		let a = Plaintext::from_hex_string("3x^1 + 2").unwrap();
		let ct = encryptor.encrypt(&a).unwrap();
		let squared = evaluator.square(&ct).unwrap();
		let multiplied = evaluator.multiply(&ct, &ct).unwrap();
		assert_eq!(
			decryptor.decrypt(&squared).unwrap(),
			decryptor.decrypt(&multiplied).unwrap()
		);
	}

	#[test]
	fn bfv_polynomial_evaluation_scenario() {
		// Encrypt x = 6 and compute 2(x^2+1)(x+1)^2 with relinearization
		// after each multiplication: 3626 mod 256 = 42.
		let params = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D4096, &[36, 36, 36]).unwrap(),
			)
			.set_plain_modulus_u64(256)
			.build()
			.unwrap();
		let ctx = Context::new(&params, false, SecurityLevel::TC128).unwrap();
		let gen = KeyGenerator::new(&ctx).unwrap();
		let (encryptor, decryptor, evaluator) = tools(&ctx, &gen);
		let relin_keys = gen.create_relinearization_keys().unwrap();

		let x = encryptor.encrypt(&Plaintext::from_hex_string("6").unwrap()).unwrap();

		// x^2 + 1
		let mut x_sq_plus_one = evaluator.square(&x).unwrap();
		evaluator
			.relinearize_inplace(&mut x_sq_plus_one, &relin_keys)
			.unwrap();
		evaluator
			.add_plain_inplace(&mut x_sq_plus_one, &Plaintext::from_hex_string("1").unwrap())
			.unwrap();

		// (x + 1)^2
		let mut x_plus_one_sq = evaluator
			.add_plain(&x, &Plaintext::from_hex_string("1").unwrap())
			.unwrap();
		evaluator.square_inplace(&mut x_plus_one_sq).unwrap();
		evaluator
			.relinearize_inplace(&mut x_plus_one_sq, &relin_keys)
			.unwrap();

		// 2(x^2+1)(x+1)^2
		let mut result = evaluator
			.multiply_plain(&x_sq_plus_one, &Plaintext::from_hex_string("2").unwrap())
			.unwrap();
		evaluator
			.multiply_inplace(&mut result, &x_plus_one_sq)
			.unwrap();
		evaluator.relinearize_inplace(&mut result, &relin_keys).unwrap();

		assert!(decryptor.invariant_noise_budget(&result).unwrap() > 0);
		let decrypted = decryptor.decrypt(&result).unwrap();
		assert_eq!(decrypted.get_coefficient(0), 42);
	}

	#[test]
	fn multiply_plain_monomial_uses_negacyclic_shift() {
		let (ctx, gen) = setup(256);
		let (encryptor, decryptor, evaluator) = tools(&ctx, &gen);

		let a = Plaintext::from_hex_string("3x^2 + 1x^1 + 4").unwrap();
		let ct = encryptor.encrypt(&a).unwrap();

		// x^3 is a monomial: (3x^2 + x + 4) * x^3 = 3x^5 + x^4 + 4x^3.
		let monomial = Plaintext::from_hex_string("1x^3").unwrap();
		let shifted = evaluator.multiply_plain(&ct, &monomial).unwrap();
		assert_eq!(
			decryptor.decrypt(&shifted).unwrap(),
			Plaintext::from_hex_string("3x^5 + 1x^4 + 4x^3").unwrap()
		);

		// A general plaintext goes through the NTT path.
		let poly = Plaintext::from_hex_string("2x^1 + 1").unwrap();
		let product = evaluator.multiply_plain(&ct, &poly).unwrap();
		// (3x^2+x+4)(2x+1) = 6x^3 + 5x^2 + 9x + 4
		assert_eq!(
			decryptor.decrypt(&product).unwrap(),
			Plaintext::from_hex_string("6x^3 + 5x^2 + 9x^1 + 4").unwrap()
		);
	}

	#[test]
	fn multiply_plain_in_ntt_domain() {
		let (ctx, gen) = setup(256);
		let (encryptor, decryptor, evaluator) = tools(&ctx, &gen);

		let a = Plaintext::from_hex_string("3x^2 + 4").unwrap();
		let b = Plaintext::from_hex_string("2x^1 + 1").unwrap();
		let ct = encryptor.encrypt(&a).unwrap();

		let ct_ntt = evaluator.transform_to_ntt(&ct).unwrap();
		let b_ntt = evaluator
			.transform_to_ntt_plaintext(&b, ct_ntt.parms_id())
			.unwrap();
		let product_ntt = evaluator.multiply_plain(&ct_ntt, &b_ntt).unwrap();
		let product = evaluator.transform_from_ntt(&product_ntt).unwrap();

		// (3x^2+4)(2x+1) = 6x^3 + 3x^2 + 8x + 4
		assert_eq!(
			decryptor.decrypt(&product).unwrap(),
			Plaintext::from_hex_string("6x^3 + 3x^2 + 8x^1 + 4").unwrap()
		);
	}

	#[test]
	fn sub_plain_wraps_modulo_t() {
		let (ctx, gen) = setup(256);
		let (encryptor, decryptor, evaluator) = tools(&ctx, &gen);

		let a = Plaintext::from_hex_string("3").unwrap();
		let ct = encryptor.encrypt(&a).unwrap();
		let smaller = evaluator
			.sub_plain(&ct, &Plaintext::from_hex_string("5").unwrap())
			.unwrap();
		let decrypted = decryptor.decrypt(&smaller).unwrap();
		assert_eq!(decrypted.get_coefficient(0), 254);
	}

	#[test]
	fn exponentiate_and_multiply_many() {
		let (ctx, gen) = setup(0xFFFF + 2);
		let (encryptor, decryptor, evaluator) = tools(&ctx, &gen);
		let relin_keys = gen.create_relinearization_keys().unwrap();

		let three = encryptor.encrypt(&Plaintext::from_hex_string("3").unwrap()).unwrap();
		let cubed = evaluator.exponentiate(&three, 3, &relin_keys).unwrap();
		assert_eq!(
			decryptor.decrypt(&cubed).unwrap().get_coefficient(0),
			27
		);

		let two = encryptor.encrypt(&Plaintext::from_hex_string("2").unwrap()).unwrap();
		let five = encryptor.encrypt(&Plaintext::from_hex_string("5").unwrap()).unwrap();
		let product = evaluator
			.multiply_many(&[two, five, three], &relin_keys)
			.unwrap();
		assert_eq!(
			decryptor.decrypt(&product).unwrap().get_coefficient(0),
			30
		);
	}

	#[test]
	fn mod_switch_preserves_plaintext() {
		// A size-2 ciphertext decrypts to the same plaintext after three
		// successive switches down a five-prime chain.
		let params = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D8192)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D8192, &[43, 43, 43, 43, 44]).unwrap(),
			)
			.set_plain_modulus_u64(256)
			.build()
			.unwrap();
		let ctx = Context::new(&params, true, SecurityLevel::TC128).unwrap();
		let gen = KeyGenerator::new(&ctx).unwrap();
		let (encryptor, decryptor, evaluator) = tools(&ctx, &gen);

		let plain = Plaintext::from_hex_string("7Bx^3 + 2").unwrap();
		let mut ct = encryptor.encrypt(&plain).unwrap();
		for _ in 0..3 {
			ct = evaluator.mod_switch_to_next(&ct).unwrap();
		}
		assert_eq!(ct.coeff_mod_count(), 1);
		assert_eq!(decryptor.decrypt(&ct).unwrap(), plain);

		// Stepping past the end of the chain fails.
		assert!(evaluator.mod_switch_to_next(&ct).is_err());
	}

	#[test]
	fn mod_switch_to_target_level() {
		let params = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D8192)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D8192, &[43, 43, 43, 43, 44]).unwrap(),
			)
			.set_plain_modulus_u64(256)
			.build()
			.unwrap();
		let ctx = Context::new(&params, true, SecurityLevel::TC128).unwrap();
		let gen = KeyGenerator::new(&ctx).unwrap();
		let (encryptor, decryptor, evaluator) = tools(&ctx, &gen);

		let plain = Plaintext::from_hex_string("2A").unwrap();
		let ct = encryptor.encrypt(&plain).unwrap();
		let target = ctx.last_parms_id();
		let switched = evaluator.mod_switch_to(&ct, target).unwrap();
		assert_eq!(switched.parms_id(), target);
		assert_eq!(decryptor.decrypt(&switched).unwrap(), plain);

		// Switching back up is invalid.
		assert!(evaluator
			.mod_switch_to(&switched, ctx.first_parms_id())
			.is_err());
	}

	#[test]
	fn rotation_shifts_and_restores() {
		let (ctx, gen) = setup_batching();
		let (encryptor, decryptor, evaluator) = tools(&ctx, &gen);
		let galois_keys = gen.create_galois_keys().unwrap();

		let plain = Plaintext::from_hex_string("5x^3 + 4x^2 + 3x^1 + 2").unwrap();
		let ct = encryptor.encrypt(&plain).unwrap();

		let rotated = evaluator.rotate_rows(&ct, 3, &galois_keys).unwrap();
		let restored = evaluator.rotate_rows(&rotated, -3, &galois_keys).unwrap();
		assert_eq!(decryptor.decrypt(&restored).unwrap(), plain);

		// The column swap composes to the identity.
		let swapped = evaluator.rotate_columns(&ct, &galois_keys).unwrap();
		let swapped_back = evaluator.rotate_columns(&swapped, &galois_keys).unwrap();
		assert_eq!(decryptor.decrypt(&swapped_back).unwrap(), plain);
	}

	#[test]
	fn galois_automorphisms_compose() {
		let (ctx, gen) = setup_batching();
		let (encryptor, decryptor, evaluator) = tools(&ctx, &gen);
		let galois_keys = gen
			.create_galois_keys_from_elements(&[3, 9, 27])
			.unwrap();

		let plain = Plaintext::from_hex_string("9x^7 + 1x^1 + 5").unwrap();
		let ct = encryptor.encrypt(&plain).unwrap();

		let once = evaluator.apply_galois(&ct, 3, &galois_keys).unwrap();
		let twice = evaluator.apply_galois(&once, 9, &galois_keys).unwrap();
		let direct = evaluator.apply_galois(&ct, 27, &galois_keys).unwrap();
		assert_eq!(
			decryptor.decrypt(&twice).unwrap(),
			decryptor.decrypt(&direct).unwrap()
		);
	}

	#[test]
	fn transparent_results_are_rejected() {
		let (ctx, gen) = setup(256);
		let (encryptor, _decryptor, evaluator) = tools(&ctx, &gen);

		let plain = Plaintext::from_hex_string("6").unwrap();
		let ct = encryptor.encrypt(&plain).unwrap();
		// Subtracting a ciphertext from itself zeroes every component.
		let result = evaluator.sub(&ct, &ct);
		#[cfg(not(feature = "transparent-ciphertexts"))]
		assert!(matches!(result, Err(Error::LogicError(_))));
		#[cfg(feature = "transparent-ciphertexts")]
		assert!(result.unwrap().is_transparent());
	}

	#[test]
	fn noise_budget_decreases_monotonically() {
		let (ctx, gen) = setup(256);
		let (encryptor, decryptor, evaluator) = tools(&ctx, &gen);
		let relin_keys = gen.create_relinearization_keys().unwrap();

		let plain = Plaintext::from_hex_string("6").unwrap();
		let ct = encryptor.encrypt(&plain).unwrap();
		let fresh_budget = decryptor.invariant_noise_budget(&ct).unwrap();

		let squared = evaluator.square(&ct).unwrap();
		let squared = evaluator.relinearize(&squared, &relin_keys).unwrap();
		let squared_budget = decryptor.invariant_noise_budget(&squared).unwrap();

		assert!(fresh_budget > 0);
		assert!(squared_budget < fresh_budget);
	}
}
