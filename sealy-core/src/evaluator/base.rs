use std::collections::HashMap;
use std::sync::Arc;

use crate::ciphertext::Ciphertext;
use crate::context::Context;
use crate::context_data::ContextData;
use crate::error::{Error, Result};
use crate::key_generator::{steps_to_galois_elt, GaloisKey, KeySwitchingKey, RelinearizationKey};
use crate::memory::MemoryPool;
use crate::parameters::{ParmsId, SchemeType};
use crate::plaintext::Plaintext;
use crate::util::ntt::{inverse_ntt_negacyclic, ntt_negacyclic, ntt_negacyclic_lazy};
use crate::util::polyarith::{
	add_poly_assign, apply_galois, apply_galois_ntt, dyadic_product, dyadic_product_assign,
	modulo_poly_coeffs, multiply_poly_scalar_assign, negacyclic_multiply_poly_mono, negate_poly,
	sub_poly_assign,
};
use crate::util::scaling::{
	multiply_add_plain_with_scaling_variant, multiply_sub_plain_with_scaling_variant,
};
use crate::util::uintarith::{add_uint_u64, modulo_uint, try_invert_u64_mod};

fn are_same_scale(a: f64, b: f64) -> bool {
	(a - b).abs() <= 4.0 * f64::EPSILON * a.abs().max(b.abs()).max(1.0)
}

/// The scheme-independent workhorse behind the BFV and CKKS evaluators.
///
/// Every public operation validates the operand metadata first and leaves
/// its output untouched on error. The only state besides the context is the
/// precomputed map from Galois elements to the generator representation used
/// to compose rotations out of a logarithmic key set.
pub struct EvaluatorBase {
	context: Context,
	pool: MemoryPool,
	// galois_elt -> (power of 3, power of -1) modulo 2N.
	zmstar_to_generator: HashMap<u64, (u64, u64)>,
}

impl EvaluatorBase {
	/// Creates the evaluator for a context.
	pub fn new(context: &Context) -> Result<EvaluatorBase> {
		let n = context
			.first_context_data()
			.parms()
			.get_poly_modulus_degree();
		let m = n << 1;

		let mut zmstar_to_generator = HashMap::new();
		let mut power_of_three = 1u64;
		for i in 0..n / 2 {
			zmstar_to_generator
				.entry(power_of_three)
				.or_insert((i, 0));
			zmstar_to_generator
				.entry((power_of_three * (m - 1)) & (m - 1))
				.or_insert((i, 1));
			power_of_three = (power_of_three * 3) & (m - 1);
		}

		Ok(Self {
			context: context.clone(),
			pool: MemoryPool::global().clone(),
			zmstar_to_generator,
		})
	}

	/// The context the evaluator was created for.
	pub fn context(&self) -> &Context {
		&self.context
	}

	fn context_data_for(&self, encrypted: &Ciphertext) -> Result<Arc<ContextData>> {
		if encrypted.size() < 2 {
			return Err(Error::InvalidArgument("encrypted size must be at least 2"));
		}
		self.context
			.get_context_data(&encrypted.parms_id())
			.ok_or(Error::InvalidArgument("encrypted is not valid for encryption parameters"))
	}

	fn guard_transparent(&self, encrypted: &Ciphertext) -> Result<()> {
		#[cfg(not(feature = "transparent-ciphertexts"))]
		if encrypted.is_transparent() {
			return Err(Error::LogicError("result ciphertext is transparent"));
		}
		#[cfg(feature = "transparent-ciphertexts")]
		let _ = encrypted;
		Ok(())
	}

	// ---------------------------------------------------------------------
	// Negation, addition, subtraction
	// ---------------------------------------------------------------------

	/// Negates a ciphertext in place.
	pub fn negate_inplace(&self, encrypted: &mut Ciphertext) -> Result<()> {
		let context_data = self.context_data_for(encrypted)?;
		let coeff_modulus = context_data.parms().get_coefficient_modulus().to_vec();
		let n = context_data.parms().get_poly_modulus_degree() as usize;

		for j in 0..encrypted.size() {
			let poly = encrypted.poly_mut(j);
			for (i, q) in coeff_modulus.iter().enumerate() {
				negate_poly(&mut poly[i * n..(i + 1) * n], q);
			}
		}
		self.guard_transparent(encrypted)
	}

	/// Negates a ciphertext.
	pub fn negate(&self, encrypted: &Ciphertext) -> Result<Ciphertext> {
		let mut result = encrypted.clone();
		self.negate_inplace(&mut result)?;
		Ok(result)
	}

	fn check_binary_operands(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Arc<ContextData>> {
		let context_data = self.context_data_for(a)?;
		self.context_data_for(b)?;
		if a.parms_id() != b.parms_id() {
			return Err(Error::InvalidArgument("operand parameter mismatch"));
		}
		if a.is_ntt_form() != b.is_ntt_form() {
			return Err(Error::InvalidArgument("NTT form mismatch"));
		}
		if !are_same_scale(a.scale(), b.scale()) {
			return Err(Error::InvalidArgument("scale mismatch"));
		}
		Ok(context_data)
	}

	/// Adds `encrypted2` into `encrypted1`.
	pub fn add_inplace(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext) -> Result<()> {
		let context_data = self.check_binary_operands(encrypted1, encrypted2)?;
		let coeff_modulus = context_data.parms().get_coefficient_modulus().to_vec();
		let n = context_data.parms().get_poly_modulus_degree() as usize;
		let min_count = encrypted1.size().min(encrypted2.size());
		let max_count = encrypted1.size().max(encrypted2.size());

		encrypted1.resize(&self.context, context_data.parms_id(), max_count)?;
		for j in 0..min_count {
			let poly = encrypted1.poly_mut(j);
			for (i, q) in coeff_modulus.iter().enumerate() {
				add_poly_assign(
					&mut poly[i * n..(i + 1) * n],
					&encrypted2.poly(j)[i * n..(i + 1) * n],
					q,
				);
			}
		}
		// Copy the remaining polys of the larger operand.
		for j in min_count..encrypted2.size() {
			encrypted1.poly_mut(j).copy_from_slice(encrypted2.poly(j));
		}
		self.guard_transparent(encrypted1)
	}

	/// Adds two ciphertexts.
	pub fn add(&self, encrypted1: &Ciphertext, encrypted2: &Ciphertext) -> Result<Ciphertext> {
		let mut result = encrypted1.clone();
		self.add_inplace(&mut result, encrypted2)?;
		Ok(result)
	}

	/// Sums a slice of ciphertexts.
	pub fn add_many(&self, encrypteds: &[Ciphertext]) -> Result<Ciphertext> {
		if encrypteds.is_empty() {
			return Err(Error::InvalidArgument("encrypteds cannot be empty"));
		}
		let mut result = encrypteds[0].clone();
		for encrypted in &encrypteds[1..] {
			self.add_inplace(&mut result, encrypted)?;
		}
		Ok(result)
	}

	/// Subtracts `encrypted2` from `encrypted1` in place.
	pub fn sub_inplace(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext) -> Result<()> {
		let context_data = self.check_binary_operands(encrypted1, encrypted2)?;
		let coeff_modulus = context_data.parms().get_coefficient_modulus().to_vec();
		let n = context_data.parms().get_poly_modulus_degree() as usize;
		let min_count = encrypted1.size().min(encrypted2.size());
		let max_count = encrypted1.size().max(encrypted2.size());

		encrypted1.resize(&self.context, context_data.parms_id(), max_count)?;
		for j in 0..min_count {
			let poly = encrypted1.poly_mut(j);
			for (i, q) in coeff_modulus.iter().enumerate() {
				sub_poly_assign(
					&mut poly[i * n..(i + 1) * n],
					&encrypted2.poly(j)[i * n..(i + 1) * n],
					q,
				);
			}
		}
		// Negate the remaining polys of a larger right operand.
		for j in min_count..encrypted2.size() {
			let poly = encrypted1.poly_mut(j);
			poly.copy_from_slice(encrypted2.poly(j));
			for (i, q) in coeff_modulus.iter().enumerate() {
				negate_poly(&mut poly[i * n..(i + 1) * n], q);
			}
		}
		self.guard_transparent(encrypted1)
	}

	/// Subtracts two ciphertexts.
	pub fn sub(&self, encrypted1: &Ciphertext, encrypted2: &Ciphertext) -> Result<Ciphertext> {
		let mut result = encrypted1.clone();
		self.sub_inplace(&mut result, encrypted2)?;
		Ok(result)
	}

	// ---------------------------------------------------------------------
	// Multiplication
	// ---------------------------------------------------------------------

	/// Multiplies `encrypted2` into `encrypted1` using the scheme-specific
	/// procedure.
	pub fn multiply_inplace(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext) -> Result<()> {
		if encrypted1.parms_id() != encrypted2.parms_id() {
			return Err(Error::InvalidArgument("operand parameter mismatch"));
		}
		match self.context.first_context_data().parms().get_scheme() {
			SchemeType::Bfv => self.bfv_multiply(encrypted1, encrypted2)?,
			SchemeType::Ckks => self.ckks_multiply(encrypted1, encrypted2)?,
			SchemeType::None => return Err(Error::Unsupported("unsupported scheme")),
		}
		self.guard_transparent(encrypted1)
	}

	/// Multiplies two ciphertexts.
	pub fn multiply(&self, encrypted1: &Ciphertext, encrypted2: &Ciphertext) -> Result<Ciphertext> {
		let mut result = encrypted1.clone();
		self.multiply_inplace(&mut result, encrypted2)?;
		Ok(result)
	}

	/// Squares a ciphertext in place; size 2 takes the three-product path.
	pub fn square_inplace(&self, encrypted: &mut Ciphertext) -> Result<()> {
		match self.context.first_context_data().parms().get_scheme() {
			SchemeType::Bfv => {
				if encrypted.size() != 2 {
					let copy = encrypted.clone();
					self.bfv_multiply(encrypted, &copy)?;
				} else {
					self.bfv_square(encrypted)?;
				}
			}
			SchemeType::Ckks => {
				let copy = encrypted.clone();
				self.ckks_multiply(encrypted, &copy)?;
			}
			SchemeType::None => return Err(Error::Unsupported("unsupported scheme")),
		}
		self.guard_transparent(encrypted)
	}

	/// Squares a ciphertext.
	pub fn square(&self, encrypted: &Ciphertext) -> Result<Ciphertext> {
		let mut result = encrypted.clone();
		self.square_inplace(&mut result)?;
		Ok(result)
	}

	/// Full-RNS BFV multiplication: lift to Bsk, convolve in both bases in
	/// the NTT domain, multiply by t, divide by q with fast_floor and return
	/// to base q.
	fn bfv_multiply(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext) -> Result<()> {
		if encrypted1.is_ntt_form() || encrypted2.is_ntt_form() {
			return Err(Error::InvalidArgument("operands cannot be in NTT form"));
		}
		let context_data = self.context_data_for(encrypted1)?;
		self.context_data_for(encrypted2)?;
		let parms = context_data.parms();
		let coeff_modulus = parms.get_coefficient_modulus().to_vec();
		let k = coeff_modulus.len();
		let n = parms.get_poly_modulus_degree() as usize;
		let plain_modulus = parms.get_plain_modulus().value();
		let converter = context_data.base_converter();
		let bsk_modulus = converter.bsk_base().to_vec();
		let bsk_count = bsk_modulus.len();
		let ntt_tables = context_data.ntt_tables();
		let bsk_ntt_tables = converter.bsk_ntt_tables();

		let size1 = encrypted1.size();
		let size2 = encrypted2.size();
		let dest_count = size1
			.checked_add(size2)
			.and_then(|s| s.checked_sub(1))
			.ok_or(Error::LogicError("invalid parameters"))?;

		// Lift every input component into Bsk and transform both
		// representations to NTT form.
		let mut mtilde = self.pool.allocate((bsk_count + 1) * n);
		let mut lift = |ct: &Ciphertext, count: usize| -> (Vec<u64>, Vec<u64>) {
			let mut ntt_q = vec![0u64; count * k * n];
			let mut ntt_bsk = vec![0u64; count * bsk_count * n];
			for j in 0..count {
				converter.fastbconv_mtilde(ct.poly(j), &mut mtilde, &self.pool);
				converter.mont_rq(&mtilde, &mut ntt_bsk[j * bsk_count * n..(j + 1) * bsk_count * n]);
				ntt_q[j * k * n..(j + 1) * k * n].copy_from_slice(ct.poly(j));
			}
			for j in 0..count {
				for i in 0..k {
					ntt_negacyclic_lazy(
						&mut ntt_q[j * k * n + i * n..j * k * n + (i + 1) * n],
						&ntt_tables[i],
					);
				}
				for i in 0..bsk_count {
					ntt_negacyclic_lazy(
						&mut ntt_bsk[j * bsk_count * n + i * n..j * bsk_count * n + (i + 1) * n],
						&bsk_ntt_tables[i],
					);
				}
			}
			(ntt_q, ntt_bsk)
		};
		let (ntt1_q, ntt1_bsk) = lift(encrypted1, size1);
		let (ntt2_q, ntt2_bsk) = lift(encrypted2, size2);
		drop(mtilde);

		// Convolve in both bases.
		let mut des_q = vec![0u64; dest_count * k * n];
		let mut des_bsk = vec![0u64; dest_count * bsk_count * n];
		let mut product = self.pool.allocate(n);
		for out in 0..dest_count {
			let limit = size1.min(out + 1);
			for index1 in 0..limit {
				if size2 <= out - index1 {
					continue;
				}
				let index2 = out - index1;
				for (i, q) in coeff_modulus.iter().enumerate() {
					dyadic_product(
						&ntt1_q[index1 * k * n + i * n..index1 * k * n + (i + 1) * n],
						&ntt2_q[index2 * k * n + i * n..index2 * k * n + (i + 1) * n],
						q,
						&mut product,
					);
					add_poly_assign(
						&mut des_q[out * k * n + i * n..out * k * n + (i + 1) * n],
						&product,
						q,
					);
				}
				for (i, b) in bsk_modulus.iter().enumerate() {
					dyadic_product(
						&ntt1_bsk
							[index1 * bsk_count * n + i * n..index1 * bsk_count * n + (i + 1) * n],
						&ntt2_bsk
							[index2 * bsk_count * n + i * n..index2 * bsk_count * n + (i + 1) * n],
						b,
						&mut product,
					);
					add_poly_assign(
						&mut des_bsk[out * bsk_count * n + i * n..out * bsk_count * n + (i + 1) * n],
						&product,
						b,
					);
				}
			}
		}
		drop(product);

		// Leave the NTT domain and multiply both results by t.
		for out in 0..dest_count {
			for (i, q) in coeff_modulus.iter().enumerate() {
				let poly = &mut des_q[out * k * n + i * n..out * k * n + (i + 1) * n];
				inverse_ntt_negacyclic(poly, &ntt_tables[i]);
				multiply_poly_scalar_assign(poly, plain_modulus, q);
			}
			for (i, b) in bsk_modulus.iter().enumerate() {
				let poly =
					&mut des_bsk[out * bsk_count * n + i * n..out * bsk_count * n + (i + 1) * n];
				inverse_ntt_negacyclic(poly, &bsk_ntt_tables[i]);
				multiply_poly_scalar_assign(poly, plain_modulus, b);
			}
		}

		// floor(t * product / q) back in base q.
		encrypted1.resize(&self.context, context_data.parms_id(), dest_count)?;
		let mut combined = self.pool.allocate((k + bsk_count) * n);
		let mut floored = self.pool.allocate(bsk_count * n);
		for out in 0..dest_count {
			combined[..k * n].copy_from_slice(&des_q[out * k * n..(out + 1) * k * n]);
			combined[k * n..]
				.copy_from_slice(&des_bsk[out * bsk_count * n..(out + 1) * bsk_count * n]);
			converter.fast_floor(&combined, &mut floored, &self.pool);
			converter.fastbconv_sk(&floored, encrypted1.poly_mut(out), &self.pool);
		}
		Ok(())
	}

	/// BFV squaring of a size-2 ciphertext via c_0^2 | 2c_0c_1 | c_1^2.
	fn bfv_square(&self, encrypted: &mut Ciphertext) -> Result<()> {
		if encrypted.is_ntt_form() {
			return Err(Error::InvalidArgument("encrypted cannot be in NTT form"));
		}
		let context_data = self.context_data_for(encrypted)?;
		let parms = context_data.parms();
		let coeff_modulus = parms.get_coefficient_modulus().to_vec();
		let k = coeff_modulus.len();
		let n = parms.get_poly_modulus_degree() as usize;
		let plain_modulus = parms.get_plain_modulus().value();
		let converter = context_data.base_converter();
		let bsk_modulus = converter.bsk_base().to_vec();
		let bsk_count = bsk_modulus.len();
		let ntt_tables = context_data.ntt_tables();
		let bsk_ntt_tables = converter.bsk_ntt_tables();
		debug_assert_eq!(encrypted.size(), 2);
		let dest_count = 3;

		let mut ntt_q = vec![0u64; 2 * k * n];
		let mut ntt_bsk = vec![0u64; 2 * bsk_count * n];
		{
			let mut mtilde = self.pool.allocate((bsk_count + 1) * n);
			for j in 0..2 {
				converter.fastbconv_mtilde(encrypted.poly(j), &mut mtilde, &self.pool);
				converter
					.mont_rq(&mtilde, &mut ntt_bsk[j * bsk_count * n..(j + 1) * bsk_count * n]);
				ntt_q[j * k * n..(j + 1) * k * n].copy_from_slice(encrypted.poly(j));
			}
		}
		for j in 0..2 {
			for i in 0..k {
				ntt_negacyclic_lazy(
					&mut ntt_q[j * k * n + i * n..j * k * n + (i + 1) * n],
					&ntt_tables[i],
				);
			}
			for i in 0..bsk_count {
				ntt_negacyclic_lazy(
					&mut ntt_bsk[j * bsk_count * n + i * n..j * bsk_count * n + (i + 1) * n],
					&bsk_ntt_tables[i],
				);
			}
		}

		let mut des_q = vec![0u64; dest_count * k * n];
		let mut des_bsk = vec![0u64; dest_count * bsk_count * n];
		let square_into = |ntt: &[u64], des: &mut [u64], moduli: &[crate::Modulus], count: usize| {
			for (i, q) in moduli.iter().enumerate() {
				let c0 = &ntt[i * n..(i + 1) * n];
				let c1 = &ntt[count * n + i * n..count * n + (i + 1) * n];
				// c_0^2 and c_1^2 into the outer components.
				dyadic_product(c0, c0, q, &mut des[i * n..(i + 1) * n]);
				dyadic_product(
					c1,
					c1,
					q,
					&mut des[2 * count * n + i * n..2 * count * n + (i + 1) * n],
				);
				// 2 c_0 c_1 into the middle.
				let middle = &mut des[count * n + i * n..count * n + (i + 1) * n];
				dyadic_product(c0, c1, q, middle);
				let doubled = middle.to_vec();
				add_poly_assign(middle, &doubled, q);
			}
		};
		square_into(&ntt_q, &mut des_q, &coeff_modulus, k);
		square_into(&ntt_bsk, &mut des_bsk, &bsk_modulus, bsk_count);

		for out in 0..dest_count {
			for (i, q) in coeff_modulus.iter().enumerate() {
				let poly = &mut des_q[out * k * n + i * n..out * k * n + (i + 1) * n];
				inverse_ntt_negacyclic(poly, &ntt_tables[i]);
				multiply_poly_scalar_assign(poly, plain_modulus, q);
			}
			for (i, b) in bsk_modulus.iter().enumerate() {
				let poly =
					&mut des_bsk[out * bsk_count * n + i * n..out * bsk_count * n + (i + 1) * n];
				inverse_ntt_negacyclic(poly, &bsk_ntt_tables[i]);
				multiply_poly_scalar_assign(poly, plain_modulus, b);
			}
		}

		encrypted.resize(&self.context, context_data.parms_id(), dest_count)?;
		let mut combined = self.pool.allocate((k + bsk_count) * n);
		let mut floored = self.pool.allocate(bsk_count * n);
		for out in 0..dest_count {
			combined[..k * n].copy_from_slice(&des_q[out * k * n..(out + 1) * k * n]);
			combined[k * n..]
				.copy_from_slice(&des_bsk[out * bsk_count * n..(out + 1) * bsk_count * n]);
			converter.fast_floor(&combined, &mut floored, &self.pool);
			converter.fastbconv_sk(&floored, encrypted.poly_mut(out), &self.pool);
		}
		Ok(())
	}

	/// CKKS multiplication: a dyadic convolution in the NTT domain; the
	/// scales multiply.
	fn ckks_multiply(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext) -> Result<()> {
		if !(encrypted1.is_ntt_form() && encrypted2.is_ntt_form()) {
			return Err(Error::InvalidArgument("operands must be in NTT form"));
		}
		let context_data = self.context_data_for(encrypted1)?;
		self.context_data_for(encrypted2)?;
		let parms = context_data.parms();
		let coeff_modulus = parms.get_coefficient_modulus().to_vec();
		let k = coeff_modulus.len();
		let n = parms.get_poly_modulus_degree() as usize;

		let new_scale = encrypted1.scale() * encrypted2.scale();
		if !(new_scale > 0.0)
			|| (new_scale.log2() as i64) >= context_data.total_coeff_modulus_bit_count() as i64
		{
			return Err(Error::InvalidArgument("scale out of bounds"));
		}

		let size1 = encrypted1.size();
		let size2 = encrypted2.size();
		let dest_count = size1
			.checked_add(size2)
			.and_then(|s| s.checked_sub(1))
			.ok_or(Error::LogicError("invalid parameters"))?;

		let copy1 = encrypted1.data()[..size1 * k * n].to_vec();
		let copy2 = encrypted2.data()[..size2 * k * n].to_vec();

		encrypted1.resize(&self.context, context_data.parms_id(), dest_count)?;
		encrypted1.data_mut().fill(0);
		let mut product = self.pool.allocate(n);
		for out in 0..dest_count {
			let limit = size1.min(out + 1);
			for index1 in 0..limit {
				if size2 <= out - index1 {
					continue;
				}
				let index2 = out - index1;
				for (i, q) in coeff_modulus.iter().enumerate() {
					dyadic_product(
						&copy1[index1 * k * n + i * n..index1 * k * n + (i + 1) * n],
						&copy2[index2 * k * n + i * n..index2 * k * n + (i + 1) * n],
						q,
						&mut product,
					);
					add_poly_assign(
						&mut encrypted1.poly_mut(out)[i * n..(i + 1) * n],
						&product,
						q,
					);
				}
			}
		}
		encrypted1.set_scale(new_scale);
		Ok(())
	}

	// ---------------------------------------------------------------------
	// Relinearization and key switching
	// ---------------------------------------------------------------------

	/// Relinearizes to size 2 in place.
	pub fn relinearize_inplace(
		&self,
		encrypted: &mut Ciphertext,
		relin_keys: &RelinearizationKey,
	) -> Result<()> {
		self.relinearize_to_size_inplace(encrypted, relin_keys, 2)
	}

	/// Relinearizes to size 2.
	pub fn relinearize(
		&self,
		encrypted: &Ciphertext,
		relin_keys: &RelinearizationKey,
	) -> Result<Ciphertext> {
		let mut result = encrypted.clone();
		self.relinearize_inplace(&mut result, relin_keys)?;
		Ok(result)
	}

	/// Iteratively key-switches the top component away until the ciphertext
	/// reaches `destination_size`.
	pub fn relinearize_to_size_inplace(
		&self,
		encrypted: &mut Ciphertext,
		relin_keys: &RelinearizationKey,
		destination_size: usize,
	) -> Result<()> {
		let context_data = self.context_data_for(encrypted)?;
		if relin_keys.parms_id() != self.context.key_parms_id() {
			return Err(Error::InvalidArgument(
				"relin_keys is not valid for encryption parameters",
			));
		}
		let encrypted_size = encrypted.size();
		if destination_size < 2 || destination_size > encrypted_size {
			return Err(Error::InvalidArgument(
				"destination_size must be at least 2 and at most the current size",
			));
		}
		if relin_keys.size() < encrypted_size - 2 {
			return Err(Error::InvalidArgument("not enough relinearization keys"));
		}
		if destination_size == encrypted_size {
			return Ok(());
		}

		let mut current_size = encrypted_size;
		while current_size > destination_size {
			let target = encrypted.poly(current_size - 1).to_vec();
			let key = &relin_keys.keys[RelinearizationKey::get_index(current_size - 1)];
			self.switch_key_inplace(encrypted, &target, key)?;
			current_size -= 1;
		}
		encrypted.resize(&self.context, context_data.parms_id(), destination_size)?;
		self.guard_transparent(encrypted)
	}

	/// Switches the decryption of `target` (a single RNS polynomial at the
	/// ciphertext's level) onto the key hidden in `kswitch_key`, adding the
	/// result into the first two components of `encrypted`.
	fn switch_key_inplace(
		&self,
		encrypted: &mut Ciphertext,
		target: &[u64],
		kswitch_key: &KeySwitchingKey,
	) -> Result<()> {
		if !self.context.using_keyswitching() {
			return Err(Error::LogicError("keyswitching is not supported by the context"));
		}
		let context_data = self.context_data_for(encrypted)?;
		let parms = context_data.parms();
		let scheme = parms.get_scheme();
		let key_context_data = self.context.key_context_data();
		let key_parms = key_context_data.parms();
		let key_modulus = key_parms.get_coefficient_modulus().to_vec();
		let key_count = key_modulus.len();
		let key_ntt_tables = key_context_data.ntt_tables();
		let modswitch_factors = key_context_data.base_converter().inv_last_coeff_mod();
		let n = parms.get_poly_modulus_degree() as usize;
		let decomp_count = parms.get_coefficient_modulus().len();
		debug_assert_eq!(target.len(), decomp_count * n);
		if kswitch_key.data.len() < decomp_count {
			return Err(Error::InvalidArgument("key-switching key is too short"));
		}
		if scheme == SchemeType::Bfv && encrypted.is_ntt_form() {
			return Err(Error::InvalidArgument("BFV encrypted cannot be in NTT form"));
		}
		if scheme == SchemeType::Ckks && !encrypted.is_ntt_form() {
			return Err(Error::InvalidArgument("CKKS encrypted must be in NTT form"));
		}

		// Wide accumulators for both output components over the key base
		// (the decomposition primes plus the special prime).
		let rns_count = decomp_count + 1;
		let mut accumulator = vec![[0u128; 2]; rns_count * n];

		let mut digit = self.pool.allocate(n);
		let mut operand = self.pool.allocate(n);
		for i in 0..decomp_count {
			// The i-th RNS digit of the target, in coefficient form.
			digit.copy_from_slice(&target[i * n..(i + 1) * n]);
			if scheme == SchemeType::Ckks {
				inverse_ntt_negacyclic(&mut digit, &key_ntt_tables[i]);
			}
			let key = kswitch_key.data[i].data();
			for j in 0..rns_count {
				let index = if j == decomp_count { key_count - 1 } else { j };
				let key_poly = key.poly(0);
				let key_poly1 = key.poly(1);
				let use_original_ntt = scheme == SchemeType::Ckks && i == j;
				if use_original_ntt {
					operand.copy_from_slice(&target[i * n..(i + 1) * n]);
				} else {
					// Reduce only when the source prime can exceed the
					// target prime.
					if key_modulus[i].value() <= key_modulus[index].value() {
						operand.copy_from_slice(&digit);
					} else {
						modulo_poly_coeffs(&digit, &key_modulus[index], &mut operand);
					}
					ntt_negacyclic_lazy(&mut operand, &key_ntt_tables[index]);
				}
				for (l, op) in operand.iter().enumerate() {
					let acc = &mut accumulator[j * n + l];
					acc[0] += *op as u128 * key_poly[index * n + l] as u128;
					acc[1] += *op as u128 * key_poly1[index * n + l] as u128;
				}
			}
		}

		// Divide by the special prime with rounding and fold the result
		// into c_0 and c_1.
		let special = &key_modulus[key_count - 1];
		let half = special.value() >> 1;
		let mut t_last = self.pool.allocate(n);
		let mut t_current = self.pool.allocate(n);
		let mut correction = self.pool.allocate(n);
		for component in 0..2 {
			for l in 0..n {
				t_last[l] = special.reduce_u128(accumulator[decomp_count * n + l][component]);
			}
			inverse_ntt_negacyclic(&mut t_last, &key_ntt_tables[key_count - 1]);
			for c in t_last.iter_mut() {
				*c = special.add_mod(*c, half);
			}

			for j in 0..decomp_count {
				let q_j = &key_modulus[j];
				// ([x + q_last/2]_{q_last} - q_last/2) mod q_j
				modulo_poly_coeffs(&t_last, q_j, &mut correction);
				let half_mod = q_j.reduce(half);
				for c in correction.iter_mut() {
					*c = q_j.sub_mod(*c, half_mod);
				}
				if scheme == SchemeType::Ckks {
					ntt_negacyclic(&mut correction, &key_ntt_tables[j]);
				}

				for l in 0..n {
					t_current[l] = q_j.reduce_u128(accumulator[j * n + l][component]);
				}
				if scheme == SchemeType::Bfv {
					inverse_ntt_negacyclic(&mut t_current, &key_ntt_tables[j]);
				}
				sub_poly_assign(&mut t_current, &correction, q_j);
				multiply_poly_scalar_assign(&mut t_current, modswitch_factors[j], q_j);
				add_poly_assign(
					&mut encrypted.poly_mut(component)[j * n..(j + 1) * n],
					&t_current,
					q_j,
				);
			}
		}
		Ok(())
	}

	// ---------------------------------------------------------------------
	// Modulus switching and rescaling
	// ---------------------------------------------------------------------

	fn mod_switch_scale_to_next(
		&self,
		encrypted: &Ciphertext,
		destination: &mut Ciphertext,
	) -> Result<()> {
		let context_data = self.context_data_for(encrypted)?;
		let parms = context_data.parms();
		let scheme = parms.get_scheme();
		if scheme == SchemeType::Bfv && encrypted.is_ntt_form() {
			return Err(Error::InvalidArgument("BFV encrypted cannot be in NTT form"));
		}
		if scheme == SchemeType::Ckks && !encrypted.is_ntt_form() {
			return Err(Error::InvalidArgument("CKKS encrypted must be in NTT form"));
		}
		let next_parms_id = context_data
			.next_parms_id()
			.ok_or(Error::InvalidArgument("end of modulus switching chain reached"))?;
		let next_context_data = self
			.context
			.get_context_data(&next_parms_id)
			.ok_or(Error::LogicError("chain link is broken"))?;
		let next_k = next_context_data.parms().get_coefficient_modulus().len();
		let n = parms.get_poly_modulus_degree() as usize;
		let converter = context_data.base_converter();
		let size = encrypted.size();

		let mut temp = encrypted.clone();
		for j in 0..size {
			if encrypted.is_ntt_form() {
				converter.round_last_coeff_modulus_ntt_inplace(
					temp.poly_mut(j),
					context_data.ntt_tables(),
					&self.pool,
				);
			} else {
				converter.round_last_coeff_modulus_inplace(temp.poly_mut(j), &self.pool);
			}
		}

		destination.resize(&self.context, next_parms_id, size)?;
		for j in 0..size {
			destination
				.poly_mut(j)
				.copy_from_slice(&temp.poly(j)[..next_k * n]);
		}
		destination.set_ntt_form(encrypted.is_ntt_form());
		destination.set_scale(if scheme == SchemeType::Ckks {
			let last = parms
				.get_coefficient_modulus()
				.last()
				.expect("modulus is never empty")
				.value();
			encrypted.scale() / last as f64
		} else {
			encrypted.scale()
		});
		Ok(())
	}

	fn mod_switch_drop_to_next(
		&self,
		encrypted: &Ciphertext,
		destination: &mut Ciphertext,
	) -> Result<()> {
		let context_data = self.context_data_for(encrypted)?;
		let parms = context_data.parms();
		if parms.get_scheme() == SchemeType::Ckks && !encrypted.is_ntt_form() {
			return Err(Error::InvalidArgument("CKKS encrypted must be in NTT form"));
		}
		let next_parms_id = context_data
			.next_parms_id()
			.ok_or(Error::InvalidArgument("end of modulus switching chain reached"))?;
		let next_context_data = self
			.context
			.get_context_data(&next_parms_id)
			.ok_or(Error::LogicError("chain link is broken"))?;
		// The dropped prime divides the recorded scale instead of the data.
		let last = parms
			.get_coefficient_modulus()
			.last()
			.expect("modulus is never empty")
			.value();
		let new_scale = encrypted.scale() / last as f64;
		if !(new_scale > 0.0)
			|| (new_scale.log2() as i64)
				>= next_context_data.total_coeff_modulus_bit_count() as i64
		{
			return Err(Error::InvalidArgument("scale out of bounds"));
		}
		let next_k = next_context_data.parms().get_coefficient_modulus().len();
		let n = parms.get_poly_modulus_degree() as usize;
		let size = encrypted.size();

		let source = encrypted.data().to_vec();
		let source_poly_len = parms.get_coefficient_modulus().len() * n;
		destination.resize(&self.context, next_parms_id, size)?;
		for j in 0..size {
			destination
				.poly_mut(j)
				.copy_from_slice(&source[j * source_poly_len..j * source_poly_len + next_k * n]);
		}
		destination.set_ntt_form(encrypted.is_ntt_form());
		destination.set_scale(new_scale);
		Ok(())
	}

	/// Switches the ciphertext to the next parameter set in the chain.
	pub fn mod_switch_to_next(&self, encrypted: &Ciphertext) -> Result<Ciphertext> {
		let mut destination = Ciphertext::new();
		match self.context.first_context_data().parms().get_scheme() {
			SchemeType::Bfv => self.mod_switch_scale_to_next(encrypted, &mut destination)?,
			SchemeType::Ckks => self.mod_switch_drop_to_next(encrypted, &mut destination)?,
			SchemeType::None => return Err(Error::Unsupported("unsupported scheme")),
		}
		self.guard_transparent(&destination)?;
		Ok(destination)
	}

	/// As [`EvaluatorBase::mod_switch_to_next`], in place.
	pub fn mod_switch_to_next_inplace(&self, encrypted: &mut Ciphertext) -> Result<()> {
		*encrypted = self.mod_switch_to_next(encrypted)?;
		Ok(())
	}

	/// Repeatedly switches down until the ciphertext reaches the target
	/// parameter set.
	pub fn mod_switch_to_inplace(&self, encrypted: &mut Ciphertext, parms_id: ParmsId) -> Result<()> {
		let context_data = self.context_data_for(encrypted)?;
		let target_context_data = self
			.context
			.get_context_data(&parms_id)
			.ok_or(Error::InvalidArgument("parms_id is not valid for the context"))?;
		if context_data.chain_index() < target_context_data.chain_index() {
			return Err(Error::InvalidArgument("cannot switch to a higher level modulus"));
		}
		while encrypted.parms_id() != parms_id {
			self.mod_switch_to_next_inplace(encrypted)?;
		}
		Ok(())
	}

	/// Switches an NTT-form plaintext to the next parameter set by dropping
	/// its last RNS component.
	pub fn mod_switch_to_next_plaintext(&self, plain: &Plaintext) -> Result<Plaintext> {
		if !plain.is_ntt_form() {
			return Err(Error::InvalidArgument("plain is not in NTT form"));
		}
		let context_data = self
			.context
			.get_context_data(&plain.parms_id())
			.ok_or(Error::InvalidArgument("plain is not valid for encryption parameters"))?;
		let next_parms_id = context_data
			.next_parms_id()
			.ok_or(Error::InvalidArgument("end of modulus switching chain reached"))?;
		let next_context_data = self
			.context
			.get_context_data(&next_parms_id)
			.ok_or(Error::LogicError("chain link is broken"))?;
		if !(plain.scale() > 0.0)
			|| (plain.scale().log2() as i64)
				>= next_context_data.total_coeff_modulus_bit_count() as i64
		{
			return Err(Error::InvalidArgument("scale out of bounds"));
		}
		let n = context_data.parms().get_poly_modulus_degree() as usize;
		let next_k = next_context_data.parms().get_coefficient_modulus().len();

		let mut result = plain.clone();
		result.resize(next_k * n);
		result.set_parms_id(next_parms_id);
		Ok(result)
	}

	/// As [`EvaluatorBase::mod_switch_to_next_plaintext`], in place.
	pub fn mod_switch_to_next_inplace_plaintext(&self, plain: &mut Plaintext) -> Result<()> {
		*plain = self.mod_switch_to_next_plaintext(plain)?;
		Ok(())
	}

	/// Divides the ciphertext by the last prime with rounding, updating the
	/// scale; CKKS only.
	pub fn rescale_to_next(&self, encrypted: &Ciphertext) -> Result<Ciphertext> {
		if self.context.first_context_data().parms().get_scheme() != SchemeType::Ckks {
			return Err(Error::Unsupported("rescaling requires the CKKS scheme"));
		}
		let mut destination = Ciphertext::new();
		self.mod_switch_scale_to_next(encrypted, &mut destination)?;
		self.guard_transparent(&destination)?;
		Ok(destination)
	}

	/// Repeatedly rescales until the ciphertext reaches the target parameter
	/// set; CKKS only.
	pub fn rescale_to_inplace(&self, encrypted: &mut Ciphertext, parms_id: ParmsId) -> Result<()> {
		if self.context.first_context_data().parms().get_scheme() != SchemeType::Ckks {
			return Err(Error::Unsupported("rescaling requires the CKKS scheme"));
		}
		let context_data = self.context_data_for(encrypted)?;
		let target_context_data = self
			.context
			.get_context_data(&parms_id)
			.ok_or(Error::InvalidArgument("parms_id is not valid for the context"))?;
		if context_data.chain_index() < target_context_data.chain_index() {
			return Err(Error::InvalidArgument("cannot switch to a higher level modulus"));
		}
		while encrypted.parms_id() != parms_id {
			let mut next = Ciphertext::new();
			self.mod_switch_scale_to_next(encrypted, &mut next)?;
			*encrypted = next;
		}
		self.guard_transparent(encrypted)
	}

	// ---------------------------------------------------------------------
	// Plaintext operations
	// ---------------------------------------------------------------------

	fn check_plain_operand(&self, encrypted: &Ciphertext, plain: &Plaintext) -> Result<Arc<ContextData>> {
		let context_data = self.context_data_for(encrypted)?;
		let scheme = context_data.parms().get_scheme();
		if scheme == SchemeType::Bfv && encrypted.is_ntt_form() {
			return Err(Error::InvalidArgument("BFV encrypted cannot be in NTT form"));
		}
		if scheme == SchemeType::Ckks && !encrypted.is_ntt_form() {
			return Err(Error::InvalidArgument("CKKS encrypted must be in NTT form"));
		}
		if plain.is_ntt_form() != encrypted.is_ntt_form() {
			return Err(Error::InvalidArgument("NTT form mismatch"));
		}
		if encrypted.is_ntt_form() && encrypted.parms_id() != plain.parms_id() {
			return Err(Error::InvalidArgument("encrypted and plain parameter mismatch"));
		}
		if !are_same_scale(encrypted.scale(), plain.scale()) {
			return Err(Error::InvalidArgument("scale mismatch"));
		}
		Ok(context_data)
	}

	fn validate_bfv_plain(&self, context_data: &ContextData, plain: &Plaintext) -> Result<()> {
		let parms = context_data.parms();
		if plain.len() > parms.get_poly_modulus_degree() as usize {
			return Err(Error::InvalidArgument("plain is not valid for encryption parameters"));
		}
		let t = parms.get_plain_modulus().value();
		if plain.data().iter().any(|c| *c >= t) {
			return Err(Error::InvalidArgument(
				"plain coefficients must be smaller than the plain modulus",
			));
		}
		Ok(())
	}

	/// Adds a plaintext into a ciphertext in place.
	pub fn add_plain_inplace(&self, encrypted: &mut Ciphertext, plain: &Plaintext) -> Result<()> {
		let context_data = self.check_plain_operand(encrypted, plain)?;
		match context_data.parms().get_scheme() {
			SchemeType::Bfv => {
				self.validate_bfv_plain(&context_data, plain)?;
				self.bfv_add_sub_plain(encrypted, plain, &context_data, false);
			}
			SchemeType::Ckks => {
				let parms = context_data.parms();
				let coeff_modulus = parms.get_coefficient_modulus();
				let n = parms.get_poly_modulus_degree() as usize;
				for (i, q) in coeff_modulus.iter().enumerate() {
					add_poly_assign(
						&mut encrypted.poly_mut(0)[i * n..(i + 1) * n],
						&plain.data()[i * n..(i + 1) * n],
						q,
					);
				}
			}
			SchemeType::None => return Err(Error::Unsupported("unsupported scheme")),
		}
		self.guard_transparent(encrypted)
	}

	/// Adds a plaintext to a ciphertext.
	pub fn add_plain(&self, encrypted: &Ciphertext, plain: &Plaintext) -> Result<Ciphertext> {
		let mut result = encrypted.clone();
		self.add_plain_inplace(&mut result, plain)?;
		Ok(result)
	}

	/// Subtracts a plaintext from a ciphertext in place.
	pub fn sub_plain_inplace(&self, encrypted: &mut Ciphertext, plain: &Plaintext) -> Result<()> {
		let context_data = self.check_plain_operand(encrypted, plain)?;
		match context_data.parms().get_scheme() {
			SchemeType::Bfv => {
				self.validate_bfv_plain(&context_data, plain)?;
				self.bfv_add_sub_plain(encrypted, plain, &context_data, true);
			}
			SchemeType::Ckks => {
				let parms = context_data.parms();
				let coeff_modulus = parms.get_coefficient_modulus();
				let n = parms.get_poly_modulus_degree() as usize;
				for (i, q) in coeff_modulus.iter().enumerate() {
					sub_poly_assign(
						&mut encrypted.poly_mut(0)[i * n..(i + 1) * n],
						&plain.data()[i * n..(i + 1) * n],
						q,
					);
				}
			}
			SchemeType::None => return Err(Error::Unsupported("unsupported scheme")),
		}
		self.guard_transparent(encrypted)
	}

	/// Subtracts a plaintext from a ciphertext.
	pub fn sub_plain(&self, encrypted: &Ciphertext, plain: &Plaintext) -> Result<Ciphertext> {
		let mut result = encrypted.clone();
		self.sub_plain_inplace(&mut result, plain)?;
		Ok(result)
	}

	fn bfv_add_sub_plain(
		&self,
		encrypted: &mut Ciphertext,
		plain: &Plaintext,
		context_data: &ContextData,
		subtract: bool,
	) {
		if subtract {
			multiply_sub_plain_with_scaling_variant(plain, context_data, encrypted.poly_mut(0));
		} else {
			multiply_add_plain_with_scaling_variant(plain, context_data, encrypted.poly_mut(0));
		}
	}

	/// Multiplies a ciphertext by a plaintext in place.
	pub fn multiply_plain_inplace(&self, encrypted: &mut Ciphertext, plain: &Plaintext) -> Result<()> {
		self.context_data_for(encrypted)?;
		if encrypted.is_ntt_form() != plain.is_ntt_form() {
			return Err(Error::InvalidArgument("NTT form mismatch"));
		}
		if plain.is_empty() || plain.nonzero_coeff_count() == 0 {
			// A zero plaintext would produce a transparent result.
			return Err(Error::LogicError("result ciphertext is transparent"));
		}
		if encrypted.is_ntt_form() {
			self.multiply_plain_ntt(encrypted, plain)?;
		} else {
			self.multiply_plain_normal(encrypted, plain)?;
		}
		self.guard_transparent(encrypted)
	}

	/// Multiplies a ciphertext by a plaintext.
	pub fn multiply_plain(&self, encrypted: &Ciphertext, plain: &Plaintext) -> Result<Ciphertext> {
		let mut result = encrypted.clone();
		self.multiply_plain_inplace(&mut result, plain)?;
		Ok(result)
	}

	fn multiply_plain_normal(&self, encrypted: &mut Ciphertext, plain: &Plaintext) -> Result<()> {
		let context_data = self.context_data_for(encrypted)?;
		let parms = context_data.parms();
		self.validate_bfv_plain(&context_data, plain)?;
		let coeff_modulus = parms.get_coefficient_modulus().to_vec();
		let k = coeff_modulus.len();
		let n = parms.get_poly_modulus_degree() as usize;
		let ntt_tables = context_data.ntt_tables();
		let plain_upper_half_threshold = context_data.plain_upper_half_threshold();
		let plain_upper_half_increment = context_data.plain_upper_half_increment();
		let fast_plain_lift = context_data.qualifiers().using_fast_plain_lift;
		let size = encrypted.size();

		let new_scale = encrypted.scale() * plain.scale();
		if !(new_scale > 0.0)
			|| (new_scale.log2() as i64) >= context_data.total_coeff_modulus_bit_count() as i64
		{
			return Err(Error::InvalidArgument("scale out of bounds"));
		}
		encrypted.set_scale(new_scale);

		// Multiplying by a monomial reduces to a negacyclic shift. The
		// shortcut has plaintext-dependent timing; it is fine for public
		// plaintexts but must be avoided when the plaintext is private.
		if plain.nonzero_coeff_count() == 1 {
			let mono_exponent = plain.significant_coeff_count() - 1;
			let coeff = plain.get_coefficient(mono_exponent);
			let mut shifted = self.pool.allocate(n);
			if coeff >= plain_upper_half_threshold && !fast_plain_lift {
				// Lift the negative representative across the full base.
				let mut adjusted = vec![0u64; k];
				add_uint_u64(plain_upper_half_increment, coeff, &mut adjusted);
				for j in 0..size {
					let poly = encrypted.poly_mut(j);
					for (i, q) in coeff_modulus.iter().enumerate() {
						let lifted = modulo_uint(&adjusted, q.value());
						negacyclic_multiply_poly_mono(
							&poly[i * n..(i + 1) * n],
							lifted,
							mono_exponent,
							q,
							&mut shifted,
						);
						poly[i * n..(i + 1) * n].copy_from_slice(&shifted);
					}
				}
			} else {
				for j in 0..size {
					let poly = encrypted.poly_mut(j);
					for (i, q) in coeff_modulus.iter().enumerate() {
						let lifted = if coeff >= plain_upper_half_threshold {
							coeff + plain_upper_half_increment[i]
						} else {
							coeff
						};
						negacyclic_multiply_poly_mono(
							&poly[i * n..(i + 1) * n],
							lifted,
							mono_exponent,
							q,
							&mut shifted,
						);
						poly[i * n..(i + 1) * n].copy_from_slice(&shifted);
					}
				}
			}
			return Ok(());
		}

		// Generic case: lift the plaintext into RNS, transform it once, and
		// multiply every component in the NTT domain.
		let mut lifted = vec![0u64; k * n];
		if fast_plain_lift {
			for (i, _q) in coeff_modulus.iter().enumerate() {
				for (c, m) in lifted[i * n..(i + 1) * n]
					.iter_mut()
					.zip(plain.data().iter())
				{
					*c = if *m >= plain_upper_half_threshold {
						*m + plain_upper_half_increment[i]
					} else {
						*m
					};
				}
			}
		} else {
			// Coefficients lift to m + (q - t) as multiprecision values,
			// reduced modulo each prime.
			let mut adjusted = vec![0u64; k];
			for (coeff_index, m) in plain.data().iter().enumerate() {
				if *m >= plain_upper_half_threshold {
					add_uint_u64(plain_upper_half_increment, *m, &mut adjusted);
					for (i, q) in coeff_modulus.iter().enumerate() {
						lifted[i * n + coeff_index] = modulo_uint(&adjusted, q.value());
					}
				} else {
					for i in 0..k {
						lifted[i * n + coeff_index] = *m;
					}
				}
			}
		}
		for i in 0..k {
			ntt_negacyclic(&mut lifted[i * n..(i + 1) * n], &ntt_tables[i]);
		}

		for j in 0..size {
			let poly = encrypted.poly_mut(j);
			for (i, q) in coeff_modulus.iter().enumerate() {
				let target = &mut poly[i * n..(i + 1) * n];
				ntt_negacyclic_lazy(target, &ntt_tables[i]);
				dyadic_product_assign(target, &lifted[i * n..(i + 1) * n], q);
				inverse_ntt_negacyclic(target, &ntt_tables[i]);
			}
		}
		Ok(())
	}

	fn multiply_plain_ntt(&self, encrypted: &mut Ciphertext, plain: &Plaintext) -> Result<()> {
		if encrypted.parms_id() != plain.parms_id() {
			return Err(Error::InvalidArgument("encrypted and plain parameter mismatch"));
		}
		let context_data = self.context_data_for(encrypted)?;
		let parms = context_data.parms();
		let coeff_modulus = parms.get_coefficient_modulus().to_vec();
		let n = parms.get_poly_modulus_degree() as usize;

		let new_scale = encrypted.scale() * plain.scale();
		if !(new_scale > 0.0)
			|| (new_scale.log2() as i64) >= context_data.total_coeff_modulus_bit_count() as i64
		{
			return Err(Error::InvalidArgument("scale out of bounds"));
		}

		for j in 0..encrypted.size() {
			let poly = encrypted.poly_mut(j);
			for (i, q) in coeff_modulus.iter().enumerate() {
				dyadic_product_assign(
					&mut poly[i * n..(i + 1) * n],
					&plain.data()[i * n..(i + 1) * n],
					q,
				);
			}
		}
		encrypted.set_scale(new_scale);
		Ok(())
	}

	// ---------------------------------------------------------------------
	// NTT transforms
	// ---------------------------------------------------------------------

	/// Lifts a BFV plaintext to the given parameter set and transforms it to
	/// NTT form, binding it to that set.
	pub fn transform_to_ntt_plaintext(&self, plain: &Plaintext, parms_id: ParmsId) -> Result<Plaintext> {
		if plain.is_ntt_form() {
			return Err(Error::InvalidArgument("plain is already in NTT form"));
		}
		let context_data = self
			.context
			.get_context_data(&parms_id)
			.ok_or(Error::InvalidArgument("parms_id is not valid for the context"))?;
		let parms = context_data.parms();
		self.validate_bfv_plain(&context_data, plain)?;
		let coeff_modulus = parms.get_coefficient_modulus();
		let k = coeff_modulus.len();
		let n = parms.get_poly_modulus_degree() as usize;
		let plain_upper_half_threshold = context_data.plain_upper_half_threshold();
		let plain_upper_half_increment = context_data.plain_upper_half_increment();
		let ntt_tables = context_data.ntt_tables();

		let mut result = plain.clone();
		let data = result.data_mut();
		let coeffs = data.clone();
		data.clear();
		data.resize(k * n, 0);
		if context_data.qualifiers().using_fast_plain_lift {
			for i in 0..k {
				for (target, m) in data[i * n..(i + 1) * n].iter_mut().zip(coeffs.iter()) {
					*target = if *m >= plain_upper_half_threshold {
						*m + plain_upper_half_increment[i]
					} else {
						*m
					};
				}
			}
		} else {
			let mut adjusted = vec![0u64; k];
			for (coeff_index, m) in coeffs.iter().enumerate() {
				if *m >= plain_upper_half_threshold {
					add_uint_u64(plain_upper_half_increment, *m, &mut adjusted);
					for (i, q) in coeff_modulus.iter().enumerate() {
						data[i * n + coeff_index] = modulo_uint(&adjusted, q.value());
					}
				} else {
					for i in 0..k {
						data[i * n + coeff_index] = *m;
					}
				}
			}
		}
		for i in 0..k {
			ntt_negacyclic(&mut data[i * n..(i + 1) * n], &ntt_tables[i]);
		}
		result.set_parms_id(parms_id);
		result.set_ntt_form(true);
		Ok(result)
	}

	/// Transforms a ciphertext to NTT form in place.
	pub fn transform_to_ntt_inplace(&self, encrypted: &mut Ciphertext) -> Result<()> {
		if encrypted.is_ntt_form() {
			return Err(Error::InvalidArgument("encrypted is already in NTT form"));
		}
		let context_data = self.context_data_for(encrypted)?;
		let n = context_data.parms().get_poly_modulus_degree() as usize;
		let ntt_tables = context_data.ntt_tables();
		for j in 0..encrypted.size() {
			let poly = encrypted.poly_mut(j);
			for (i, tables) in ntt_tables.iter().enumerate() {
				ntt_negacyclic(&mut poly[i * n..(i + 1) * n], tables);
			}
		}
		encrypted.set_ntt_form(true);
		self.guard_transparent(encrypted)
	}

	/// Transforms a ciphertext out of NTT form in place.
	pub fn transform_from_ntt_inplace(&self, encrypted: &mut Ciphertext) -> Result<()> {
		if !encrypted.is_ntt_form() {
			return Err(Error::InvalidArgument("encrypted is not in NTT form"));
		}
		let context_data = self.context_data_for(encrypted)?;
		let n = context_data.parms().get_poly_modulus_degree() as usize;
		let ntt_tables = context_data.ntt_tables();
		for j in 0..encrypted.size() {
			let poly = encrypted.poly_mut(j);
			for (i, tables) in ntt_tables.iter().enumerate() {
				inverse_ntt_negacyclic(&mut poly[i * n..(i + 1) * n], tables);
			}
		}
		encrypted.set_ntt_form(false);
		self.guard_transparent(encrypted)
	}

	// ---------------------------------------------------------------------
	// Galois automorphisms and rotations
	// ---------------------------------------------------------------------

	/// Applies the automorphism X -> X^galois_elt and key-switches back to
	/// the original secret.
	pub fn apply_galois_inplace(
		&self,
		encrypted: &mut Ciphertext,
		galois_elt: u64,
		galois_keys: &GaloisKey,
	) -> Result<()> {
		let context_data = self.context_data_for(encrypted)?;
		if galois_keys.parms_id() != self.context.key_parms_id() {
			return Err(Error::InvalidArgument(
				"galois_keys is not valid for encryption parameters",
			));
		}
		let parms = context_data.parms();
		let coeff_modulus = parms.get_coefficient_modulus().to_vec();
		let n = parms.get_poly_modulus_degree() as usize;
		let m = 2 * n as u64;
		let power = n.trailing_zeros();

		if galois_elt & 1 == 0 || galois_elt >= m {
			return Err(Error::InvalidArgument("Galois element is not valid"));
		}
		if encrypted.size() > 2 {
			return Err(Error::InvalidArgument("encrypted size must be 2"));
		}

		// Without the exact key, compose the automorphism from the
		// generator keys (powers of 3 and the sign flip).
		if !galois_keys.has_key(galois_elt) {
			let (order1, order2) = *self
				.zmstar_to_generator
				.get(&galois_elt)
				.ok_or(Error::InvalidArgument("Galois element is not valid"))?;
			let subgroup_size = (n as u64) >> 1;

			// Walk whichever direction has fewer automorphism steps.
			let (mut order1, mut generator) =
				if (subgroup_size - order1).count_ones() < order1.count_ones() {
					(
						subgroup_size - order1,
						try_invert_u64_mod(3, m).ok_or(Error::LogicError("no inverse of 3"))?,
					)
				} else {
					(order1, 3u64)
				};
			while order1 != 0 {
				if order1 & 1 != 0 {
					if !galois_keys.has_key(generator) {
						return Err(Error::InvalidArgument("Galois key not present"));
					}
					self.apply_galois_inplace(encrypted, generator, galois_keys)?;
				}
				generator = generator.wrapping_mul(generator) & (m - 1);
				order1 >>= 1;
			}
			if order2 != 0 {
				if !galois_keys.has_key(m - 1) {
					return Err(Error::InvalidArgument("Galois key not present"));
				}
				self.apply_galois_inplace(encrypted, m - 1, galois_keys)?;
			}
			return Ok(());
		}

		// Permute both components; c_1's image becomes the key-switch
		// target and c_1 is cleared.
		let mut temp = self.pool.allocate(coeff_modulus.len() * n);
		let is_ntt_form = encrypted.is_ntt_form();
		for component in 0..2 {
			let poly = encrypted.poly_mut(component);
			for (i, q) in coeff_modulus.iter().enumerate() {
				if is_ntt_form {
					apply_galois_ntt(
						&poly[i * n..(i + 1) * n],
						power,
						galois_elt,
						&mut temp[i * n..(i + 1) * n],
					);
				} else {
					apply_galois(
						&poly[i * n..(i + 1) * n],
						power,
						galois_elt,
						q,
						&mut temp[i * n..(i + 1) * n],
					);
				}
			}
			if component == 0 {
				poly.copy_from_slice(&temp);
			}
		}
		let target = temp.to_vec();
		encrypted.poly_mut(1).fill(0);

		let key = galois_keys.keys[GaloisKey::get_index(galois_elt)]
			.as_ref()
			.ok_or(Error::LogicError("key missing but claimed present"))?;
		self.switch_key_inplace(encrypted, &target, key)?;
		self.guard_transparent(encrypted)
	}

	/// As [`EvaluatorBase::apply_galois_inplace`], into a new ciphertext.
	pub fn apply_galois(
		&self,
		encrypted: &Ciphertext,
		galois_elt: u64,
		galois_keys: &GaloisKey,
	) -> Result<Ciphertext> {
		let mut result = encrypted.clone();
		self.apply_galois_inplace(&mut result, galois_elt, galois_keys)?;
		Ok(result)
	}

	/// Rotates the batched rows by `steps`; requires batching-enabled
	/// parameters.
	pub fn rotate_internal(
		&self,
		encrypted: &mut Ciphertext,
		steps: i32,
		galois_keys: &GaloisKey,
	) -> Result<()> {
		let context_data = self.context_data_for(encrypted)?;
		if !context_data.qualifiers().using_batching {
			return Err(Error::LogicError("encryption parameters do not support batching"));
		}
		self.rotate_vector_internal(encrypted, steps, galois_keys)
	}

	/// Rotates the slot vector by `steps` without the batching check (the
	/// CKKS slots always exist).
	pub fn rotate_vector_internal(
		&self,
		encrypted: &mut Ciphertext,
		steps: i32,
		galois_keys: &GaloisKey,
	) -> Result<()> {
		if steps == 0 {
			return Ok(());
		}
		let context_data = self.context_data_for(encrypted)?;
		let n = context_data.parms().get_poly_modulus_degree();
		let galois_elt = steps_to_galois_elt(steps, n)?;
		self.apply_galois_inplace(encrypted, galois_elt, galois_keys)
	}

	/// Swaps the two batched rows (the Galois element 2N - 1).
	pub fn rotate_columns_internal(
		&self,
		encrypted: &mut Ciphertext,
		galois_keys: &GaloisKey,
	) -> Result<()> {
		let context_data = self.context_data_for(encrypted)?;
		if !context_data.qualifiers().using_batching {
			return Err(Error::LogicError("encryption parameters do not support batching"));
		}
		let m = 2 * context_data.parms().get_poly_modulus_degree();
		self.apply_galois_inplace(encrypted, m - 1, galois_keys)
	}

	// ---------------------------------------------------------------------
	// Composite operations
	// ---------------------------------------------------------------------

	/// Multiplies a slice of ciphertexts as a balanced tree, relinearizing
	/// after every multiplication. Squares are used when both operands are
	/// the same ciphertext.
	pub fn multiply_many(
		&self,
		encrypteds: &[Ciphertext],
		relin_keys: &RelinearizationKey,
	) -> Result<Ciphertext> {
		if encrypteds.is_empty() {
			return Err(Error::InvalidArgument("encrypteds cannot be empty"));
		}
		if self.context.first_context_data().parms().get_scheme() != SchemeType::Bfv {
			return Err(Error::LogicError("multiply_many requires the BFV scheme"));
		}
		if encrypteds.len() == 1 {
			return Ok(encrypteds[0].clone());
		}

		// Pair up operands, pushing products to the back until one remains.
		let mut items = encrypteds.to_vec();
		let mut index = 0;
		while index + 1 < items.len() {
			let product = if items[index] == items[index + 1] {
				self.square(&items[index])?
			} else {
				self.multiply(&items[index], &items[index + 1])?
			};
			let product = self.relinearize(&product, relin_keys)?;
			items.push(product);
			index += 2;
		}
		Ok(items.pop().expect("items is never empty"))
	}

	/// Raises a ciphertext to a power, relinearizing after every
	/// multiplication.
	pub fn exponentiate_inplace(
		&self,
		encrypted: &mut Ciphertext,
		exponent: u64,
		relin_keys: &RelinearizationKey,
	) -> Result<()> {
		self.context_data_for(encrypted)?;
		if exponent == 0 {
			return Err(Error::InvalidArgument("exponent cannot be 0"));
		}
		if exponent == 1 {
			return Ok(());
		}
		let items = vec![encrypted.clone(); exponent as usize];
		*encrypted = self.multiply_many(&items, relin_keys)?;
		Ok(())
	}
}
