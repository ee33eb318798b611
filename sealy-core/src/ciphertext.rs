use crate::context::Context;
use crate::error::{Error, Result};
use crate::parameters::ParmsId;

/// An ordered tuple of K >= 2 RNS polynomials over the current coefficient
/// modulus, decryptable as the evaluation sum(c_i * s^i).
///
/// A ciphertext carries the identifier of the parameter set it lives at, an
/// NTT-form flag (coefficient form is the default under BFV, NTT form under
/// CKKS) and, under CKKS, the scale of the encrypted values. The size only
/// shrinks through relinearization or explicit replacement; multiplication
/// of sizes a and b grows it to a+b-1.
#[derive(Debug, Clone, PartialEq)]
pub struct Ciphertext {
	data: Vec<u64>,
	size: usize,
	poly_modulus_degree: usize,
	coeff_mod_count: usize,
	parms_id: ParmsId,
	is_ntt_form: bool,
	scale: f64,
}

impl Ciphertext {
	/// Constructs an empty ciphertext.
	pub fn new() -> Self {
		Self {
			data: vec![],
			size: 0,
			poly_modulus_degree: 0,
			coeff_mod_count: 0,
			parms_id: ParmsId::ZERO,
			is_ntt_form: false,
			scale: 1.0,
		}
	}

	/// Resizes the ciphertext for the given parameter set and size. Existing
	/// words are preserved as a prefix; new positions are zero-filled.
	pub fn resize(&mut self, context: &Context, parms_id: ParmsId, size: usize) -> Result<()> {
		let context_data = context
			.get_context_data(&parms_id)
			.ok_or(Error::InvalidArgument("parms_id is not valid for the context"))?;
		let parms = context_data.parms();
		let poly_modulus_degree = parms.get_poly_modulus_degree() as usize;
		let coeff_mod_count = parms.get_coefficient_modulus().len();
		self.data
			.resize(size * poly_modulus_degree * coeff_mod_count, 0);
		self.size = size;
		self.poly_modulus_degree = poly_modulus_degree;
		self.coeff_mod_count = coeff_mod_count;
		self.parms_id = parms_id;
		Ok(())
	}

	/// Returns the number of polynomial components.
	pub fn size(&self) -> usize {
		self.size
	}

	/// Returns the degree of the polynomial modulus the components live in.
	pub fn poly_modulus_degree(&self) -> usize {
		self.poly_modulus_degree
	}

	/// Returns the number of primes of the current coefficient modulus.
	pub fn coeff_mod_count(&self) -> usize {
		self.coeff_mod_count
	}

	/// Returns the parameter-set identifier.
	pub fn parms_id(&self) -> ParmsId {
		self.parms_id
	}

	/// Returns whether the components are in NTT form.
	pub fn is_ntt_form(&self) -> bool {
		self.is_ntt_form
	}

	/// Returns the scale (meaningful under the CKKS scheme).
	pub fn scale(&self) -> f64 {
		self.scale
	}

	/// Sets the scale.
	pub fn set_scale(&mut self, scale: f64) {
		self.scale = scale;
	}

	/// Returns whether every component other than the first is identically
	/// zero. Such a ciphertext carries its value unprotected and must not
	/// leave the evaluator.
	pub fn is_transparent(&self) -> bool {
		let poly_len = self.poly_modulus_degree * self.coeff_mod_count;
		self.data[poly_len..].iter().all(|c| *c == 0)
	}

	/// The `index`-th RNS polynomial component.
	///
	/// # Panics
	/// Panics if index is out of bounds.
	pub fn poly(&self, index: usize) -> &[u64] {
		let poly_len = self.poly_modulus_degree * self.coeff_mod_count;
		&self.data[index * poly_len..(index + 1) * poly_len]
	}

	/// Mutable access to the `index`-th RNS polynomial component.
	///
	/// # Panics
	/// Panics if index is out of bounds.
	pub fn poly_mut(&mut self, index: usize) -> &mut [u64] {
		let poly_len = self.poly_modulus_degree * self.coeff_mod_count;
		&mut self.data[index * poly_len..(index + 1) * poly_len]
	}

	/// Mutable access to two distinct components at once.
	pub(crate) fn polys_mut(&mut self, first: usize, second: usize) -> (&mut [u64], &mut [u64]) {
		debug_assert!(first < second && second < self.size);
		let poly_len = self.poly_modulus_degree * self.coeff_mod_count;
		let (head, tail) = self.data.split_at_mut(second * poly_len);
		(
			&mut head[first * poly_len..(first + 1) * poly_len],
			&mut tail[..poly_len],
		)
	}

	/// The flat backing storage.
	pub fn data(&self) -> &[u64] {
		&self.data
	}

	/// Mutable flat backing storage.
	pub fn data_mut(&mut self) -> &mut [u64] {
		&mut self.data
	}

	pub(crate) fn set_ntt_form(&mut self, is_ntt_form: bool) {
		self.is_ntt_form = is_ntt_form;
	}

	pub(crate) fn set_parms_id(&mut self, parms_id: ParmsId) {
		self.parms_id = parms_id;
	}
}

impl Default for Ciphertext {
	fn default() -> Self {
		Self::new()
	}
}

impl AsRef<Ciphertext> for Ciphertext {
	fn as_ref(&self) -> &Self {
		self
	}
}
