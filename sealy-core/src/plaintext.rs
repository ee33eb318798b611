use crate::error::{Error, Result};
use crate::parameters::ParmsId;

/// Class to store a plaintext polynomial. The data encoded for the plaintext
/// is a polynomial with coefficients modulo the plaintext modulus. The
/// degree of the plaintext polynomial must be one less than the degree of
/// the polynomial modulus. The backing array always allocates one 64-bit
/// word per coefficient.
///
/// Under the BFV scheme each coefficient is a value modulo the plaintext
/// modulus, and the plaintext is by default not in NTT form. Under the CKKS
/// scheme the plaintext is by default stored in NTT form with respect to
/// each of the primes of the coefficient modulus, so the allocation is the
/// number of primes times the degree of the polynomial modulus; a valid
/// CKKS plaintext also carries the ParmsId of the corresponding parameter
/// set and a positive scale.
#[derive(Debug, Clone)]
pub struct Plaintext {
	data: Vec<u64>,
	parms_id: ParmsId,
	is_ntt_form: bool,
	scale: f64,
}

impl PartialEq for Plaintext {
	fn eq(&self, other: &Self) -> bool {
		// Trailing zero coefficients do not change the polynomial.
		let count = self.significant_coeff_count();
		count == other.significant_coeff_count()
			&& self.data[..count] == other.data[..count]
			&& self.parms_id == other.parms_id
			&& self.is_ntt_form == other.is_ntt_form
	}
}

impl Plaintext {
	/// Constructs an empty plaintext.
	pub fn new() -> Self {
		Self {
			data: vec![],
			parms_id: ParmsId::ZERO,
			is_ntt_form: false,
			scale: 1.0,
		}
	}

	/// Constructs a plaintext from its dense coefficient array, lowest
	/// degree first.
	pub fn from_coefficients(coefficients: Vec<u64>) -> Self {
		Self {
			data: coefficients,
			parms_id: ParmsId::ZERO,
			is_ntt_form: false,
			scale: 1.0,
		}
	}

	/// Constructs a plaintext from a given hexadecimal string describing the
	/// plaintext polynomial, of the form "7FFx^3 + 1x^1 + 3":
	///
	/// 1. Terms are listed in order of strictly decreasing exponent
	/// 2. Coefficient values are non-negative and in hexadecimal format
	/// 3. Exponents are positive and in decimal format
	/// 4. Zero coefficient terms (including the constant term) may be (but
	///    do not have to be) omitted
	/// 5. Term with the exponent value of one must be exactly written as x^1
	/// 6. Term with the exponent value of zero (the constant term) must be
	///    written as just a hexadecimal number without exponent
	/// 7. Terms must be separated by exactly \[space\]+\[space\]
	pub fn from_hex_string(hex_str: &str) -> Result<Self> {
		let mut coefficients: Vec<(usize, u64)> = vec![];
		let mut max_exponent = 0usize;
		for term in hex_str.split(" + ") {
			let term = term.trim();
			if term.is_empty() {
				continue;
			}
			let (coeff_str, exponent) = match term.split_once("x^") {
				Some((c, e)) => {
					let exponent: usize = e
						.parse()
						.map_err(|_| Error::InvalidArgument("invalid exponent in polynomial string"))?;
					(c, exponent)
				}
				None => (term, 0),
			};
			let coeff = u64::from_str_radix(coeff_str, 16)
				.map_err(|_| Error::InvalidArgument("invalid coefficient in polynomial string"))?;
			max_exponent = max_exponent.max(exponent);
			coefficients.push((exponent, coeff));
		}
		let mut data = vec![0u64; max_exponent + 1];
		for (exponent, coeff) in coefficients {
			data[exponent] = coeff;
		}
		Ok(Self {
			data,
			parms_id: ParmsId::ZERO,
			is_ntt_form: false,
			scale: 1.0,
		})
	}

	/// Gets the coefficient at the given location. Coefficients are ordered
	/// from lowest to highest degree, with the first value being the
	/// constant coefficient.
	///
	/// # Panics
	/// Panics if index is out of bounds.
	pub fn get_coefficient(&self, index: usize) -> u64 {
		self.data[index]
	}

	/// Sets the coefficient at the given location.
	///
	/// # Panics
	/// Panics if index is out of bounds.
	pub fn set_coefficient(&mut self, index: usize, value: u64) {
		self.data[index] = value;
	}

	/// Sets the number of coefficients this plaintext holds, zero-filling
	/// new positions.
	pub fn resize(&mut self, count: usize) {
		self.data.resize(count, 0);
	}

	/// Returns the number of coefficients.
	pub fn len(&self) -> usize {
		self.data.len()
	}

	/// Returns `true` if the plaintext holds no coefficients.
	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	/// Returns whether the plaintext is in NTT form.
	pub fn is_ntt_form(&self) -> bool {
		self.is_ntt_form
	}

	/// Returns the parameter-set identifier the plaintext is bound to; zero
	/// for an unbound (coefficient-domain BFV) plaintext.
	pub fn parms_id(&self) -> ParmsId {
		self.parms_id
	}

	/// Returns the scale carried by a CKKS plaintext.
	pub fn scale(&self) -> f64 {
		self.scale
	}

	/// Sets the scale.
	pub fn set_scale(&mut self, scale: f64) {
		self.scale = scale;
	}

	/// Number of coefficients up to and including the highest nonzero one.
	pub fn significant_coeff_count(&self) -> usize {
		self.data
			.iter()
			.rposition(|c| *c != 0)
			.map(|i| i + 1)
			.unwrap_or(0)
	}

	/// Number of nonzero coefficients.
	pub fn nonzero_coeff_count(&self) -> usize {
		self.data.iter().filter(|c| **c != 0).count()
	}

	pub(crate) fn data(&self) -> &[u64] {
		&self.data
	}

	pub(crate) fn data_mut(&mut self) -> &mut Vec<u64> {
		&mut self.data
	}

	pub(crate) fn set_parms_id(&mut self, parms_id: ParmsId) {
		self.parms_id = parms_id;
	}

	pub(crate) fn set_ntt_form(&mut self, is_ntt_form: bool) {
		self.is_ntt_form = is_ntt_form;
	}
}

impl Default for Plaintext {
	fn default() -> Self {
		Self::new()
	}
}

impl AsRef<Plaintext> for Plaintext {
	fn as_ref(&self) -> &Self {
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn can_create_and_destroy_plaintext() {
		let plaintext = Plaintext::new();

		std::mem::drop(plaintext);
	}

	#[test]
	fn plaintext_coefficients_in_increasing_order() {
		let plaintext = Plaintext::from_hex_string("1234x^2 + 4321").unwrap();

		assert_eq!(plaintext.get_coefficient(0), 0x4321);
		assert_eq!(plaintext.get_coefficient(1), 0);
		assert_eq!(plaintext.get_coefficient(2), 0x1234);
	}

	#[test]
	fn hex_string_allows_gaps_and_single_terms() {
		let plaintext = Plaintext::from_hex_string("6").unwrap();
		assert_eq!(plaintext.len(), 1);
		assert_eq!(plaintext.get_coefficient(0), 6);

		let plaintext = Plaintext::from_hex_string("7FFx^3 + 1x^1 + 3").unwrap();
		assert_eq!(plaintext.significant_coeff_count(), 4);
		assert_eq!(plaintext.nonzero_coeff_count(), 3);
		assert_eq!(plaintext.get_coefficient(3), 0x7FF);
		assert_eq!(plaintext.get_coefficient(1), 1);
		assert_eq!(plaintext.get_coefficient(0), 3);

		assert!(Plaintext::from_hex_string("zzz").is_err());
	}
}
