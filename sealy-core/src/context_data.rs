use crate::error::{Error, Result};
use crate::modulus::SecurityLevel;
use crate::parameters::{EncryptionParameters, ParmsId, SchemeType};
use crate::util::ntt::NttTables;
use crate::util::rns::BaseConverter;
use crate::util::uintarith::{divide_uint_by_u64, modulo_uint, multiply_uint_u64, significant_bit_count};

/// Flags describing properties of a validated parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionParameterQualifiers {
	/// The polynomial modulus degree is a power of two.
	pub using_fft: bool,
	/// Every coefficient prime is congruent to 1 modulo 2N, so the
	/// negacyclic NTT exists for each of them.
	pub using_ntt: bool,
	/// The plaintext modulus is a prime congruent to 1 modulo 2N, so the
	/// plaintext space decomposes into 2 x N/2 batching slots.
	pub using_batching: bool,
	/// Every coefficient prime exceeds the plaintext modulus, so plaintext
	/// coefficients lift into RNS without multiprecision arithmetic.
	pub using_fast_plain_lift: bool,
	/// The coefficient primes are strictly decreasing.
	pub using_descending_modulus_chain: bool,
	/// The security level the parameters were validated against, if any.
	pub security_level: Option<SecurityLevel>,
}

/// Pre-computations for one node of the modulus switching chain.
///
/// Holds the validated parameters of the node, NTT tables for each surviving
/// prime, the base converter of the node's coefficient base, and the derived
/// scalars used by plaintext scaling and decryption.
#[derive(Debug)]
pub struct ContextData {
	parms: EncryptionParameters,
	qualifiers: EncryptionParameterQualifiers,
	ntt_tables: Vec<NttTables>,
	base_converter: BaseConverter,
	total_coeff_modulus: Vec<u64>,
	total_coeff_modulus_bit_count: u32,
	// floor(q/t) mod q_i
	coeff_div_plain_modulus: Vec<u64>,
	// ceil(t/2)
	plain_upper_half_threshold: u64,
	// q_i - t when fast plain lift is possible, otherwise q - t as a
	// multiprecision value shared by all primes.
	plain_upper_half_increment: Vec<u64>,
	// (q mod t) mod q_i
	upper_half_increment: Vec<u64>,
	// q mod t
	coeff_mod_plain_modulus: u64,
	chain_index: usize,
	prev_parms_id: Option<ParmsId>,
	next_parms_id: Option<ParmsId>,
}

impl ContextData {
	pub(crate) fn new(
		parms: EncryptionParameters,
		security_level: Option<SecurityLevel>,
	) -> Result<Self> {
		let n = parms.get_poly_modulus_degree() as usize;
		let coeff_modulus = parms.get_coefficient_modulus().to_vec();
		let k = coeff_modulus.len();
		let plain_modulus = *parms.get_plain_modulus();
		let scheme = parms.get_scheme();

		// NTT tables; generation fails when a prime is not NTT-friendly.
		let power = n.trailing_zeros();
		let mut ntt_tables = Vec::with_capacity(k);
		for q in &coeff_modulus {
			ntt_tables.push(NttTables::new(power, q).ok_or(Error::InvalidParameters)?);
		}

		let base_converter = BaseConverter::generate(
			&coeff_modulus,
			n,
			&plain_modulus,
			scheme == SchemeType::Bfv,
		)?;

		// Total coefficient modulus as a multiprecision product.
		let mut total_coeff_modulus = vec![0u64; k];
		total_coeff_modulus[0] = 1;
		for q in &coeff_modulus {
			let tmp = total_coeff_modulus.clone();
			multiply_uint_u64(&tmp, q.value(), &mut total_coeff_modulus);
		}
		let total_coeff_modulus_bit_count = significant_bit_count(&total_coeff_modulus);

		let mut coeff_div_plain_modulus = vec![];
		let mut plain_upper_half_threshold = 0;
		let mut plain_upper_half_increment = vec![];
		let mut upper_half_increment = vec![];
		let mut coeff_mod_plain_modulus = 0;
		let mut using_fast_plain_lift = false;
		let mut using_batching = false;
		if scheme == SchemeType::Bfv {
			let t = plain_modulus.value();

			// Delta = floor(q/t) per prime and q mod t.
			let mut quotient = vec![0u64; k];
			coeff_mod_plain_modulus = divide_uint_by_u64(&total_coeff_modulus, t, &mut quotient);
			coeff_div_plain_modulus = coeff_modulus
				.iter()
				.map(|q| modulo_uint(&quotient, q.value()))
				.collect();

			plain_upper_half_threshold = (t + 1) >> 1;
			upper_half_increment = coeff_modulus
				.iter()
				.map(|q| q.reduce_u128(coeff_mod_plain_modulus as u128))
				.collect();

			using_fast_plain_lift = coeff_modulus.iter().all(|q| q.value() > t);
			plain_upper_half_increment = if using_fast_plain_lift {
				coeff_modulus.iter().map(|q| q.value() - t).collect()
			} else {
				// q - t shared across primes, k words.
				let mut increment = total_coeff_modulus.clone();
				let borrow = crate::util::uintarith::sub_uint(
					&total_coeff_modulus,
					&{
						let mut wide_t = vec![0u64; k];
						wide_t[0] = t;
						wide_t
					},
					&mut increment,
				);
				if borrow {
					return Err(Error::InvalidParameters);
				}
				increment
			};

			using_batching = plain_modulus.is_prime()
				&& plain_modulus.value() % (2 * n as u64) == 1;
		}

		let qualifiers = EncryptionParameterQualifiers {
			using_fft: true,
			using_ntt: true,
			using_batching,
			using_fast_plain_lift,
			using_descending_modulus_chain: coeff_modulus
				.windows(2)
				.all(|w| w[0].value() > w[1].value()),
			security_level,
		};

		Ok(Self {
			parms,
			qualifiers,
			ntt_tables,
			base_converter,
			total_coeff_modulus,
			total_coeff_modulus_bit_count,
			coeff_div_plain_modulus,
			plain_upper_half_threshold,
			plain_upper_half_increment,
			upper_half_increment,
			coeff_mod_plain_modulus,
			chain_index: 0,
			prev_parms_id: None,
			next_parms_id: None,
		})
	}

	/// The encryption parameters of this node.
	pub fn parms(&self) -> &EncryptionParameters {
		&self.parms
	}

	/// This node's parameter-set identifier.
	pub fn parms_id(&self) -> ParmsId {
		self.parms.parms_id()
	}

	/// The qualifier flags of this node.
	pub fn qualifiers(&self) -> &EncryptionParameterQualifiers {
		&self.qualifiers
	}

	/// NTT tables for each prime of this node's coefficient modulus.
	pub fn ntt_tables(&self) -> &[NttTables] {
		&self.ntt_tables
	}

	/// The base converter over this node's coefficient base.
	pub fn base_converter(&self) -> &BaseConverter {
		&self.base_converter
	}

	/// The coefficient modulus as a multiprecision product.
	pub fn total_coeff_modulus(&self) -> &[u64] {
		&self.total_coeff_modulus
	}

	/// Bit length of the coefficient modulus product.
	pub fn total_coeff_modulus_bit_count(&self) -> u32 {
		self.total_coeff_modulus_bit_count
	}

	/// floor(q/t) modulo each prime (scheme B).
	pub fn coeff_div_plain_modulus(&self) -> &[u64] {
		&self.coeff_div_plain_modulus
	}

	/// ceil(t/2), the first plaintext value representing a negative.
	pub fn plain_upper_half_threshold(&self) -> u64 {
		self.plain_upper_half_threshold
	}

	/// The per-prime lift increment q_i - t, or q - t as a multiprecision
	/// value when some prime does not exceed t.
	pub fn plain_upper_half_increment(&self) -> &[u64] {
		&self.plain_upper_half_increment
	}

	/// (q mod t) modulo each prime (scheme B).
	pub fn upper_half_increment(&self) -> &[u64] {
		&self.upper_half_increment
	}

	/// q mod t (scheme B).
	pub fn coeff_mod_plain_modulus(&self) -> u64 {
		self.coeff_mod_plain_modulus
	}

	/// Position in the modulus switching chain; the key level has the
	/// largest index and the last node index zero.
	pub fn chain_index(&self) -> usize {
		self.chain_index
	}

	/// Identifier of the previous (larger) node, if any.
	pub fn prev_parms_id(&self) -> Option<ParmsId> {
		self.prev_parms_id
	}

	/// Identifier of the next (smaller) node, if any.
	pub fn next_parms_id(&self) -> Option<ParmsId> {
		self.next_parms_id
	}

	pub(crate) fn set_chain_links(
		&mut self,
		chain_index: usize,
		prev: Option<ParmsId>,
		next: Option<ParmsId>,
	) {
		self.chain_index = chain_index;
		self.prev_parms_id = prev;
		self.next_parms_id = next;
	}
}
