use static_assertions::const_assert;

/// A type representing all errors that can occur in the library.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	/// User-supplied encryption parameters violate the documented bounds or
	/// prime-selection requirements. Returned from context construction.
	#[error("The encryption parameters are not valid")]
	InvalidParameters,

	/// Operation inputs failed metadata validation. The operation did not
	/// modify any state.
	#[error("Invalid argument: {0}")]
	InvalidArgument(&'static str),

	/// An internal invariant was violated. Indicates a bug or corrupt input;
	/// the caller must not try to recover.
	#[error("Logic error: {0}")]
	LogicError(&'static str),

	/// The operation is not supported by the active scheme.
	#[error("Unsupported operation: {0}")]
	Unsupported(&'static str),

	/// User failed to set a polynomial degree.
	#[error("Polynomial degree not set")]
	DegreeNotSet,

	/// User failed to set a coefficient modulus.
	#[error("Coefficient modulus not set")]
	CoefficientModulusNotSet,

	/// User failed to set a plaintext modulus.
	#[error("Plain modulus not set")]
	PlainModulusNotSet,

	/// The modulus switching chain cannot shrink below a single prime.
	#[error("Cannot reduce the modulus from a set size of 1 to 0")]
	ModulusChainTooSmall,
}

const_assert!(std::mem::size_of::<Error>() <= 24);

/// The result type for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
