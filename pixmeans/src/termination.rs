//! Stopping rules for a single k-means attempt

/// Default maximum number of iterations for each attempt
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// Default threshold on the change in total squared error between iterations
pub const DEFAULT_EPSILON: f64 = 1e-3;

/// Which checks end the convergence loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criteria {
	/// Stop after a fixed number of iterations
	MaxIterations,
	/// Stop once the total error changes by at most epsilon
	Epsilon,
	/// Stop as soon as either of the above holds
	Either,
}

/// When an attempt's loop stops
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminationPolicy {
	/// The checks to perform
	criteria: Criteria,
	/// Iteration count at which to stop, at least `1`
	max_iterations: u32,
	/// Error delta at or below which to stop
	epsilon: f64,
}

impl TerminationPolicy {
	/// Create a new policy.
	///
	/// A `max_iterations` of `0` is treated as `1`.
	/// A negative or `NaN` `epsilon` is treated as `0.0`, so the loop still stops once the error settles.
	#[must_use]
	pub fn new(criteria: Criteria, max_iterations: u32, epsilon: f64) -> Self {
		Self {
			criteria,
			max_iterations: max_iterations.max(1),
			epsilon: epsilon.max(0.0),
		}
	}

	/// The checks this policy performs
	#[must_use]
	pub const fn criteria(&self) -> Criteria {
		self.criteria
	}

	/// The iteration count at which the loop stops
	#[must_use]
	pub const fn max_iterations(&self) -> u32 {
		self.max_iterations
	}

	/// The error delta at or below which the loop stops
	#[must_use]
	pub const fn epsilon(&self) -> f64 {
		self.epsilon
	}

	/// Whether the iteration count is checked
	#[must_use]
	pub const fn checks_iterations(&self) -> bool {
		matches!(self.criteria, Criteria::MaxIterations | Criteria::Either)
	}

	/// Whether the error delta is checked
	#[must_use]
	pub const fn checks_epsilon(&self) -> bool {
		matches!(self.criteria, Criteria::Epsilon | Criteria::Either)
	}
}

impl Default for TerminationPolicy {
	fn default() -> Self {
		Self::new(Criteria::Either, DEFAULT_MAX_ITERATIONS, DEFAULT_EPSILON)
	}
}
