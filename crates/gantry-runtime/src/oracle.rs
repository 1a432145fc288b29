//! Element-wise comparison of device results against host references.

/// Count elements where `(expected[i] - actual[i])^2 < tolerance^2`.
///
/// Compares `min(element_count, expected.len(), actual.len())` elements.
/// A negative tolerance counts as zero. Mismatches are logged at debug level;
/// the function itself never fails.
pub fn verify(expected: &[f32], actual: &[f32], element_count: usize, tolerance: f32) -> usize {
    let tolerance = tolerance.max(0.0);
    let limit = tolerance * tolerance;
    count_passing(expected, actual, element_count, |e, a| {
        let diff = e - a;
        diff * diff < limit
    })
}

/// Count elements whose relative error `|(actual - expected) / expected|` is
/// below `tolerance`.
pub fn verify_relative(
    expected: &[f32],
    actual: &[f32],
    element_count: usize,
    tolerance: f32,
) -> usize {
    count_passing(expected, actual, element_count, |e, a| {
        if e == a {
            return true;
        }
        ((a - e) / e).abs() < tolerance
    })
}

fn count_passing(
    expected: &[f32],
    actual: &[f32],
    element_count: usize,
    passes: impl Fn(f32, f32) -> bool,
) -> usize {
    let count = element_count.min(expected.len()).min(actual.len());

    expected[..count]
        .iter()
        .zip(&actual[..count])
        .enumerate()
        .filter(|&(index, (&e, &a))| {
            let ok = passes(e, a);
            if !ok {
                tracing::debug!(index, expected = e, actual = a, "mismatch");
            }
            ok
        })
        .count()
}

/// Pass count over a compared range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub passed: usize,
    pub total: usize,
}

impl Verification {
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }

    /// Elements outside tolerance.
    pub fn failed(&self) -> usize {
        self.total - self.passed
    }
}

impl std::fmt::Display for Verification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} out of {} results were correct", self.passed, self.total)
    }
}

/// How the oracle judges one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tolerance {
    /// Squared absolute difference below `tol^2`.
    Absolute(f32),
    /// Relative error below `tol`.
    Relative(f32),
}

/// Host-side result checker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultOracle {
    tolerance: Tolerance,
}

impl ResultOracle {
    pub fn absolute(tolerance: f32) -> Self {
        Self {
            tolerance: Tolerance::Absolute(tolerance),
        }
    }

    pub fn relative(tolerance: f32) -> Self {
        Self {
            tolerance: Tolerance::Relative(tolerance),
        }
    }

    /// Compare every element both slices have.
    pub fn check(&self, expected: &[f32], actual: &[f32]) -> Verification {
        let total = expected.len().min(actual.len());
        let passed = match self.tolerance {
            Tolerance::Absolute(tol) => verify(expected, actual, total, tol),
            Tolerance::Relative(tol) => verify_relative(expected, actual, total, tol),
        };
        Verification { passed, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let data: Vec<f32> = (0..1024).map(|i| i as f32).collect();
        assert_eq!(verify(&data, &data, 1024, 0.001), 1024);
    }

    #[test]
    fn test_counts_mismatches() {
        let expected = [1.0, 2.0, 3.0, 4.0];
        let actual = [1.0, 2.5, 3.0, 4.0005];
        assert_eq!(verify(&expected, &actual, 4, 0.001), 3);
    }

    #[test]
    fn test_clamps_to_shortest() {
        let expected = [1.0, 2.0, 3.0];
        let actual = [1.0, 2.0];
        assert_eq!(verify(&expected, &actual, 10, 0.1), 2);
        assert_eq!(verify(&expected, &actual, 1, 0.1), 1);
        assert_eq!(verify(&[], &[], 5, 0.1), 0);
    }

    #[test]
    fn test_zero_tolerance_passes_nothing() {
        // d^2 < 0 never holds.
        assert_eq!(verify(&[1.0], &[1.0], 1, 0.0), 0);
    }

    #[test]
    fn test_monotonic_in_tolerance() {
        let expected: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let actual: Vec<f32> = expected
            .iter()
            .enumerate()
            .map(|(i, v)| v + (i as f32) * 0.01)
            .collect();

        let mut previous = 0;
        for step in 0..20 {
            let tol = step as f32 * 0.05;
            let passed = verify(&expected, &actual, 64, tol);
            assert!(passed >= previous, "tolerance {tol} passed {passed} < {previous}");
            previous = passed;
        }
        assert_eq!(previous, 64);
    }

    #[test]
    fn test_negative_tolerance_passes_nothing() {
        let expected = [1.0, 2.0, 3.0];
        let actual = [1.5, 2.0, 3.0];
        assert_eq!(verify(&expected, &actual, 3, -1.0), 0);

        let mut previous = 0;
        for tol in [-1.0, -0.1, 0.0, 0.1, 1.0] {
            let passed = verify(&expected, &actual, 3, tol);
            assert!(passed >= previous, "pass count dropped at tolerance {tol}");
            previous = passed;
        }
        assert_eq!(previous, 3);
    }

    #[test]
    fn test_nan_never_passes() {
        assert_eq!(verify(&[1.0], &[f32::NAN], 1, 1.0), 0);
        assert_eq!(verify_relative(&[1.0], &[f32::NAN], 1, 1.0), 0);
    }

    #[test]
    fn test_relative() {
        let expected = [1000.0, 0.0, 2.0];
        let actual = [1000.5, 0.0, 2.1];
        // 5e-4 and exact pass, 5e-2 fails.
        assert_eq!(verify_relative(&expected, &actual, 3, 0.001), 2);
    }

    #[test]
    fn test_oracle_check() {
        let oracle = ResultOracle::absolute(0.001);
        let result = oracle.check(&[1.0, 2.0, 3.0], &[1.0, 2.0, 9.0]);
        assert_eq!(result, Verification { passed: 2, total: 3 });
        assert!(!result.all_passed());
        assert_eq!(result.failed(), 1);
        assert_eq!(result.to_string(), "2 out of 3 results were correct");

        let result = ResultOracle::relative(0.01).check(&[100.0], &[100.5]);
        assert!(result.all_passed());
    }
}
