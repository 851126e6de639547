//! Jacobian-derived statistics of the transform over a sample set.
//!
//! With `C = (1/M) sum_j J_j^T J_j` over `M` samples:
//! - `TrC = tr C`
//! - `TrCC = ||C||_F^2`
//! - `maxJJ = max_j ||J_j||_F^2`
//! - `maxJCJ = max_j tr(J_j C J_j^T)`
//!
//! Three algorithms compute the same quantities; the one matching the transform's
//! [`JacobianStructure`] is chosen once when the estimator is built.

use crate::core::sampler::ImageSample;
use crate::optimizer::scales::ParameterScales;
use crate::transform::{JacobianBuffer, JacobianStructure, SparseJacobianAdapter, Transform};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Number of contiguous sample partitions in the dense covariance reduction.
pub const REDUCTION_PARTITIONS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JacobianTerms {
    pub tr_c: f64,
    pub tr_cc: f64,
    pub max_jj: f64,
    pub max_jcj: f64,
}

impl fmt::Display for JacobianTerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TrC = {:.6e}, TrCC = {:.6e}, maxJJ = {:.6e}, maxJCJ = {:.6e}",
            self.tr_c, self.tr_cc, self.max_jj, self.max_jcj
        )
    }
}

/// Algorithm used to compute [`JacobianTerms`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JacobianTermsMethod {
    /// Dense `P x P` covariance.
    Generic,
    /// Closed form from the parameter scales.
    Translation,
    /// Sparse covariance keyed by parameter pairs.
    CompactSupport,
}

impl From<JacobianStructure> for JacobianTermsMethod {
    fn from(structure: JacobianStructure) -> Self {
        match structure {
            JacobianStructure::Generic => JacobianTermsMethod::Generic,
            JacobianStructure::Translation => JacobianTermsMethod::Translation,
            JacobianStructure::CompactSupport => JacobianTermsMethod::CompactSupport,
        }
    }
}

impl fmt::Display for JacobianTermsMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JacobianTermsMethod::Generic => write!(f, "generic"),
            JacobianTermsMethod::Translation => write!(f, "translation"),
            JacobianTermsMethod::CompactSupport => write!(f, "compact-support"),
        }
    }
}

/// Statistics plus, when requested, the dense covariance matrix.
#[derive(Debug, Clone)]
pub struct JacobianTermsEstimate {
    pub terms: JacobianTerms,
    pub covariance: Option<DMatrix<f64>>,
}

pub struct JacobianStatisticsEstimator<'a> {
    adapter: SparseJacobianAdapter<'a>,
    scales: &'a ParameterScales,
    method: JacobianTermsMethod,
}

impl<'a> JacobianStatisticsEstimator<'a> {
    pub fn new(transform: &'a dyn Transform, scales: &'a ParameterScales) -> Self {
        Self {
            adapter: SparseJacobianAdapter::new(transform).with_scales(scales),
            scales,
            method: transform.jacobian_structure().into(),
        }
    }

    /// Force an algorithm regardless of the transform's structure.
    pub fn with_method(mut self, method: JacobianTermsMethod) -> Self {
        self.method = method;
        self
    }

    pub fn method(&self) -> JacobianTermsMethod {
        self.method
    }

    /// Compute the statistics over `samples`. The covariance matrix is returned
    /// when `keep_covariance` is set; the generic algorithm always builds it.
    pub fn estimate(&self, samples: &[ImageSample], keep_covariance: bool) -> JacobianTermsEstimate {
        debug!(
            "Computing Jacobian terms over {} samples ({} algorithm)",
            samples.len(),
            self.method
        );
        if samples.is_empty() {
            return JacobianTermsEstimate {
                terms: JacobianTerms::default(),
                covariance: None,
            };
        }
        match self.method {
            JacobianTermsMethod::Generic => self.estimate_generic(samples, keep_covariance),
            JacobianTermsMethod::Translation => self.estimate_translation(keep_covariance),
            JacobianTermsMethod::CompactSupport => self.estimate_compact_support(samples, keep_covariance),
        }
    }

    fn estimate_generic(&self, samples: &[ImageSample], keep_covariance: bool) -> JacobianTermsEstimate {
        let parameters = self.adapter.number_of_parameters();
        let partition_size = samples.len().div_ceil(REDUCTION_PARTITIONS).max(1);

        let partials: Vec<DMatrix<f64>> = samples
            .par_chunks(partition_size)
            .map(|partition| {
                let mut buffer = JacobianBuffer::new();
                let mut dense = DMatrix::zeros(0, parameters);
                let mut partial = DMatrix::zeros(parameters, parameters);
                for sample in partition {
                    self.adapter.evaluate(&sample.point, &mut buffer);
                    scatter_dense(&buffer, parameters, &mut dense);
                    partial.gemm_tr(1.0, &dense, &dense, 1.0);
                }
                partial
            })
            .collect();

        let mut covariance = DMatrix::zeros(parameters, parameters);
        for partial in &partials {
            covariance += partial;
        }
        covariance /= samples.len() as f64;

        let (max_jj, max_jcj) = samples
            .par_chunks(partition_size)
            .map(|partition| {
                let mut buffer = JacobianBuffer::new();
                let mut maxima = (0.0_f64, 0.0_f64);
                for sample in partition {
                    self.adapter.evaluate(&sample.point, &mut buffer);
                    let jj = buffer.matrix.norm_squared();
                    let jcj = jcj_dense(&buffer, &covariance);
                    maxima = (maxima.0.max(jj), maxima.1.max(jcj));
                }
                maxima
            })
            .reduce(|| (0.0, 0.0), |a, b| (a.0.max(b.0), a.1.max(b.1)));

        JacobianTermsEstimate {
            terms: JacobianTerms {
                tr_c: covariance.trace(),
                tr_cc: covariance.norm_squared(),
                max_jj,
                max_jcj,
            },
            covariance: keep_covariance.then_some(covariance),
        }
    }

    fn estimate_translation(&self, keep_covariance: bool) -> JacobianTermsEstimate {
        let inverse_squared = self.scales.factors().map(|f| 1.0 / (f * f));
        let tr_c = inverse_squared.sum();
        let tr_cc = inverse_squared.norm_squared();
        JacobianTermsEstimate {
            terms: JacobianTerms {
                tr_c,
                tr_cc,
                max_jj: tr_c,
                max_jcj: tr_cc,
            },
            covariance: keep_covariance.then(|| DMatrix::from_diagonal(&inverse_squared)),
        }
    }

    fn estimate_compact_support(&self, samples: &[ImageSample], keep_covariance: bool) -> JacobianTermsEstimate {
        let mut buffer = JacobianBuffer::new();
        let mut accumulator = SparseCovariance::default();
        let mut active = Vec::with_capacity(self.adapter.number_of_nonzero_jacobian_indices());
        let mut max_jj = 0.0_f64;
        for sample in samples {
            self.adapter.evaluate(&sample.point, &mut buffer);
            accumulator.add_outer(&buffer, &mut active);
            max_jj = max_jj.max(buffer.matrix.norm_squared());
        }
        accumulator.scale(1.0 / samples.len() as f64);

        let mut max_jcj = 0.0_f64;
        for sample in samples {
            self.adapter.evaluate(&sample.point, &mut buffer);
            max_jcj = max_jcj.max(accumulator.jcj(&buffer));
        }

        let (tr_c, tr_cc) = accumulator.trace_and_frobenius();
        JacobianTermsEstimate {
            terms: JacobianTerms {
                tr_c,
                tr_cc,
                max_jj,
                max_jcj,
            },
            covariance: keep_covariance.then(|| accumulator.to_dense(self.adapter.number_of_parameters())),
        }
    }
}

/// Expand the sparse columns into a dense `D x P` Jacobian.
fn scatter_dense(buffer: &JacobianBuffer, parameters: usize, dense: &mut DMatrix<f64>) {
    let rows = buffer.matrix.nrows();
    if dense.shape() != (rows, parameters) {
        *dense = DMatrix::zeros(rows, parameters);
    } else {
        dense.fill(0.0);
    }
    for (column, &parameter) in buffer.indices.iter().enumerate() {
        dense.column_mut(parameter).copy_from(&buffer.matrix.column(column));
    }
}

/// `tr(J C J^T)` for sparse columns against a dense covariance.
fn jcj_dense(buffer: &JacobianBuffer, covariance: &DMatrix<f64>) -> f64 {
    let indices = &buffer.indices;
    let mut total = 0.0;
    for row in buffer.matrix.row_iter() {
        for (a, &pa) in indices.iter().enumerate() {
            let ja = row[a];
            if ja == 0.0 {
                continue;
            }
            let mut inner = 0.0;
            for (b, &pb) in indices.iter().enumerate() {
                inner += covariance[(pa, pb)] * row[b];
            }
            total += ja * inner;
        }
    }
    total
}

/// Upper triangle of a symmetric matrix keyed by `(row, col)` with `row <= col`.
#[derive(Debug, Default)]
struct SparseCovariance {
    entries: HashMap<(usize, usize), f64>,
}

impl SparseCovariance {
    /// Add `J^T J` one row at a time. Only the nonzero entries of a row pair up, so
    /// a spline row with `W` active weights costs `W^2 / 2` updates instead of
    /// `(D W)^2 / 2` column products.
    fn add_outer(&mut self, buffer: &JacobianBuffer, active: &mut Vec<(usize, f64)>) {
        let indices = &buffer.indices;
        for row in buffer.matrix.row_iter() {
            active.clear();
            active.extend(
                row.iter()
                    .zip(indices)
                    .filter(|(value, _)| **value != 0.0)
                    .map(|(&value, &parameter)| (parameter, value)),
            );
            for (a, &(pa, ja)) in active.iter().enumerate() {
                for &(pb, jb) in &active[a..] {
                    *self.entries.entry(ordered(pa, pb)).or_insert(0.0) += ja * jb;
                }
            }
        }
    }

    fn scale(&mut self, factor: f64) {
        for value in self.entries.values_mut() {
            *value *= factor;
        }
    }

    fn get(&self, p: usize, q: usize) -> f64 {
        self.entries.get(&ordered(p, q)).copied().unwrap_or(0.0)
    }

    /// Sums in key order, so repeated runs give bit-identical results.
    fn trace_and_frobenius(&self) -> (f64, f64) {
        let mut keys: Vec<&(usize, usize)> = self.entries.keys().collect();
        keys.sort_unstable();
        let mut trace = 0.0;
        let mut frobenius = 0.0;
        for key in keys {
            let value = self.entries[key];
            if key.0 == key.1 {
                trace += value;
                frobenius += value * value;
            } else {
                frobenius += 2.0 * value * value;
            }
        }
        (trace, frobenius)
    }

    fn jcj(&self, buffer: &JacobianBuffer) -> f64 {
        let indices = &buffer.indices;
        let mut total = 0.0;
        for row in buffer.matrix.row_iter() {
            for (a, &pa) in indices.iter().enumerate() {
                let ja = row[a];
                if ja == 0.0 {
                    continue;
                }
                for (b, &pb) in indices.iter().enumerate() {
                    let jb = row[b];
                    if jb != 0.0 {
                        total += ja * self.get(pa, pb) * jb;
                    }
                }
            }
        }
        total
    }

    fn to_dense(&self, parameters: usize) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(parameters, parameters);
        for (&(p, q), &value) in &self.entries {
            dense[(p, q)] = value;
            dense[(q, p)] = value;
        }
        dense
    }
}

fn ordered(p: usize, q: usize) -> (usize, usize) {
    if p <= q { (p, q) } else { (q, p) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{AffineTransform, BSplineTransform, TranslationTransform};
    use nalgebra::DVector;

    fn grid_samples(lo: f64, hi: f64, n: usize) -> Vec<ImageSample> {
        let mut samples = Vec::new();
        for i in 0..n {
            for j in 0..n {
                let t = |k: usize| lo + (hi - lo) * k as f64 / (n - 1) as f64;
                samples.push(ImageSample {
                    point: DVector::from_vec(vec![t(i), t(j)]),
                    value: 0.0,
                });
            }
        }
        samples
    }

    fn relative_eq(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1e-300)
    }

    #[test]
    fn test_method_follows_structure() {
        let scales = ParameterScales::identity(2);
        let translation = TranslationTransform::identity(2);
        assert_eq!(
            JacobianStatisticsEstimator::new(&translation, &scales).method(),
            JacobianTermsMethod::Translation
        );
        let scales = ParameterScales::identity(6);
        let affine = AffineTransform::identity(DVector::zeros(2)).unwrap();
        assert_eq!(
            JacobianStatisticsEstimator::new(&affine, &scales).method(),
            JacobianTermsMethod::Generic
        );
    }

    #[test]
    fn test_empty_sample_set_gives_zeros() {
        let scales = ParameterScales::identity(2);
        let translation = TranslationTransform::identity(2);
        let estimate = JacobianStatisticsEstimator::new(&translation, &scales).estimate(&[], true);
        assert_eq!(estimate.terms, JacobianTerms::default());
        assert!(estimate.covariance.is_none());
    }

    #[test]
    fn test_affine_generic_terms_by_hand() {
        // Two mirrored points: the linear cross terms cancel, xy = 2 survives.
        let samples = vec![
            ImageSample {
                point: DVector::from_vec(vec![1.0, 2.0]),
                value: 0.0,
            },
            ImageSample {
                point: DVector::from_vec(vec![-1.0, -2.0]),
                value: 0.0,
            },
        ];
        let scales = ParameterScales::identity(6);
        let affine = AffineTransform::identity(DVector::zeros(2)).unwrap();
        let estimate = JacobianStatisticsEstimator::new(&affine, &scales).estimate(&samples, true);

        assert!(relative_eq(estimate.terms.tr_c, 1.0 + 4.0 + 1.0 + 4.0 + 1.0 + 1.0));
        assert!(relative_eq(estimate.terms.tr_cc, 36.0 + 4.0 * 4.0));
        assert!(relative_eq(estimate.terms.max_jj, 12.0));
        assert!(relative_eq(estimate.terms.max_jcj, 52.0));
        let covariance = estimate.covariance.unwrap();
        assert_eq!(covariance.shape(), (6, 6));
        assert!(relative_eq(covariance[(0, 1)], 2.0));
    }

    #[test]
    fn test_compact_support_matches_generic_on_bspline() {
        let transform = BSplineTransform::new(vec![0.0, 0.0], vec![1.0, 1.0], vec![7, 6]).unwrap();
        let scales = ParameterScales::identity(transform.number_of_parameters());
        let samples = grid_samples(1.0, 3.9, 9);

        let sparse = JacobianStatisticsEstimator::new(&transform, &scales).estimate(&samples, true);
        let dense = JacobianStatisticsEstimator::new(&transform, &scales)
            .with_method(JacobianTermsMethod::Generic)
            .estimate(&samples, true);

        assert!(relative_eq(sparse.terms.tr_c, dense.terms.tr_c));
        assert!(relative_eq(sparse.terms.tr_cc, dense.terms.tr_cc));
        assert!(relative_eq(sparse.terms.max_jj, dense.terms.max_jj));
        assert!(relative_eq(sparse.terms.max_jcj, dense.terms.max_jcj));
        let difference = sparse.covariance.unwrap() - dense.covariance.unwrap();
        assert!(difference.amax() < 1e-12);
    }

    #[test]
    fn test_compact_support_matches_generic_in_3d() {
        let transform =
            BSplineTransform::new(vec![0.0; 3], vec![1.0; 3], vec![5, 4, 4]).unwrap();
        let parameters = transform.number_of_parameters();
        let squared_scales: Vec<f64> = (0..parameters).map(|i| 1.0 + (i % 3) as f64).collect();
        let scales = ParameterScales::from_config(&squared_scales, parameters).unwrap();
        let samples: Vec<ImageSample> = (0..40)
            .map(|i| {
                let t = i as f64 / 40.0;
                ImageSample {
                    point: DVector::from_vec(vec![1.0 + 1.9 * t, 1.0 + (3.0 * t).fract(), 1.2 + 0.5 * t]),
                    value: 0.0,
                }
            })
            .collect();

        let sparse = JacobianStatisticsEstimator::new(&transform, &scales).estimate(&samples, true);
        let dense = JacobianStatisticsEstimator::new(&transform, &scales)
            .with_method(JacobianTermsMethod::Generic)
            .estimate(&samples, true);

        assert!(relative_eq(sparse.terms.tr_c, dense.terms.tr_c));
        assert!(relative_eq(sparse.terms.tr_cc, dense.terms.tr_cc));
        assert!(relative_eq(sparse.terms.max_jj, dense.terms.max_jj));
        assert!(relative_eq(sparse.terms.max_jcj, dense.terms.max_jcj));
        let difference = sparse.covariance.unwrap() - dense.covariance.unwrap();
        assert!(difference.amax() < 1e-12);
    }
}
