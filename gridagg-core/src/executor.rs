//! Reduction execution
//!
//! Every output cell is computed independently: the executor gathers the `(value, weight)`
//! samples of all input cells contributing to it (across every collapsed axis, the grouped
//! axis and the mask region at once), applies the missing-value policy and then the
//! operator. Cells with zero weight are excluded and never count as missing.
//!
//! Output cells are written exactly once into a freshly allocated buffer. Above the
//! configured threshold the cells are computed in parallel with rayon. A rolling plan with
//! `drop_missing` then removes positions of the rolling dimension holding missing results.

use crate::array::{LabelledArray, LabelledData, MissingValue};
use crate::config::EngineConfig;
use crate::coordinate::Dimension;
use crate::errors::{AggError, AggResult};
use crate::mask::SpatialWeightRaster;
use crate::metadata::{append_history, reduced_attributes, ProvenanceRecord};
use crate::plan::{AxisGrouping, OutputAxis, ReductionPlan};
use crate::request::{DropMissing, MissingPolicy, Operator};
use crate::stats;
use log::debug;
use ndarray::{ArrayD, Axis, IxDyn};
use rayon::prelude::*;
use std::sync::Arc;

/// Row-major strides of `shape`
fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for a in (0..shape.len().saturating_sub(1)).rev() {
        strides[a] = strides[a + 1] * shape[a + 1];
    }
    strides
}

/// Apply the missing-value policy and `operator` to the gathered samples of one cell
///
/// Returns `Ok(None)` for a missing result.
///
/// # Arguments
///
/// * `samples` - Valid `(value, weight)` pairs with positive weights
/// * `missing` - Number of contributing cells holding a missing value
/// * `min_valid` - Minimum number of valid samples for a non-missing result
/// * `threshold` - Sample count above which compensated summation is used
pub fn reduce_samples(
    operator: Operator,
    policy: MissingPolicy,
    samples: &mut [(f64, f64)],
    missing: usize,
    min_valid: usize,
    threshold: usize,
) -> AggResult<Option<f64>> {
    match policy {
        MissingPolicy::RequireComplete if missing > 0 => {
            return Err(AggError::IncompleteData { missing })
        }
        MissingPolicy::Propagate if missing > 0 => return Ok(None),
        _ => {}
    }
    if samples.len() < min_valid {
        return Ok(None);
    }
    if operator == Operator::Count {
        return Ok(Some(samples.len() as f64));
    }
    if samples.is_empty() {
        return Ok(None);
    }
    let value = match operator {
        Operator::Mean => stats::weighted_mean(samples, threshold),
        Operator::Sum => stats::weighted_sum(samples, threshold),
        Operator::Min => stats::min_value(samples),
        Operator::Max => stats::max_value(samples),
        Operator::Std => stats::weighted_std(samples, threshold),
        Operator::Median => stats::weighted_quantile(samples, 0.5),
        Operator::Percentile(p) => stats::weighted_quantile(samples, p / 100.0),
        Operator::Count => samples.len() as f64,
    };
    Ok(Some(value))
}

/// Read-only state shared by all output cells
struct CellContext<'a> {
    plan: &'a ReductionPlan,
    values: &'a [f64],
    weights: Option<&'a [f64]>,
    missing: MissingValue,
    strides: Vec<usize>,
    out_shape: Vec<usize>,
    full: Vec<Vec<usize>>,
    threshold: usize,
}

impl<'a> CellContext<'a> {
    fn reduce_cell(&self, k: usize) -> AggResult<Option<f64>> {
        let plan = self.plan;
        let ndim = self.strides.len();

        // Unravel the output index
        let mut out_idx = vec![0; self.out_shape.len()];
        let mut rem = k;
        for a in (0..self.out_shape.len()).rev() {
            out_idx[a] = rem % self.out_shape[a];
            rem /= self.out_shape[a];
        }

        let mut fixed = vec![0; ndim];
        let mut region = 0;
        let mut group = 0;
        for (pos, axis) in plan.layout().iter().enumerate() {
            match axis {
                OutputAxis::Region => region = out_idx[pos],
                OutputAxis::Input(a) => fixed[*a] = out_idx[pos],
                OutputAxis::Grouped(_) => group = out_idx[pos],
            }
        }
        let grouping = plan.grouping();
        let selections: Vec<&[usize]> = (0..ndim)
            .map(|a| match grouping {
                Some(g) if g.axis == a => g.members[group].as_slice(),
                _ if plan.collapsed_axes().contains(&a) => self.full[a].as_slice(),
                _ => std::slice::from_ref(&fixed[a]),
            })
            .collect();
        let mask: Option<(&SpatialWeightRaster, usize, usize)> = plan
            .regions()
            .map(|r| (r.rasters[region].as_ref(), r.lat_axis, r.lon_axis));

        let mut samples = Vec::new();
        let mut missing = 0;
        if selections.iter().all(|s| !s.is_empty()) {
            let mut pos = vec![0; ndim];
            'cells: loop {
                let mut offset = 0;
                for a in 0..ndim {
                    offset += selections[a][pos[a]] * self.strides[a];
                }
                let mut weight = self.weights.map_or(1.0, |w| w[offset]);
                if let Some((raster, lat, lon)) = mask {
                    let (i, j) = (selections[lat][pos[lat]], selections[lon][pos[lon]]);
                    weight *= raster.weights()[[i, j]];
                }
                if weight > 0.0 {
                    let value = self.values[offset];
                    if self.missing.is_missing(value) {
                        missing += 1;
                    } else {
                        samples.push((value, weight));
                    }
                }

                // Advance the odometer over the selected positions
                let mut a = ndim;
                loop {
                    if a == 0 {
                        break 'cells;
                    }
                    a -= 1;
                    pos[a] += 1;
                    if pos[a] < selections[a].len() {
                        break;
                    }
                    pos[a] = 0;
                }
            }
        }

        reduce_samples(
            plan.operator(),
            plan.policy(),
            &mut samples,
            missing,
            grouping.map_or(0, |g| g.min_valid),
            self.threshold,
        )
    }
}

/// Runs [`ReductionPlan`]s
pub struct Executor<'a> {
    config: &'a EngineConfig,
}

impl<'a> Executor<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Apply `plan` to `data`
    ///
    /// The input is never modified. Missing results are written with the input's
    /// missing-value encoding.
    ///
    /// # Errors
    ///
    /// * [`AggError::ShapeMismatch`] if `data` is not the array the plan was built for
    /// * [`AggError::IncompleteData`] under the `require-complete` policy
    pub fn execute<D: LabelledData + ?Sized>(
        &self,
        data: &D,
        plan: &ReductionPlan,
    ) -> AggResult<LabelledArray> {
        if data.shape() != plan.input_shape() {
            return Err(AggError::ShapeMismatch(format!(
                "plan was built for shape {:?} but the array has shape {:?}",
                plan.input_shape(),
                data.shape()
            )));
        }
        let values = data.values();
        let values = values.as_standard_layout();
        let flat = values
            .as_slice()
            .ok_or_else(|| AggError::ShapeMismatch("input values are not contiguous".into()))?;
        let weights = match plan.weights() {
            Some(w) => Some(w.as_slice().ok_or_else(|| {
                AggError::ShapeMismatch("weights are not contiguous".to_string())
            })?),
            None => None,
        };
        let missing_value = data.missing_value();

        let shape = data.shape();
        let context = CellContext {
            plan,
            values: flat,
            weights,
            missing: missing_value,
            strides: strides(&shape),
            out_shape: plan.output_shape(),
            full: shape.iter().map(|n| (0..*n).collect()).collect(),
            threshold: self.config.compensated_sum_threshold,
        };

        let n_out: usize = context.out_shape.iter().product();
        let results: Vec<Option<f64>> = if n_out >= self.config.parallel_threshold {
            (0..n_out)
                .into_par_iter()
                .map(|k| context.reduce_cell(k))
                .collect::<AggResult<_>>()?
        } else {
            (0..n_out)
                .map(|k| context.reduce_cell(k))
                .collect::<AggResult<_>>()?
        };

        let empty = results.iter().filter(|r| r.is_none()).count();
        if empty > 0 {
            debug!(
                "{} of {} output cell(s) have no valid contributors and are set to missing",
                empty, n_out
            );
        }
        let fill = missing_value.value();
        let output = ArrayD::from_shape_vec(
            IxDyn(&context.out_shape),
            results.into_iter().map(|r| r.unwrap_or(fill)).collect(),
        )
        .map_err(|e| AggError::ShapeMismatch(e.to_string()))?;

        let attrs = reduced_attributes(
            data.attributes(),
            plan.operator(),
            plan.method_dims(),
            plan.area_weighted(),
            plan.provenance(),
        );
        let result = LabelledArray::with_attrs(output, plan.output_dims().to_vec(), attrs)?
            .with_missing_value(missing_value);
        match plan.grouping() {
            Some(grouping) => match grouping.drop_missing {
                Some(how) => drop_missing_positions(result, plan, grouping, how),
                None => Ok(result),
            },
            None => Ok(result),
        }
    }
}

/// Remove positions of the grouped output axis whose values are missing
fn drop_missing_positions(
    result: LabelledArray,
    plan: &ReductionPlan,
    grouping: &AxisGrouping,
    how: DropMissing,
) -> AggResult<LabelledArray> {
    let Some(pos) = plan
        .layout()
        .iter()
        .position(|a| *a == OutputAxis::Grouped(grouping.axis))
    else {
        return Ok(result);
    };
    let missing = result.missing_value();
    let keep: Vec<usize> = result
        .values()
        .axis_iter(Axis(pos))
        .enumerate()
        .filter(|(_, lane)| match how {
            DropMissing::Any => !lane.iter().any(|v| missing.is_missing(*v)),
            DropMissing::All => !lane.iter().all(|v| missing.is_missing(*v)),
        })
        .map(|(k, _)| k)
        .collect();
    let len = grouping.dimension.len();
    if keep.len() == len {
        return Ok(result);
    }
    debug!(
        "Dropping {} of {} position(s) along '{}' with missing values",
        len - keep.len(),
        len,
        grouping.dimension.name
    );
    result.select(&grouping.dimension.name, &keep)
}

/// Mask `data` with each raster without reducing
///
/// The result has dimensions `[dimension] + data dims`; cells outside a region (zero
/// weight) are set to missing.
pub fn apply_masks<D: LabelledData + ?Sized>(
    data: &D,
    lat_axis: usize,
    lon_axis: usize,
    rasters: &[Arc<SpatialWeightRaster>],
    dimension: Dimension,
    record: &ProvenanceRecord,
) -> AggResult<LabelledArray> {
    let missing = data.missing_value();
    let fill = missing.value();
    let mut attrs = data.attributes().clone();
    append_history(&mut attrs, record);
    let masked: Vec<LabelledArray> = rasters
        .iter()
        .map(|raster| {
            let mut values = data.values().to_owned();
            for (idx, v) in values.indexed_iter_mut() {
                if !(raster.weights()[[idx[lat_axis], idx[lon_axis]]] > 0.0) {
                    *v = fill;
                }
            }
            LabelledArray::with_attrs(values, data.dimensions().to_vec(), attrs.clone())
                .map(|a| a.with_missing_value(missing))
        })
        .collect::<AggResult<_>>()?;
    LabelledArray::stack(&masked, dimension)
}
