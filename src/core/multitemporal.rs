//! Multi-temporal (Quegan-Yu) speckle filtering over a time-ordered stack.
//!
//! For every target scene a window of neighbor scenes is chosen, each
//! neighbor contributes the ratio between its raw and spatially filtered
//! intensity, and the averaged ratio rescales the filtered target:
//!
//! `J_T = F(I_T) * mean_k(I_k / F(I_k))`

use crate::core::speckle_filter::{SpeckleFilter, SpeckleFilterType};
use crate::types::{ProcessedScene, SarError, SarRealImage, SarResult};
use ndarray::{Array2, Zip};
use std::collections::BTreeMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Choose the neighbor window for `target` in a stack of `len` time-ordered scenes.
///
/// Takes the `count` scenes closest before the target. When fewer exist, the
/// remainder is filled with the earliest scenes after it. The result never
/// contains the target, has `min(count, len - 1)` entries and is ascending.
pub fn select_neighbors(target: usize, len: usize, count: usize) -> Vec<usize> {
    if target >= len {
        return Vec::new();
    }
    let wanted = count.min(len - 1);
    let before = target.min(wanted);

    let mut neighbors: Vec<usize> = (target - before..target).collect();
    let after = wanted - before;
    neighbors.extend(target + 1..target + 1 + after);
    neighbors
}

/// Per-target working state; dropped once the target is filtered
#[derive(Debug, Clone)]
pub struct FilterContext {
    pub target: usize,
    pub neighbors: Vec<usize>,
    /// Mean raw/filtered ratio per band, NaN where no neighbor had a valid ratio
    pub reference: BTreeMap<String, SarRealImage>,
}

/// Spatial filter output and ratio image of one scene band
struct BandTerms {
    filtered: SarRealImage,
    ratio: SarRealImage,
}

pub struct MultiTemporalFilter {
    filter: SpeckleFilter,
    filter_type: SpeckleFilterType,
    neighbor_count: usize,
}

impl MultiTemporalFilter {
    pub fn new(filter: SpeckleFilter, filter_type: SpeckleFilterType, neighbor_count: usize) -> Self {
        Self { filter, filter_type, neighbor_count }
    }

    /// Filter every scene of the stack. Requires the complete, time-ordered collection.
    pub fn apply(&self, scenes: Vec<ProcessedScene>) -> SarResult<Vec<ProcessedScene>> {
        if scenes.len() < 2 {
            return Err(SarError::InsufficientNeighbors { available: scenes.len() });
        }

        log::info!(
            "Multi-temporal {} filtering of {} scenes with up to {} neighbors",
            self.filter_type,
            scenes.len(),
            self.neighbor_count
        );

        let terms = self.compute_terms(&scenes)?;

        let filter_one = |(index, scene): (usize, &ProcessedScene)| -> SarResult<BTreeMap<String, SarRealImage>> {
            let context = self.build_context(&terms, &scenes, index)?;
            log::debug!("Scene {} uses neighbors {:?}", scene.id(), context.neighbors);

            let mut bands = BTreeMap::new();
            for (band, reference) in &context.reference {
                let raw = &scene.bands[band];
                let filtered = &terms[index][band].filtered;
                let mut out = Array2::<f32>::zeros(raw.dim());
                Zip::from(&mut out)
                    .and(raw)
                    .and(filtered)
                    .and(reference)
                    .for_each(|o, &x, &f, &r| {
                        *o = if !(x.is_finite() && x > 0.0) {
                            x
                        } else if r.is_finite() {
                            f * r
                        } else {
                            f
                        };
                    });
                bands.insert(band.clone(), out);
            }
            Ok(bands)
        };

        #[cfg(feature = "parallel")]
        let results: Vec<SarResult<BTreeMap<String, SarRealImage>>> =
            scenes.par_iter().enumerate().map(filter_one).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<SarResult<BTreeMap<String, SarRealImage>>> =
            scenes.iter().enumerate().map(filter_one).collect();

        let mut output = Vec::with_capacity(scenes.len());
        for (mut scene, result) in scenes.into_iter().zip(results) {
            scene.bands.extend(result?);
            output.push(scene);
        }
        Ok(output)
    }

    /// Neighbor window and per-band reference ratio for one target
    pub fn context(&self, scenes: &[ProcessedScene], target: usize) -> SarResult<FilterContext> {
        let terms = self.compute_terms(scenes)?;
        self.build_context(&terms, scenes, target)
    }

    fn compute_terms(&self, scenes: &[ProcessedScene]) -> SarResult<Vec<BTreeMap<String, BandTerms>>> {
        let terms_for = |scene: &ProcessedScene| -> SarResult<BTreeMap<String, BandTerms>> {
            let mut terms = BTreeMap::new();
            for band in scene.polarization_bands() {
                let raw = &scene.bands[&band];
                let filtered = self.filter.apply(self.filter_type, raw)?;
                let ratio = Zip::from(raw).and(&filtered).map_collect(|&x, &f| {
                    if x.is_finite() && x > 0.0 && f.is_finite() && f > 0.0 {
                        x / f
                    } else {
                        f32::NAN
                    }
                });
                terms.insert(band, BandTerms { filtered, ratio });
            }
            Ok(terms)
        };

        #[cfg(feature = "parallel")]
        let terms = scenes.par_iter().map(terms_for).collect();
        #[cfg(not(feature = "parallel"))]
        let terms = scenes.iter().map(terms_for).collect();

        terms
    }

    fn build_context(
        &self,
        terms: &[BTreeMap<String, BandTerms>],
        scenes: &[ProcessedScene],
        target: usize,
    ) -> SarResult<FilterContext> {
        let neighbors = select_neighbors(target, scenes.len(), self.neighbor_count);
        let mut reference = BTreeMap::new();

        for (band, target_terms) in &terms[target] {
            let shape = target_terms.ratio.dim();
            let mut sum = Array2::<f32>::zeros(shape);
            let mut count = Array2::<u32>::zeros(shape);

            for &k in &neighbors {
                let Some(neighbor) = terms[k].get(band) else {
                    log::warn!("Neighbor {} has no {} band, skipped", scenes[k].id(), band);
                    continue;
                };
                if neighbor.ratio.dim() != shape {
                    return Err(SarError::Processing(format!(
                        "Band {} of {} has shape {:?}, target {} has {:?}",
                        band,
                        scenes[k].id(),
                        neighbor.ratio.dim(),
                        scenes[target].id(),
                        shape
                    )));
                }
                Zip::from(&mut sum)
                    .and(&mut count)
                    .and(&neighbor.ratio)
                    .for_each(|s, c, &r| {
                        if r.is_finite() {
                            *s += r;
                            *c += 1;
                        }
                    });
            }

            let mean = Zip::from(&sum)
                .and(&count)
                .map_collect(|&s, &c| if c > 0 { s / c as f32 } else { f32::NAN });
            reference.insert(band.clone(), mean);
        }

        Ok(FilterContext { target, neighbors, reference })
    }
}
