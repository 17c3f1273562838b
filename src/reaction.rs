//! The reaction catalogue and its probability gates. Species and
//! reaction classes are read-only after
//! initialization; every probabilistic decision in this module consumes
//! exactly one draw from the shared [`KernelRng`](crate::rng::KernelRng).

use bitflags::bitflags;
use smallvec::SmallVec;

/// Sentinel species id matching any molecule.
pub const ALL_MOLECULES: u32 = u32::MAX;
/// Sentinel species id matching any volume molecule.
pub const ALL_VOLUME_MOLECULES: u32 = u32::MAX - 1;
/// Sentinel species id matching any surface molecule.
pub const ALL_SURFACE_MOLECULES: u32 = u32::MAX - 2;

bitflags! {
    /// Per-species behavior flags.
    #[derive(Default)]
    pub struct SpeciesFlags: u8 {
        const IS_VOL                 = 0b0001;
        const IS_SURF                = 0b0010;
        const CAN_DIFFUSE            = 0b0100;
        const CAN_REACT_WITH_SURFACE = 0b1000;
    }
}

/// A molecular species: its diffusion constant and the per-species
/// timestep/space-step derived from it, plus behavior flags.
#[derive(Clone, Debug)]
pub struct Species {
    pub id: u32,
    pub name: String,
    /// Diffusion constant D, cm^2/s.
    pub diffusion_constant: f64,
    /// Per-species timestep `Delta t_s`, derived from D and the base timestep.
    pub time_step: f64,
    /// Per-species space-step `sigma`, derived from D and `time_step`.
    pub space_step: f64,
    pub flags: SpeciesFlags,
}

impl Species {
    /// Derives `time_step` and `space_step` from the diffusion constant,
    /// the global base timestep, and an optional per-species
    /// `time_step_factor`.
    pub fn new_volume(id: u32, name: impl Into<String>, diffusion_constant: f64, base_time_step: f64, time_step_factor: f64) -> Self {
        let time_step = base_time_step * time_step_factor;
        // sigma = sqrt(4*D*dt) in 3D mean-squared-displacement terms; the
        // kernel's Gaussian sampler applies the remaining 1/sqrt(2)
        // per-component scaling itself (see `KernelRng::displacement_3d`).
        let space_step = (4.0 * diffusion_constant * time_step).max(0.0).sqrt();
        Self {
            id,
            name: name.into(),
            diffusion_constant,
            time_step,
            space_step,
            flags: SpeciesFlags::IS_VOL | SpeciesFlags::CAN_DIFFUSE,
        }
    }

    pub fn new_surface(id: u32, name: impl Into<String>, diffusion_constant: f64, base_time_step: f64, time_step_factor: f64) -> Self {
        let mut s = Self::new_volume(id, name, diffusion_constant, base_time_step, time_step_factor);
        s.flags = SpeciesFlags::IS_SURF | SpeciesFlags::CAN_DIFFUSE;
        s
    }

    pub fn is_volume(&self) -> bool {
        self.flags.contains(SpeciesFlags::IS_VOL)
    }

    pub fn is_surface(&self) -> bool {
        self.flags.contains(SpeciesFlags::IS_SURF)
    }
}

/// Tag distinguishing how a reaction class treats a non-firing collision
/// at a wall.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RxnType {
    Standard,
    Transparent,
    Reflect,
    AbsorbRegionBorder,
}

/// One outcome (product list + orientations) within a reaction class.
#[derive(Clone, Debug)]
pub struct Pathway {
    /// Unscaled probability weight of this pathway.
    pub probability: f64,
    pub products: Vec<ProductSpec>,
}

#[derive(Clone, Copy, Debug)]
pub struct ProductSpec {
    pub species: u32,
    /// `+1`/`-1` for surface products, ignored for volume products.
    pub orientation: i8,
}

/// A reaction class keyed by an ordered reactant tuple.
#[derive(Clone, Debug)]
pub struct RxnClass {
    pub reactants: SmallVec<[u32; 2]>,
    pub rxn_type: RxnType,
    pub pathways: Vec<Pathway>,
    /// First pathway's probability (used as the unimolecular rate constant
    /// `k_tot` and as the gate threshold in `test_bimolecular`).
    pub min_noreaction_p: f64,
    /// Sum of all pathway probabilities.
    pub max_fixed_p: f64,
    /// Non-decreasing cumulative probabilities, one per pathway;
    /// `cum_probs[last] == max_fixed_p`.
    pub cum_probs: Vec<f64>,
    /// Optional increasing `(time, rate)` schedule that rescales
    /// `max_fixed_p`/`cum_probs` at the given times.
    pub variable_rate: Option<Vec<(f64, f64)>>,
}

impl RxnClass {
    /// Builds a class from an ordered reactant tuple and its pathways,
    /// computing `min_noreaction_p`, `max_fixed_p`, and `cum_probs`.
    ///
    /// Returns an error if the reactant tuple is empty, any probability
    /// is negative, or there are no pathways (`ConfigInconsistent`
    /// conditions).
    pub fn new(reactants: SmallVec<[u32; 2]>, rxn_type: RxnType, pathways: Vec<Pathway>) -> Result<Self, String> {
        if reactants.is_empty() {
            return Err("reaction class with empty reactant tuple".to_string());
        }
        if pathways.is_empty() {
            return Err("reaction class with no pathways".to_string());
        }
        if pathways.iter().any(|p| p.probability < 0.0) {
            return Err("reaction class with a negative pathway probability".to_string());
        }

        let min_noreaction_p = pathways[0].probability;
        let mut cum_probs = Vec::with_capacity(pathways.len());
        let mut running = 0.0;
        for p in &pathways {
            running += p.probability;
            cum_probs.push(running);
        }
        let max_fixed_p = running;

        Ok(Self {
            reactants,
            rxn_type,
            pathways,
            min_noreaction_p,
            max_fixed_p,
            cum_probs,
            variable_rate: None,
        })
    }

    /// The rate in effect at `time`, applying the variable-rate schedule
    /// if present: the largest scheduled rate whose time has passed,
    /// falling back to `max_fixed_p` if none has.
    pub fn effective_max_fixed_p(&self, time: f64) -> f64 {
        match &self.variable_rate {
            None => self.max_fixed_p,
            Some(schedule) => schedule
                .iter()
                .rev()
                .find(|(t, _)| *t <= time)
                .map(|(_, rate)| *rate)
                .unwrap_or(self.max_fixed_p),
        }
    }

    /// Smallest index `i` with `p <= cum_probs[i] * local_factor`,
    /// found by binary search.
    pub fn pick_pathway(&self, p: f64, local_factor: f64) -> Option<usize> {
        binary_search_cum(&self.cum_probs, p, local_factor)
    }
}

/// Binary search for the smallest index `i` with `p <= table[i] * local_factor`.
fn binary_search_cum(table: &[f64], p: f64, local_factor: f64) -> Option<usize> {
    let mut lo = 0usize;
    let mut hi = table.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if p <= table[mid] * local_factor {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    if lo < table.len() {
        Some(lo)
    } else {
        None
    }
}

/// Outcome of a single bimolecular probability gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    NoReaction,
    Pathway(usize),
}

/// Single bimolecular gate `test_bimolecular`.
///
/// `u` is the caller-supplied draw from `KernelRng::uniform_open01`;
/// charged regardless of outcome so identical seeds reproduce runs
/// bit-exactly.
pub fn test_bimolecular(rxn: &RxnClass, scaling: f64, local_factor: f64, u: f64) -> GateOutcome {
    let local_factor = local_factor.max(1.0);
    let p_min = rxn.min_noreaction_p * local_factor;

    if p_min < scaling {
        let p = u * scaling;
        if p >= p_min {
            GateOutcome::NoReaction
        } else {
            match rxn.pick_pathway(p, local_factor) {
                Some(i) => GateOutcome::Pathway(i),
                None => GateOutcome::NoReaction,
            }
        }
    } else {
        let p_max = rxn.max_fixed_p * local_factor;
        if p_max >= scaling {
            let p = u * p_max;
            match rxn.pick_pathway(p, local_factor) {
                Some(i) => GateOutcome::Pathway(i),
                None => GateOutcome::NoReaction,
            }
        } else {
            let p = u * scaling;
            if p >= p_max {
                GateOutcome::NoReaction
            } else {
                match rxn.pick_pathway(p, local_factor) {
                    Some(i) => GateOutcome::Pathway(i),
                    None => GateOutcome::NoReaction,
                }
            }
        }
    }
}

/// One candidate class considered by [`test_many_bimolecular`]: the
/// class itself and its per-class scaling factor.
pub struct ManyRxnCandidate<'a> {
    pub rxn: &'a RxnClass,
    pub scaling: f64,
}

/// Multi-reaction gate `test_many_bimolecular`: builds a
/// cumulative table across classes, picks a class, then picks a pathway
/// within it from the residual probability.
pub fn test_many_bimolecular(classes: &[ManyRxnCandidate<'_>], local_factor: f64, u: f64) -> Option<(usize, usize)> {
    if classes.is_empty() {
        return None;
    }
    let local_factor = local_factor.max(1.0);

    let mut cum = Vec::with_capacity(classes.len());
    let mut running = 0.0;
    for c in classes {
        running += c.rxn.max_fixed_p * local_factor / c.scaling;
        cum.push(running);
    }
    let total = *cum.last().unwrap();

    let p = if total > 1.0 { u * total } else { u };
    if total <= 1.0 && p > total {
        return None;
    }

    let class_index = match cum.iter().position(|&c| p <= c) {
        Some(i) => i,
        None => return None,
    };
    let prev_cum = if class_index == 0 { 0.0 } else { cum[class_index - 1] };
    let residual = (p - prev_cum) * classes[class_index].scaling;

    classes[class_index]
        .rxn
        .pick_pathway(residual, local_factor)
        .map(|pathway| (class_index, pathway))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_class(probs: &[f64]) -> RxnClass {
        let pathways = probs
            .iter()
            .map(|&p| Pathway {
                probability: p,
                products: vec![],
            })
            .collect();
        RxnClass::new(SmallVec::from_slice(&[0, 1]), RxnType::Standard, pathways).unwrap()
    }

    #[test]
    fn cum_probs_are_nondecreasing_and_match_max() {
        let rxn = simple_class(&[0.2, 0.3, 0.1]);
        assert!(rxn.cum_probs.windows(2).all(|w| w[0] <= w[1]));
        assert!((*rxn.cum_probs.last().unwrap() - rxn.max_fixed_p).abs() < 1e-15);
        assert!((rxn.min_noreaction_p - 0.2).abs() < 1e-15);
    }

    #[test]
    fn empty_reactants_rejected() {
        assert!(RxnClass::new(
            SmallVec::new(),
            RxnType::Standard,
            vec![Pathway { probability: 1.0, products: vec![] }]
        )
        .is_err());
    }

    #[test]
    fn negative_probability_rejected() {
        assert!(simple_class(&[0.2]).max_fixed_p > 0.0);
        let pathways = vec![Pathway { probability: -0.1, products: vec![] }];
        assert!(RxnClass::new(SmallVec::from_slice(&[0]), RxnType::Standard, pathways).is_err());
    }

    #[test]
    fn bimolecular_gate_rejects_above_threshold() {
        let rxn = simple_class(&[0.5]);
        // scaling huge relative to p_min: U=0.99 * scaling should miss.
        let outcome = test_bimolecular(&rxn, 1000.0, 1.0, 0.999);
        assert_eq!(outcome, GateOutcome::NoReaction);
    }

    #[test]
    fn bimolecular_gate_fires_pathway_zero_for_single_pathway_class() {
        let rxn = simple_class(&[1.0]);
        // scaling == max_fixed_p, so every draw in [0,1) should fire pathway 0.
        let outcome = test_bimolecular(&rxn, 1.0, 1.0, 0.1);
        assert_eq!(outcome, GateOutcome::Pathway(0));
    }

    #[test]
    fn pick_pathway_picks_smallest_index_covering_p() {
        let rxn = simple_class(&[0.2, 0.3, 0.5]);
        assert_eq!(rxn.pick_pathway(0.1, 1.0), Some(0));
        assert_eq!(rxn.pick_pathway(0.25, 1.0), Some(1));
        assert_eq!(rxn.pick_pathway(0.9, 1.0), Some(2));
        assert_eq!(rxn.pick_pathway(1.5, 1.0), None);
    }

    #[test]
    fn variable_rate_overrides_max_fixed_p_after_its_time() {
        let mut rxn = simple_class(&[1.0]);
        rxn.variable_rate = Some(vec![(0.0, 1.0), (5.0, 10.0)]);
        assert_eq!(rxn.effective_max_fixed_p(1.0), 1.0);
        assert_eq!(rxn.effective_max_fixed_p(6.0), 10.0);
    }
}
