use pixelsarsa_vision::FeatureId;

use crate::{FeatureGroups, GroupColumns, GroupId};

/// Per-action weights and eligibility traces, one column per group.
///
/// Each action keeps the list of groups whose trace is non-zero; decay and weight
/// updates only visit those entries.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTable {
    weights: Vec<Vec<f32>>,
    traces: Vec<Vec<f32>>,
    nonzero_traces: Vec<Vec<GroupId>>,
    trace_threshold: f32,
}

impl ParamTable {
    /// # Panics
    ///
    /// Panics if `num_actions` is zero or `trace_threshold` is not positive.
    #[must_use]
    pub fn new(num_actions: usize, trace_threshold: f32) -> Self {
        assert!(num_actions > 0, "at least one action is required");
        assert!(trace_threshold > 0.0, "trace threshold must be positive");
        Self {
            weights: vec![Vec::new(); num_actions],
            traces: vec![Vec::new(); num_actions],
            nonzero_traces: vec![Vec::new(); num_actions],
            trace_threshold,
        }
    }

    #[must_use]
    pub fn num_actions(&self) -> usize {
        self.weights.len()
    }

    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.weights[0].len()
    }

    #[must_use]
    pub fn weight(&self, action: usize, group: GroupId) -> f32 {
        self.weights[action][group.index()]
    }

    pub fn set_weight(&mut self, action: usize, group: GroupId, value: f32) {
        self.weights[action][group.index()] = value;
    }

    #[must_use]
    pub fn trace(&self, action: usize, group: GroupId) -> f32 {
        self.traces[action][group.index()]
    }

    /// Number of non-zero traces of `action`.
    #[must_use]
    pub fn num_nonzero_traces(&self, action: usize) -> usize {
        self.nonzero_traces[action].len()
    }

    /// Sets every weight to zero, keeping the columns.
    pub fn clear_weights(&mut self) {
        for weights in &mut self.weights {
            weights.fill(0.0);
        }
    }

    /// Appends zeroed columns until there are `num_groups` of them.
    pub fn grow_to(&mut self, num_groups: usize) {
        for (weights, traces) in self.weights.iter_mut().zip(&mut self.traces) {
            if weights.len() < num_groups {
                weights.resize(num_groups, 0.0);
                traces.resize(num_groups, 0.0);
            }
        }
    }

    /// Non-zero weights of `group` as `(action, weight)` pairs.
    pub fn nonzero_weights(&self, group: GroupId) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.weights
            .iter()
            .enumerate()
            .map(move |(action, weights)| (action, weights[group.index()]))
            .filter(|&(_, weight)| weight != 0.0)
    }

    /// Q-values over grouped features; each group counts once per raw id it stands for.
    #[expect(clippy::cast_precision_loss)]
    pub fn q_values(&self, active: &[GroupId], groups: &FeatureGroups, q: &mut Vec<f32>) {
        q.clear();
        q.extend(self.weights.iter().map(|weights| {
            active
                .iter()
                .map(|&group| weights[group.index()] * groups.num_features(group) as f32)
                .sum::<f32>()
        }));
    }

    /// Q-values over raw ids without touching the group table; unmapped ids count as zero.
    pub fn frozen_q_values(&self, raw: &[FeatureId], groups: &FeatureGroups, q: &mut Vec<f32>) {
        q.clear();
        q.extend(self.weights.iter().map(|weights| {
            raw.iter()
                .filter_map(|&feature| groups.lookup(feature))
                .map(|group| weights[group.index()])
                .sum::<f32>()
        }));
    }

    /// Multiplies every trace by `factor`, dropping those that fall below the threshold.
    pub fn decay_traces(&mut self, factor: f32) {
        let threshold = self.trace_threshold;
        for (nonzero, traces) in self.nonzero_traces.iter_mut().zip(&mut self.traces) {
            nonzero.retain(|group| {
                let trace = &mut traces[group.index()];
                *trace *= factor;
                if *trace < threshold {
                    *trace = 0.0;
                    false
                } else {
                    true
                }
            });
        }
    }

    /// Sets the traces of `active` groups under `action` to one.
    pub fn replace_traces(&mut self, action: usize, active: &[GroupId]) {
        let traces = &mut self.traces[action];
        for &group in active {
            let trace = &mut traces[group.index()];
            // traces below the threshold are exactly zero and not listed
            if *trace < self.trace_threshold {
                self.nonzero_traces[action].push(group);
            }
            *trace = 1.0;
        }
    }

    /// Adds `step * trace` to every weight with a non-zero trace.
    pub fn update_weights(&mut self, step: f32) {
        for ((weights, traces), nonzero) in self
            .weights
            .iter_mut()
            .zip(&self.traces)
            .zip(&self.nonzero_traces)
        {
            for &group in nonzero {
                weights[group.index()] += step * traces[group.index()];
            }
        }
    }

    pub fn clear_traces(&mut self) {
        for (nonzero, traces) in self.nonzero_traces.iter_mut().zip(&mut self.traces) {
            for group in nonzero.drain(..) {
                traces[group.index()] = 0.0;
            }
        }
    }
}

impl GroupColumns for ParamTable {
    fn push_zeroed(&mut self) {
        for (weights, traces) in self.weights.iter_mut().zip(&mut self.traces) {
            weights.push(0.0);
            traces.push(0.0);
        }
    }

    fn push_copy_of(&mut self, parent: GroupId) {
        let child = GroupId::new(self.num_groups());
        for ((weights, traces), nonzero) in self
            .weights
            .iter_mut()
            .zip(&mut self.traces)
            .zip(&mut self.nonzero_traces)
        {
            weights.push(weights[parent.index()]);
            let trace = traces[parent.index()];
            traces.push(trace);
            if trace >= self.trace_threshold {
                nonzero.push(child);
            }
        }
    }
}
