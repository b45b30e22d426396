//! Online compression of raw feature ids into groups of ids that have always been
//! active together.
//!
//! A fresh id joins a new group shared with every other fresh id of the same
//! frame. From then on a group is only ever refined: when a frame activates a
//! strict subset of a group's members, those members move to a new child group
//! that starts from a copy of the parent's parameters. Groups never merge, so the
//! number of groups is bounded by the number of distinct co-activation patterns
//! seen, not by the size of the feature space.
//!
//! Parameter storage lives outside this module. It is kept in step through
//! [`GroupColumns`], which is told about every group as it is created.

use std::collections::{HashMap, HashSet};

use log::debug;
use pixelsarsa_vision::FeatureId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub struct GroupId(usize);

impl GroupId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Per-group parameter storage indexed by [`GroupId`].
pub trait GroupColumns {
    /// Appends a column for a group with no history.
    fn push_zeroed(&mut self);

    /// Appends a column that starts as a copy of `parent`'s column.
    fn push_copy_of(&mut self, parent: GroupId);
}

#[derive(Debug, Clone, Default)]
struct Group {
    num_features: usize,
    /// Members active in the frame being grouped; empty between frames.
    active_members: Vec<FeatureId>,
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum GroupTableError {
    #[display("feature {feature} maps to group {group} but only {num_groups} groups exist")]
    UnknownGroup {
        feature: FeatureId,
        group: GroupId,
        num_groups: usize,
    },
    #[display("feature {feature} is mapped more than once")]
    DuplicateFeature { feature: FeatureId },
}

/// Translation table from raw feature ids to groups.
#[derive(Debug, Clone, Default)]
pub struct FeatureGroups {
    translation: HashMap<FeatureId, GroupId>,
    groups: Vec<Group>,
    touched: Vec<GroupId>,
    unseen: Vec<FeatureId>,
    in_frame: HashSet<FeatureId>,
}

impl FeatureGroups {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a table from saved `(feature, group)` pairs.
    ///
    /// Group sizes are recomputed from the pairs.
    pub fn from_translation<I>(num_groups: usize, pairs: I) -> Result<Self, GroupTableError>
    where
        I: IntoIterator<Item = (FeatureId, GroupId)>,
    {
        let mut this = Self {
            groups: vec![Group::default(); num_groups],
            ..Self::default()
        };
        for (feature, group) in pairs {
            let Some(entry) = this.groups.get_mut(group.index()) else {
                return Err(GroupTableError::UnknownGroup {
                    feature,
                    group,
                    num_groups,
                });
            };
            entry.num_features += 1;
            if this.translation.insert(feature, group).is_some() {
                return Err(GroupTableError::DuplicateFeature { feature });
            }
        }
        Ok(this)
    }

    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Number of raw ids currently mapped to `group`.
    #[must_use]
    pub fn num_features(&self, group: GroupId) -> usize {
        self.groups[group.index()].num_features
    }

    /// Number of raw ids seen so far.
    #[must_use]
    pub fn num_mapped(&self) -> usize {
        self.translation.len()
    }

    #[must_use]
    pub fn lookup(&self, feature: FeatureId) -> Option<GroupId> {
        self.translation.get(&feature).copied()
    }

    /// All `(feature, group)` pairs in unspecified order.
    pub fn translation(&self) -> impl Iterator<Item = (FeatureId, GroupId)> + '_ {
        self.translation.iter().map(|(&feature, &group)| (feature, group))
    }

    /// Maps the raw ids active in one frame to groups, refining the table.
    ///
    /// Repeated ids in `raw` count once. `active` receives each touched group once; a group stands for
    /// [`FeatureGroups::num_features`] raw ids. `columns` gets one new column per
    /// created group, in id order.
    pub fn group_frame<C>(&mut self, raw: &[FeatureId], columns: &mut C, active: &mut Vec<GroupId>)
    where
        C: GroupColumns + ?Sized,
    {
        active.clear();
        self.unseen.clear();
        self.in_frame.clear();

        for &feature in raw {
            if !self.in_frame.insert(feature) {
                continue;
            }
            match self.translation.get(&feature) {
                Some(&group) => {
                    let members = &mut self.groups[group.index()].active_members;
                    if members.is_empty() {
                        self.touched.push(group);
                    }
                    members.push(feature);
                }
                None => self.unseen.push(feature),
            }
        }

        if !self.unseen.is_empty() {
            let group = GroupId(self.groups.len());
            for &feature in &self.unseen {
                self.translation.insert(feature, group);
            }
            let num_features = self.unseen.len();
            self.groups.push(Group {
                num_features,
                active_members: Vec::new(),
            });
            columns.push_zeroed();
            active.push(group);
            debug!("group {group} created for {num_features} new features");
        }

        for parent in self.touched.drain(..) {
            let group = &mut self.groups[parent.index()];
            debug_assert!(group.active_members.len() <= group.num_features);
            if group.active_members.len() == group.num_features {
                group.active_members.clear();
                active.push(parent);
                continue;
            }

            let members = std::mem::take(&mut group.active_members);
            group.num_features -= members.len();
            debug_assert!(group.num_features > 0);

            let child = GroupId(self.groups.len());
            for &feature in &members {
                self.translation.insert(feature, child);
            }
            self.groups.push(Group {
                num_features: members.len(),
                active_members: Vec::new(),
            });
            columns.push_copy_of(parent);
            active.push(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records which columns were created and from which parent.
    #[derive(Debug, Default)]
    struct ColumnLog {
        origins: Vec<Option<GroupId>>,
    }

    impl GroupColumns for ColumnLog {
        fn push_zeroed(&mut self) {
            self.origins.push(None);
        }

        fn push_copy_of(&mut self, parent: GroupId) {
            self.origins.push(Some(parent));
        }
    }

    fn assert_counts_match_translation(groups: &FeatureGroups) {
        let mut counts = vec![0; groups.num_groups()];
        for (_, group) in groups.translation() {
            counts[group.index()] += 1;
        }
        for (index, &count) in counts.iter().enumerate() {
            assert_eq!(groups.num_features(GroupId::new(index)), count);
        }
    }

    fn active_ids(active: &[GroupId]) -> Vec<usize> {
        active.iter().map(|g| g.index()).collect()
    }

    #[test]
    fn test_new_features_share_one_group() {
        let mut groups = FeatureGroups::new();
        let mut columns = ColumnLog::default();
        let mut active = Vec::new();
        groups.group_frame(&[10, 20, 30], &mut columns, &mut active);
        assert_eq!(active_ids(&active), vec![0]);
        assert_eq!(groups.num_features(GroupId::new(0)), 3);
        assert_eq!(columns.origins, vec![None]);
    }

    #[test]
    fn test_consistent_group_is_reused() {
        let mut groups = FeatureGroups::new();
        let mut columns = ColumnLog::default();
        let mut active = Vec::new();
        for _ in 0..5 {
            groups.group_frame(&[1, 2, 3], &mut columns, &mut active);
        }
        assert_eq!(groups.num_groups(), 1);
        assert_eq!(active_ids(&active), vec![0]);
    }

    #[test]
    fn test_split_when_subset_diverges() {
        let mut groups = FeatureGroups::new();
        let mut columns = ColumnLog::default();
        let mut active = Vec::new();
        for _ in 0..4 {
            groups.group_frame(&[7, 8], &mut columns, &mut active);
        }
        groups.group_frame(&[8], &mut columns, &mut active);

        assert_eq!(groups.num_groups(), 2);
        assert_eq!(groups.lookup(7), Some(GroupId::new(0)));
        assert_eq!(groups.lookup(8), Some(GroupId::new(1)));
        assert_eq!(groups.num_features(GroupId::new(0)), 1);
        assert_eq!(groups.num_features(GroupId::new(1)), 1);
        assert_eq!(active_ids(&active), vec![1]);
        assert_eq!(columns.origins, vec![None, Some(GroupId::new(0))]);

        // 7 alone now matches its whole group
        groups.group_frame(&[7], &mut columns, &mut active);
        assert_eq!(groups.num_groups(), 2);
        assert_eq!(active_ids(&active), vec![0]);
    }

    #[test]
    fn test_new_and_existing_features_in_one_frame() {
        let mut groups = FeatureGroups::new();
        let mut columns = ColumnLog::default();
        let mut active = Vec::new();
        groups.group_frame(&[1, 2, 3], &mut columns, &mut active);
        groups.group_frame(&[2, 3, 4, 5], &mut columns, &mut active);

        // new group for {4, 5} first, then the split of {2, 3} off group 0
        assert_eq!(active_ids(&active), vec![1, 2]);
        assert_eq!(groups.num_features(GroupId::new(0)), 1);
        assert_eq!(groups.num_features(GroupId::new(1)), 2);
        assert_eq!(groups.num_features(GroupId::new(2)), 2);
        assert_counts_match_translation(&groups);
    }

    #[test]
    fn test_counts_track_translation_over_many_frames() {
        let mut groups = FeatureGroups::new();
        let mut columns = ColumnLog::default();
        let mut active = Vec::new();
        let mut state = 0x2545_f491_u64;
        for _ in 0..300 {
            let mut frame = Vec::new();
            for feature in 0..40 {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                if state % 3 == 0 {
                    frame.push(feature);
                }
            }
            groups.group_frame(&frame, &mut columns, &mut active);
            let covered = active.iter().map(|&g| groups.num_features(g)).sum::<usize>();
            assert_eq!(covered, frame.len());
            assert_counts_match_translation(&groups);
            assert!((0..groups.num_groups()).all(|g| groups.num_features(GroupId::new(g)) > 0));
        }
        assert_eq!(columns.origins.len(), groups.num_groups());
    }

    #[test]
    fn test_repeated_ids_count_once() {
        let mut groups = FeatureGroups::new();
        let mut columns = ColumnLog::default();
        let mut active = Vec::new();
        groups.group_frame(&[4, 4, 9], &mut columns, &mut active);
        assert_eq!(groups.num_features(GroupId::new(0)), 2);

        // a repeated member must not make the partial frame look complete
        groups.group_frame(&[4, 4], &mut columns, &mut active);
        assert_eq!(groups.num_groups(), 2);
        assert_eq!(groups.lookup(4), Some(GroupId::new(1)));
        assert_eq!(groups.num_features(GroupId::new(0)), 1);
        assert_eq!(groups.num_features(GroupId::new(1)), 1);
        assert_eq!(active_ids(&active), vec![1]);
        assert_counts_match_translation(&groups);
    }

    #[test]
    fn test_from_translation_rejects_unknown_group() {
        let err = FeatureGroups::from_translation(1, [(5, GroupId::new(1))]).unwrap_err();
        assert!(matches!(err, GroupTableError::UnknownGroup { feature: 5, .. }));
    }

    #[test]
    fn test_from_translation_recounts_groups() {
        let groups =
            FeatureGroups::from_translation(2, [(1, GroupId::new(0)), (2, GroupId::new(1)), (3, GroupId::new(1))])
                .unwrap();
        assert_eq!(groups.num_features(GroupId::new(0)), 1);
        assert_eq!(groups.num_features(GroupId::new(1)), 2);
    }
}
