//! # Choice-Set Indexer
//!
//! Groups raw long-format rows into per-decision choice sets and validates
//! the structural contract: at least two alternatives per group, exactly one
//! of them chosen, alternative identifiers unique within the group, and a
//! consistent positive case weight. Pure transform — rows in, validated
//! index out, no other effects.
//!
//! Groups may carry differing alternative sets (unbalanced panels). The
//! universal alternative ordering across the whole dataset is exposed via
//! [`ChoiceSetIndex::universal_alternatives`]; an alternative absent from a
//! group simply contributes no term to that group's likelihood.

use crate::data::{AltId, ChoiceSetViolation, DataError, GroupId, ObservationRow};
use ahash::{AHashMap, AHashSet};

/// All rows of one decision occasion, in first-appearance order.
#[derive(Debug, Clone)]
pub struct ChoiceSet {
    pub group: GroupId,
    pub rows: Vec<ObservationRow>,
    /// Index into `rows` of the chosen alternative.
    pub chosen_index: usize,
    /// The group-level case weight (identical across rows by contract).
    pub weight: f64,
}

impl ChoiceSet {
    pub fn num_alternatives(&self) -> usize {
        self.rows.len()
    }

    pub fn chosen_row(&self) -> &ObservationRow {
        &self.rows[self.chosen_index]
    }
}

/// The validated mapping from group identifier to choice set, in group
/// first-appearance order.
#[derive(Debug, Clone)]
pub struct ChoiceSetIndex {
    sets: Vec<ChoiceSet>,
}

impl ChoiceSetIndex {
    /// Groups and validates rows. Rows of one group may arrive interleaved
    /// with other groups in any order; within a group, alternative order is
    /// first appearance.
    pub fn from_rows(rows: &[ObservationRow]) -> Result<Self, DataError> {
        if rows.is_empty() {
            return Err(DataError::EmptyInput);
        }

        let mut order: Vec<GroupId> = Vec::new();
        let mut grouped: AHashMap<GroupId, Vec<ObservationRow>> = AHashMap::new();
        for row in rows {
            grouped
                .entry(row.group.clone())
                .or_insert_with(|| {
                    order.push(row.group.clone());
                    Vec::new()
                })
                .push(row.clone());
        }

        let mut sets = Vec::with_capacity(order.len());
        for group in order {
            let group_rows = grouped.remove(&group).expect("group was indexed above");
            sets.push(validate_group(group, group_rows)?);
        }
        Ok(Self { sets })
    }

    pub fn sets(&self) -> &[ChoiceSet] {
        &self.sets
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn total_rows(&self) -> usize {
        self.sets.iter().map(|s| s.rows.len()).sum()
    }

    /// Alternative identifiers across the whole dataset, ordered by first
    /// appearance. This is the canonical ordering used for coefficient
    /// layout; it may exceed any single group's alternative set.
    pub fn universal_alternatives(&self) -> Vec<AltId> {
        let mut seen: AHashSet<&AltId> = AHashSet::new();
        let mut out = Vec::new();
        for set in &self.sets {
            for row in &set.rows {
                if seen.insert(&row.alternative) {
                    out.push(row.alternative.clone());
                }
            }
        }
        out
    }
}

fn validate_group(group: GroupId, rows: Vec<ObservationRow>) -> Result<ChoiceSet, DataError> {
    let malformed = |violation| DataError::MalformedChoiceSet {
        group: group.clone(),
        violation,
    };

    if rows.len() < 2 {
        return Err(malformed(ChoiceSetViolation::FewerThanTwoAlternatives));
    }

    let mut seen: AHashSet<&AltId> = AHashSet::new();
    for row in &rows {
        if !seen.insert(&row.alternative) {
            return Err(malformed(ChoiceSetViolation::DuplicateAlternative(
                row.alternative.clone(),
            )));
        }
    }

    let mut chosen_index = None;
    for (i, row) in rows.iter().enumerate() {
        if row.chosen {
            if chosen_index.is_some() {
                return Err(malformed(ChoiceSetViolation::MultipleChosenAlternatives));
            }
            chosen_index = Some(i);
        }
    }
    let chosen_index = match chosen_index {
        Some(i) => i,
        None => return Err(malformed(ChoiceSetViolation::NoChosenAlternative)),
    };

    let weight = rows[0].weight;
    if !weight.is_finite() || weight <= 0.0 {
        return Err(malformed(ChoiceSetViolation::InvalidWeight));
    }
    if rows.iter().any(|r| r.weight != weight) {
        return Err(malformed(ChoiceSetViolation::InconsistentWeight));
    }

    Ok(ChoiceSet {
        group,
        rows,
        chosen_index,
        weight,
    })
}
