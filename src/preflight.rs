use std::collections::{BTreeSet, HashMap};

/// Checks run before any mutation of the family table. Each failure
/// enumerates the offending items so the operator can fix the upstream
/// tables rather than guess.

pub fn check_organisms_in_hit_source(
    selection: &[String],
    hit_organisms: &[String],
) -> Result<(), String> {
    let known: BTreeSet<&String> = hit_organisms.iter().collect();
    let unknown: Vec<&str> = selection
        .iter()
        .filter(|org| !known.contains(org))
        .map(|org| org.as_str())
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "These organisms are not present in the hit table - please recreate it including them: {}",
            unknown.join(", ")
        ))
    }
}

/// Single linkage is only meaningful when every organism pair has been
/// BLASTed against each other. Requires every ordered pair over (family
/// table organisms ∪ selection), self-comparisons included, to appear as a
/// `(q_org, h_org)` pair in the hit table. A missing self-comparison would
/// leave within-organism paralogs unlinked, so it aborts like any other
/// missing pair.
pub fn check_all_vs_all(
    organisms: &BTreeSet<String>,
    hit_organism_pairs: &BTreeSet<(String, String)>,
) -> Result<(), String> {
    let mut missing: Vec<String> = vec![];
    for q_org in organisms {
        for h_org in organisms {
            if !hit_organism_pairs.contains(&(q_org.clone(), h_org.clone())) {
                missing.push(format!("{} vs {}", q_org, h_org));
            }
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "These organism pairs are missing for a complete all-vs-all single linkage: {}",
            missing.join(", ")
        ))
    }
}

pub fn check_organisms_in_catalog(
    organisms: &BTreeSet<String>,
    organism_ids: &HashMap<String, i64>,
) -> Result<(), String> {
    let unknown: Vec<&str> = organisms
        .iter()
        .filter(|org| !organism_ids.contains_key(*org))
        .map(|org| org.as_str())
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "These organisms are missing from the organism catalog: {}",
            unknown.join(", ")
        ))
    }
}
