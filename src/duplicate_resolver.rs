use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::family_linker::FamilyCounter;
use crate::store::{FamilyRow, GenomicsDb, ProteinKey};

/// Repair the family table after linking: while any protein is claimed by
/// more than one family, collapse the whole connected component of families
/// reachable from it into a single freshly numbered family. Returns the
/// number of merges performed.
///
/// Terminates because every merge strictly reduces the number of family ids
/// involved in duplication - the replacement family is deduplicated by
/// protein key before insertion.
pub fn resolve_duplicates(
    db: &GenomicsDb,
    counter: &mut FamilyCounter,
) -> rusqlite::Result<usize> {
    let duplicated = db.duplicated_proteins()?;
    info!(
        "There are {} proteins assigned to more than one family in {}",
        duplicated.len(),
        db.family_table()
    );

    let mut merges = 0usize;
    while let Some(seed) = db.first_duplicated_protein()? {
        let families = membership_closure(db, &seed)?;
        debug!(
            "Merging families {:?} reachable from duplicated protein {}:{}",
            families, seed.org_name, seed.protein_id
        );

        // All members of the merged families, not just the duplicated ones,
        // deduplicated by protein key.
        let mut members: BTreeMap<ProteinKey, i64> = BTreeMap::new();
        for row in db.members_of_families(&families)? {
            let org_id = row.org_id;
            members.entry(row.key()).or_insert(org_id);
        }

        let hfam = counter.mint();
        let replacement: Vec<FamilyRow> = members
            .into_iter()
            .map(|(key, org_id)| FamilyRow {
                hfam,
                org_id,
                org_name: key.org_name,
                protein_id: key.protein_id,
            })
            .collect();
        db.replace_families(&families, &replacement)?;
        merges += 1;
    }

    if merges > 0 {
        info!("Merged duplicated families in {} passes", merges);
    }
    Ok(merges)
}

/// BFS over the bipartite protein-family membership graph starting from one
/// protein: expanding a protein pulls in every family claiming it, expanding
/// a family pulls its members onto the frontier. The returned family set is
/// the "shares a family with" transitive closure, which can span more than
/// two families.
fn membership_closure(db: &GenomicsDb, seed: &ProteinKey) -> rusqlite::Result<BTreeSet<i64>> {
    let mut families: BTreeSet<i64> = BTreeSet::new();
    let mut seen: BTreeSet<ProteinKey> = BTreeSet::new();
    let mut frontier: VecDeque<ProteinKey> = VecDeque::new();
    seen.insert(seed.clone());
    frontier.push_back(seed.clone());

    while let Some(key) = frontier.pop_front() {
        for hfam in db.families_of_protein(&key)? {
            if families.insert(hfam) {
                let mut new_family = BTreeSet::new();
                new_family.insert(hfam);
                for row in db.members_of_families(&new_family)? {
                    let member = row.key();
                    if seen.insert(member.clone()) {
                        frontier.push_back(member);
                    }
                }
            }
        }
    }
    Ok(families)
}
