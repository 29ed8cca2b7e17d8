use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use crate::store::{FamilyRow, GenomicsDb, ProteinKey};

/// The next-family counter. Seeded past the largest family id already in the
/// store, minted post-increment, and threaded by `&mut` through linking and
/// duplicate resolution so ids are strictly increasing and never reused
/// within a run.
#[derive(Debug)]
pub struct FamilyCounter {
    next_hfam: i64,
}

impl FamilyCounter {
    pub fn seeded_after(max_hfam: Option<i64>) -> FamilyCounter {
        FamilyCounter {
            next_hfam: match max_hfam {
                Some(max) => max + 1,
                None => 1,
            },
        }
    }

    pub fn mint(&mut self) -> i64 {
        let hfam = self.next_hfam;
        self.next_hfam += 1;
        hfam
    }
}

/// Single-link each missing organism's proteins into the family table, in
/// caller-supplied order. Each organism's pass reads the families written by
/// earlier passes, so organisms cannot be processed concurrently.
///
/// Hit lookups are restricted to the working organism set: the organisms
/// already in the family table plus those processed so far in this run.
pub fn link_organisms(
    db: &GenomicsDb,
    counter: &mut FamilyCounter,
    missing_organisms: &[String],
    family_store_organisms: &[String],
    organism_ids: &HashMap<String, i64>,
    batch_size: usize,
) -> rusqlite::Result<()> {
    let mut working_organisms: BTreeSet<String> =
        family_store_organisms.iter().cloned().collect();

    for (organism_index, org_name) in missing_organisms.iter().enumerate() {
        let organism_start = Instant::now();
        info!(
            "Linking organism {} - {} of {}",
            org_name,
            organism_index + 1,
            missing_organisms.len()
        );
        working_organisms.insert(org_name.clone());

        let proteins = db.organism_proteins(org_name)?;
        debug!(
            "Found {} distinct proteins for {} in {}",
            proteins.len(),
            org_name,
            db.hit_table()
        );

        let mut buffer: Vec<FamilyRow> = vec![];
        let mut inserted_rows = 0usize;
        for protein_id in proteins {
            link_protein(
                db,
                counter,
                org_name,
                protein_id,
                &working_organisms,
                organism_ids,
                &mut buffer,
            )?;
            if buffer.len() >= batch_size {
                inserted_rows += buffer.len();
                debug!("Inserting family record number {}", inserted_rows);
                flush_buffer(db, &mut buffer)?;
            }
        }
        // Remainder flush at the end of the organism's protein loop. May be
        // empty, in which case only the bookkeeping resets.
        inserted_rows += buffer.len();
        flush_buffer(db, &mut buffer)?;

        info!(
            "Inserted {} family rows for {}; iteration time {:?}",
            inserted_rows,
            org_name,
            organism_start.elapsed()
        );
    }
    Ok(())
}

fn flush_buffer(db: &GenomicsDb, buffer: &mut Vec<FamilyRow>) -> rusqlite::Result<()> {
    if !buffer.is_empty() {
        db.insert_members(buffer)?;
    }
    buffer.clear();
    Ok(())
}

/// One greedy union step: gather the families reachable from this protein
/// through one hit, tear them down, and re-materialise their union together
/// with all family-less hit partners under a freshly minted id.
///
/// Buffered rows are not yet visible to membership lookups, so two hits
/// landing on the same protein within one organism's pass can mint two
/// families both containing it. The duplicate resolver repairs this
/// afterwards.
fn link_protein(
    db: &GenomicsDb,
    counter: &mut FamilyCounter,
    org_name: &str,
    protein_id: i64,
    working_organisms: &BTreeSet<String>,
    organism_ids: &HashMap<String, i64>,
    buffer: &mut Vec<FamilyRow>,
) -> rusqlite::Result<()> {
    let partners = db.hit_partners(org_name, protein_id, working_organisms)?;

    let mut touched_families: BTreeSet<i64> = BTreeSet::new();
    let mut unassigned: BTreeSet<ProteinKey> = BTreeSet::new();
    // The protein being linked is new to the table, so it always counts as
    // unassigned.
    unassigned.insert(ProteinKey {
        org_name: org_name.to_string(),
        protein_id,
    });
    for partner in partners {
        let families = db.families_of_protein(&partner)?;
        if families.is_empty() {
            unassigned.insert(partner);
        } else {
            touched_families.extend(families);
        }
    }

    // Union of current members of every touched family plus the unassigned
    // endpoints, deduplicated by protein key.
    let mut union: BTreeMap<ProteinKey, i64> = BTreeMap::new();
    if !touched_families.is_empty() {
        trace!(
            "Protein {}:{} touches families {:?}",
            org_name,
            protein_id,
            touched_families
        );
        for member in db.members_of_families(&touched_families)? {
            let org_id = member.org_id;
            union.insert(member.key(), org_id);
        }
        db.delete_families(&touched_families)?;
    }
    for key in unassigned {
        let org_id = *organism_ids.get(&key.org_name).unwrap_or_else(|| {
            panic!(
                "Organism {} is missing from the organism catalog",
                key.org_name
            )
        });
        union.entry(key).or_insert(org_id);
    }

    let hfam = counter.mint();
    for (key, org_id) in union {
        buffer.push(FamilyRow {
            hfam,
            org_id,
            org_name: key.org_name,
            protein_id: key.protein_id,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicate_resolver;
    use crate::store::test_db::TestDb;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Families as a set of member-key sets, ignoring ids.
    fn family_memberships(db: &GenomicsDb) -> BTreeSet<BTreeSet<(String, i64)>> {
        let mut families: BTreeMap<i64, BTreeSet<(String, i64)>> = BTreeMap::new();
        for row in db.family_rows().unwrap() {
            families
                .entry(row.hfam)
                .or_insert_with(BTreeSet::new)
                .insert((row.org_name.clone(), row.protein_id));
        }
        families.into_iter().map(|(_, members)| members).collect()
    }

    fn link_and_resolve(test_db: &TestDb, organisms: &[&str], batch_size: usize) -> GenomicsDb {
        let db = test_db.open();
        let organism_ids = db.organism_ids().unwrap();
        let mut counter = FamilyCounter::seeded_after(db.max_hfam().unwrap());
        let missing: Vec<String> = organisms.iter().map(|o| o.to_string()).collect();
        link_organisms(&db, &mut counter, &missing, &[], &organism_ids, batch_size).unwrap();
        duplicate_resolver::resolve_duplicates(&db, &mut counter).unwrap();
        db
    }

    #[test]
    fn test_counter_seeding_and_minting() {
        init();
        let mut counter = FamilyCounter::seeded_after(None);
        assert_eq!(1, counter.mint());
        assert_eq!(2, counter.mint());
        assert_eq!(3, counter.mint());

        let mut counter = FamilyCounter::seeded_after(Some(41));
        assert_eq!(42, counter.mint());
        assert_eq!(43, counter.mint());
    }

    #[test]
    fn test_two_hits_one_family() {
        init();
        let test_db = TestDb::new();
        test_db.add_organism(1, "OrgA");
        test_db.add_organism(2, "OrgB");
        test_db.add_reciprocal_hit("OrgA", 1, "OrgB", 10);
        test_db.add_reciprocal_hit("OrgA", 1, "OrgB", 11);

        let db = link_and_resolve(&test_db, &["OrgA", "OrgB"], 5000);

        let expected: BTreeSet<(String, i64)> = vec![
            ("OrgA".to_string(), 1),
            ("OrgB".to_string(), 10),
            ("OrgB".to_string(), 11),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            vec![expected].into_iter().collect::<BTreeSet<_>>(),
            family_memberships(&db)
        );
    }

    #[test]
    fn test_every_observed_protein_appears_exactly_once() {
        init();
        let test_db = TestDb::new();
        test_db.add_organism(1, "OrgA");
        test_db.add_organism(2, "OrgB");
        test_db.add_reciprocal_hit("OrgA", 1, "OrgB", 10);
        test_db.add_reciprocal_hit("OrgA", 2, "OrgB", 20);
        // Protein 3 only hits an organism outside the selection, so it must
        // end up in a family of its own.
        test_db.add_reciprocal_hit("OrgA", 3, "OrgZ", 99);

        let db = link_and_resolve(&test_db, &["OrgA", "OrgB"], 5000);

        let mut seen: BTreeMap<(String, i64), usize> = BTreeMap::new();
        for row in db.family_rows().unwrap() {
            *seen.entry((row.org_name.clone(), row.protein_id)).or_insert(0) += 1;
        }
        for observed in &[
            ("OrgA".to_string(), 1),
            ("OrgA".to_string(), 2),
            ("OrgA".to_string(), 3),
            ("OrgB".to_string(), 10),
            ("OrgB".to_string(), 20),
        ] {
            assert_eq!(Some(&1), seen.get(observed), "missing {:?}", observed);
        }
        // The unselected partner was never clustered.
        assert_eq!(None, seen.get(&("OrgZ".to_string(), 99)));
    }

    #[test]
    fn test_minted_ids_strictly_increase() {
        init();
        let test_db = TestDb::new();
        test_db.add_organism(1, "OrgA");
        test_db.add_organism(2, "OrgB");
        test_db.add_reciprocal_hit("OrgA", 1, "OrgB", 10);
        test_db.add_reciprocal_hit("OrgA", 2, "OrgB", 20);

        let db = test_db.open();
        let organism_ids = db.organism_ids().unwrap();
        let mut counter = FamilyCounter::seeded_after(Some(100));
        link_organisms(
            &db,
            &mut counter,
            &["OrgA".to_string(), "OrgB".to_string()],
            &[],
            &organism_ids,
            5000,
        )
        .unwrap();
        duplicate_resolver::resolve_duplicates(&db, &mut counter).unwrap();

        let mut hfams: Vec<i64> = db.family_rows().unwrap().iter().map(|r| r.hfam).collect();
        hfams.dedup();
        assert!(hfams.iter().all(|hfam| *hfam > 100));
        let mut sorted = hfams.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), family_memberships(&db).len());
    }

    #[test]
    fn test_small_batch_size_gives_same_families() {
        init();
        for batch_size in &[1usize, 2, 5000] {
            let test_db = TestDb::new();
            test_db.add_organism(1, "OrgA");
            test_db.add_organism(2, "OrgB");
            test_db.add_organism(3, "OrgC");
            test_db.add_reciprocal_hit("OrgA", 1, "OrgB", 10);
            test_db.add_reciprocal_hit("OrgB", 10, "OrgC", 7);
            test_db.add_reciprocal_hit("OrgA", 2, "OrgC", 8);

            let db = link_and_resolve(&test_db, &["OrgA", "OrgB", "OrgC"], *batch_size);

            let linked: BTreeSet<(String, i64)> = vec![
                ("OrgA".to_string(), 1),
                ("OrgB".to_string(), 10),
                ("OrgC".to_string(), 7),
            ]
            .into_iter()
            .collect();
            let second: BTreeSet<(String, i64)> =
                vec![("OrgA".to_string(), 2), ("OrgC".to_string(), 8)]
                    .into_iter()
                    .collect();
            assert_eq!(
                vec![linked, second].into_iter().collect::<BTreeSet<_>>(),
                family_memberships(&db),
                "with batch size {}",
                batch_size
            );
        }
    }

    #[test]
    fn test_rerun_skipping_already_linked_organisms() {
        init();
        let test_db = TestDb::new();
        test_db.add_organism(1, "OrgA");
        test_db.add_organism(2, "OrgB");
        test_db.add_reciprocal_hit("OrgA", 1, "OrgB", 10);

        let db = test_db.open();
        let organism_ids = db.organism_ids().unwrap();
        let mut counter = FamilyCounter::seeded_after(db.max_hfam().unwrap());
        link_organisms(
            &db,
            &mut counter,
            &["OrgA".to_string()],
            &[],
            &organism_ids,
            5000,
        )
        .unwrap();
        duplicate_resolver::resolve_duplicates(&db, &mut counter).unwrap();
        let after_first = family_memberships(&db);

        // Second invocation: OrgA is already in the family table, only OrgB
        // is missing.
        let mut counter = FamilyCounter::seeded_after(db.max_hfam().unwrap());
        link_organisms(
            &db,
            &mut counter,
            &["OrgB".to_string()],
            &["OrgA".to_string()],
            &organism_ids,
            5000,
        )
        .unwrap();
        duplicate_resolver::resolve_duplicates(&db, &mut counter).unwrap();

        assert_eq!(1, after_first.len());
        let expected: BTreeSet<(String, i64)> =
            vec![("OrgA".to_string(), 1), ("OrgB".to_string(), 10)]
                .into_iter()
                .collect();
        assert_eq!(
            vec![expected].into_iter().collect::<BTreeSet<_>>(),
            family_memberships(&db)
        );
    }
}
