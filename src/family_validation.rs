use std::process;

use crate::store::GenomicsDb;

/// Check the exactly-one-family-per-protein invariant over an existing
/// family table, reporting every violation. Returns false when any protein
/// is claimed by more than one family.
pub fn validate_family_store(db: &GenomicsDb) -> rusqlite::Result<bool> {
    let duplicated = db.duplicated_proteins()?;
    if duplicated.is_empty() {
        info!(
            "All {} rows of {} satisfy the one-family-per-protein invariant",
            db.family_row_count()?,
            db.family_table()
        );
        Ok(true)
    } else {
        for (key, family_count) in &duplicated {
            error!(
                "Protein {}:{} belongs to {} families",
                key.org_name, key.protein_id, family_count
            );
        }
        error!(
            "Found {} proteins assigned to more than one family in {}",
            duplicated.len(),
            db.family_table()
        );
        Ok(false)
    }
}

pub fn run_validate_subcommand(m: &clap::ArgMatches) {
    let db_path = m.get_one::<String>("db").unwrap();
    let family_table = m.get_one::<String>("family-table").unwrap();

    let db = match GenomicsDb::open(db_path, crate::DEFAULT_HIT_TABLE, family_table) {
        Ok(db) => db,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    match db.table_exists(family_table) {
        Ok(true) => {}
        Ok(false) => {
            error!("Family table {} does not exist in {}", family_table, db_path);
            process::exit(1);
        }
        Err(e) => {
            error!("Failed to inspect database {}: {}", db_path, e);
            process::exit(1);
        }
    }

    match validate_family_store(&db) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("Failed to validate {}: {}", family_table, e);
            process::exit(1);
        }
    }
}
