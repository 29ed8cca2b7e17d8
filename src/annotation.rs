use std::collections::BTreeSet;
use std::time::Instant;

use crate::store::GenomicsDb;

/// Build the derived annotation tables from the finalised family table. Each
/// is a left join so every family row survives, with NULL annotation columns
/// where nothing is known. An organism with no annotations at all is worth a
/// warning but never a failure.
pub fn build_annotation_views(
    db: &GenomicsDb,
    skip_interpro: bool,
    skip_go: bool,
) -> rusqlite::Result<()> {
    let family_organisms = db.family_organisms()?;

    if skip_interpro {
        info!("Skipping InterPro view as requested");
    } else {
        let start = Instant::now();
        info!("Creating InterPro view - this may take some time");
        let view = db.create_interpro_view()?;
        warn_unannotated_organisms(db, &view, "ipr_id", &family_organisms)?;
        info!("Finished {} - runtime {:?}", view, start.elapsed());
    }

    if skip_go {
        info!("Skipping GO view as requested");
    } else {
        let start = Instant::now();
        info!("Creating GO view - this may take some time");
        let view = db.create_go_view()?;
        warn_unannotated_organisms(db, &view, "go_term_id", &family_organisms)?;
        info!("Finished {} - runtime {:?}", view, start.elapsed());
    }

    Ok(())
}

fn warn_unannotated_organisms(
    db: &GenomicsDb,
    view: &str,
    annotation_column: &str,
    family_organisms: &[String],
) -> rusqlite::Result<()> {
    let annotated: BTreeSet<String> = db
        .organisms_with_annotation(view, annotation_column)?
        .into_iter()
        .collect();
    for org_name in family_organisms {
        if !annotated.contains(org_name) {
            warn!("Organism {} has no annotations in {}", org_name, view);
        }
    }
    Ok(())
}
