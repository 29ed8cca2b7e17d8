use std::collections::BTreeSet;
use std::io::BufRead;
use std::process;
use std::time::Instant;

use clap::*;

use crate::annotation;
use crate::duplicate_resolver;
use crate::family_linker::{self, FamilyCounter};
use crate::preflight;
use crate::store::GenomicsDb;

pub struct LinkConfig {
    pub db_path: String,
    pub hit_table: String,
    pub family_table: String,
    pub organism_selection: OrganismSelection,
    pub batch_size: usize,
    pub skip_interpro: bool,
    pub skip_go: bool,
    pub output_family_tsv: Option<String>,
}

/// Exactly one way of choosing the organisms to link.
pub enum OrganismSelection {
    List(Vec<String>),
    FromFile(String),
    All,
}

pub fn generate_link_config(m: &clap::ArgMatches) -> Result<LinkConfig, String> {
    let organisms: Vec<String> = m
        .get_many::<String>("organisms")
        .map(|orgs| orgs.cloned().collect())
        .unwrap_or_default();
    let organism_file = m.get_one::<String>("organism-file");
    let all_organisms = m.get_flag("all-organisms");

    let modes_chosen = [
        !organisms.is_empty(),
        organism_file.is_some(),
        all_organisms,
    ]
    .iter()
    .filter(|chosen| **chosen)
    .count();
    if modes_chosen == 0 {
        return Err(
            "Please select organisms with one of --organisms, --organism-file or --all-organisms"
                .to_string(),
        );
    }
    if modes_chosen > 1 {
        return Err(
            "Please select only one of --organisms, --organism-file and --all-organisms"
                .to_string(),
        );
    }

    let organism_selection = if all_organisms {
        OrganismSelection::All
    } else if let Some(file) = organism_file {
        OrganismSelection::FromFile(file.clone())
    } else {
        OrganismSelection::List(organisms)
    };

    Ok(LinkConfig {
        db_path: m.get_one::<String>("db").unwrap().clone(),
        hit_table: m.get_one::<String>("hit-table").unwrap().clone(),
        family_table: m.get_one::<String>("family-table").unwrap().clone(),
        organism_selection,
        batch_size: *m.get_one::<usize>("batch-size").unwrap(),
        skip_interpro: m.get_flag("no-interpro"),
        skip_go: m.get_flag("no-go"),
        output_family_tsv: m.get_one::<String>("output-family-tsv").cloned(),
    })
}

pub fn resolve_organism_selection(
    selection: &OrganismSelection,
    hit_organisms: &[String],
) -> Result<Vec<String>, String> {
    match selection {
        OrganismSelection::List(organisms) => Ok(organisms.clone()),
        OrganismSelection::All => Ok(hit_organisms.to_vec()),
        OrganismSelection::FromFile(path) => {
            let file = std::fs::File::open(path)
                .map_err(|e| format!("Failed to open organism file {}: {}", path, e))?;
            let mut organisms = vec![];
            for line in std::io::BufReader::new(file).lines() {
                let line =
                    line.map_err(|e| format!("Failed to read organism file {}: {}", path, e))?;
                let organism = line.trim();
                if !organism.is_empty() {
                    organisms.push(organism.to_string());
                }
            }
            if organisms.is_empty() {
                return Err(format!("Organism file {} contained no organism names", path));
            }
            Ok(organisms)
        }
    }
}

fn fatal<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}

/// The whole pipeline: preflight checks, single linkage, duplicate
/// resolution, annotation views, optional TSV export. All preconditions are
/// verified before the family table is touched.
pub fn run_link_subcommand(m: &clap::ArgMatches) {
    let run_start = Instant::now();
    let config = fatal(generate_link_config(m));

    let db = fatal(GenomicsDb::open(
        &config.db_path,
        &config.hit_table,
        &config.family_table,
    ));
    if !fatal(db.table_exists(&config.hit_table)) {
        error!(
            "Hit table {} does not exist in {} - please rerun with a hit table created upstream",
            config.hit_table, config.db_path
        );
        process::exit(1);
    }

    info!("Retrieving organisms from hit table {}", config.hit_table);
    let hit_organisms = fatal(db.hit_organisms());
    let selection = fatal(resolve_organism_selection(
        &config.organism_selection,
        &hit_organisms,
    ));
    info!("Selected {} organisms to link", selection.len());
    fatal(preflight::check_organisms_in_hit_source(
        &selection,
        &hit_organisms,
    ));

    let family_store_organisms = if fatal(db.table_exists(&config.family_table)) {
        fatal(db.family_organisms())
    } else {
        info!(
            "Family table {} does not exist yet - it will be created",
            config.family_table
        );
        vec![]
    };

    let mut combined: BTreeSet<String> = family_store_organisms.iter().cloned().collect();
    combined.extend(selection.iter().cloned());
    fatal(preflight::check_all_vs_all(
        &combined,
        &fatal(db.hit_organism_pairs()),
    ));

    info!("Retrieving organism catalog");
    let organism_ids = fatal(db.organism_ids());
    fatal(preflight::check_organisms_in_catalog(&combined, &organism_ids));

    // Preconditions hold, mutation may start.
    fatal(db.ensure_family_table());

    let already_linked: BTreeSet<&String> = family_store_organisms.iter().collect();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let missing_organisms: Vec<String> = selection
        .iter()
        .filter(|org| !already_linked.contains(org) && seen.insert((*org).clone()))
        .cloned()
        .collect();
    info!(
        "Organisms to be appended to {}: {:?}",
        config.family_table, missing_organisms
    );

    let mut counter = FamilyCounter::seeded_after(fatal(db.max_hfam()));

    let linking_start = Instant::now();
    fatal(family_linker::link_organisms(
        &db,
        &mut counter,
        &missing_organisms,
        &family_store_organisms,
        &organism_ids,
        config.batch_size,
    ));
    info!("Total linking time {:?}", linking_start.elapsed());

    let resolution_start = Instant::now();
    fatal(duplicate_resolver::resolve_duplicates(&db, &mut counter));
    info!("Duplicate resolution time {:?}", resolution_start.elapsed());

    fatal(annotation::build_annotation_views(
        &db,
        config.skip_interpro,
        config.skip_go,
    ));

    if let Some(path) = &config.output_family_tsv {
        fatal(write_family_tsv(&db, path));
    }

    info!("Finished - total runtime {:?}", run_start.elapsed());
}

pub fn write_family_tsv(db: &GenomicsDb, path: &str) -> Result<(), String> {
    let rows = db
        .family_rows()
        .map_err(|e| format!("Failed to read family table: {}", e))?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .map_err(|e| format!("Failed to open output TSV {}: {}", path, e))?;
    writer
        .write_record(&["hfam", "org_id", "org_name", "protein_id"])
        .map_err(|e| format!("Failed to write to {}: {}", path, e))?;
    for row in &rows {
        writer
            .write_record(&[
                row.hfam.to_string(),
                row.org_id.to_string(),
                row.org_name.clone(),
                row.protein_id.to_string(),
            ])
            .map_err(|e| format!("Failed to write to {}: {}", path, e))?;
    }
    writer
        .flush()
        .map_err(|e| format!("Failed to write to {}: {}", path, e))?;
    info!("Wrote {} family rows to {}", rows.len(), path);
    Ok(())
}

pub fn add_link_subcommand(app: clap::Command) -> clap::Command {
    let link_subcommand = bird_tool_utils::clap_utils::add_clap_verbosity_flags(
        Command::new("link")
            .about("Single-link BLAST hits into homologous protein families")
            .arg(
                Arg::new("db")
                    .long("db")
                    .required(true)
                    .help("Path to the SQLite genomics database"),
            )
            .arg(
                Arg::new("hit-table")
                    .long("hit-table")
                    .default_value(crate::DEFAULT_HIT_TABLE)
                    .help("Reciprocal BLAST hit table, filtered upstream by identity and coverage"),
            )
            .arg(
                Arg::new("family-table")
                    .long("family-table")
                    .required(true)
                    .help("Family table to create or append to"),
            )
            .arg(
                Arg::new("organisms")
                    .long("organisms")
                    .num_args(1..)
                    .help("List of organism names to link"),
            )
            .arg(
                Arg::new("organism-file")
                    .long("organism-file")
                    .help("File with one organism name per line"),
            )
            .arg(
                Arg::new("all-organisms")
                    .long("all-organisms")
                    .action(ArgAction::SetTrue)
                    .help("Link all organisms present in the hit table"),
            )
            .arg(
                Arg::new("batch-size")
                    .long("batch-size")
                    .value_parser(value_parser!(usize))
                    .default_value(crate::DEFAULT_BATCH_SIZE)
                    .help("Number of family rows to buffer before inserting"),
            )
            .arg(
                Arg::new("no-interpro")
                    .long("no-interpro")
                    .action(ArgAction::SetTrue)
                    .help("Do not create the InterPro annotation view"),
            )
            .arg(
                Arg::new("no-go")
                    .long("no-go")
                    .action(ArgAction::SetTrue)
                    .help("Do not create the GO annotation view"),
            )
            .arg(
                Arg::new("output-family-tsv")
                    .long("output-family-tsv")
                    .help("Write the final family table to this TSV file"),
            ),
    );

    app.subcommand(link_subcommand)
}
