extern crate homolink;

extern crate clap;
use clap::*;

extern crate log;

extern crate bird_tool_utils;
use bird_tool_utils::clap_utils::*;

static PROGRAM_NAME: &str = "Homolink";

fn main() {
    let app = build_cli();
    let matches = app.clone().get_matches();
    set_log_level(&matches, false, PROGRAM_NAME, crate_version!());

    match matches.subcommand_name() {
        Some("link") => {
            let m = matches.subcommand_matches("link").unwrap();
            set_log_level(m, true, PROGRAM_NAME, crate_version!());
            homolink::link_argument_parsing::run_link_subcommand(m);
        }
        Some("validate") => {
            let m = matches.subcommand_matches("validate").unwrap();
            set_log_level(m, true, PROGRAM_NAME, crate_version!());
            homolink::family_validation::run_validate_subcommand(m);
        }
        _ => panic!("Programming error"),
    }
}

fn build_cli() -> Command {
    let mut app = add_clap_verbosity_flags(Command::new("homolink"))
        .version(crate_version!())
        .author(homolink::AUTHOR)
        .about("Single-linkage homologous protein family builder")
        .arg_required_else_help(true)
        .subcommand(
            add_clap_verbosity_flags(
                Command::new("validate")
                    .about("Check that each protein belongs to exactly one family")
                    .arg(
                        Arg::new("db")
                            .long("db")
                            .required(true)
                            .help("Path to the SQLite genomics database"),
                    )
                    .arg(
                        Arg::new("family-table")
                            .long("family-table")
                            .required(true)
                            .help("Family table to check"),
                    ),
            ),
        );

    app = homolink::link_argument_parsing::add_link_subcommand(app);
    app
}
