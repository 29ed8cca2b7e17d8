pub mod annotation;
pub mod duplicate_resolver;
pub mod family_linker;
pub mod family_validation;
pub mod link_argument_parsing;
pub mod preflight;
pub mod store;

#[macro_use]
extern crate log;
extern crate clap;

pub const DEFAULT_HIT_TABLE: &str = "biblast";
pub const DEFAULT_BATCH_SIZE: &str = "5000";

pub const AUTHOR: &str =
    "Ben J. Woodcroft, Centre for Microbiome Research, Queensland University of Technology";
