// Calibrate link free-flow speeds against observed path travel times
// from csv snapshots of the host's link and path tables.

use std::{env, error::Error, path::Path};
#[macro_use]
extern crate speed_calib;
use speed_calib::{
    cli::{positional, CliErr},
    config::CalibrationConfig,
    host::csv::CsvHost,
    report::*,
    run,
};

fn main() -> Result<(), Box<dyn Error>> {
    let _reporter = enable_reporting("calibrate");

    let mut args = env::args().skip(1);
    let links_arg = positional(&mut args, "No link table arg given")?;
    let paths_arg = positional(&mut args, "No path table arg given")?;
    let config = match args.next() {
        Some(config_arg) => {
            let file = std::fs::File::open(Path::new(&config_arg))?;
            serde_json::from_reader(file)?
        }
        None => CalibrationConfig::default(),
    };

    report!("links_table", links_arg.as_str());
    report!("paths_table", paths_arg.as_str());

    let mut host = CsvHost::from_files(&links_arg, &paths_arg)?;
    let outcome = run::run(&mut host, &config);
    outcome.emit(&config)?;

    if !config.dry_run && outcome.error.is_none() {
        let out = Path::new(&links_arg).with_extension("calibrated.csv");
        host.flush_links(&out)?;
        report!("calibrated_table", out.to_str().ok_or(CliErr("non-utf8 output path"))?);
    }

    // flush the run log before exiting with the run's disposition
    drop(_reporter);
    std::process::exit(outcome.exit_code());
}
