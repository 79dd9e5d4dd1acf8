// ========================================================================================
//
//                 nbglm: overdispersed counts and a negative binomial GLM
//
// ========================================================================================
//
// Simulates a cohort whose monthly incident counts are negative binomial, fits a
// negative binomial GLM with a log link, and prints the data preview, descriptive
// statistics, the regression table and a comparison against a Poisson fit.
//
// Every parameter is fixed. The command line only answers `--help` and `--version`.

use clap::Parser;
use nbglm::data::{COVARIATES, MONTHLY_INCIDENTS, ObservationTable};
use nbglm::diagnostics::compare_to_poisson;
use nbglm::estimate::{fit_negative_binomial, fit_poisson};
use nbglm::matrix::DesignMatrix;
use nbglm::model::FitConfig;
use nbglm::report;
use nbglm::simulate::{SimulationConfig, synthesize};
use std::io::{self, BufWriter, Write};
use std::process;

#[derive(Parser, Debug)]
#[command(
    name = "nbglm",
    version,
    about = "Simulates overdispersed count data and fits a negative binomial GLM.",
    long_about = "Draws 500 subjects with a peer-risk score, a parenting-style indicator and a \
                 negative binomial monthly incident count, then fits a negative binomial GLM \
                 (log link, dispersion by maximum likelihood) and reports why a Poisson model \
                 is inadequate."
)]
struct Args {}

fn main() {
    Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let simulation = SimulationConfig::default();
    let data = synthesize(&simulation)?;
    let table = ObservationTable::from_simulation(&data)?;

    report::write_preview(&mut out, &table)?;
    report::write_descriptives(&mut out, &table.describe_response()?)?;

    let covariates = table.covariates(&COVARIATES)?;
    let design = DesignMatrix::with_constant(covariates.view(), &COVARIATES)?;
    let y = table.response()?;

    let config = FitConfig::default();
    let negative_binomial = fit_negative_binomial(&design, y.view(), &config)?;
    let poisson = fit_poisson(&design, y.view(), &config)?;

    report::write_model_summary(&mut out, &negative_binomial, MONTHLY_INCIDENTS)?;
    report::write_comparison(&mut out, &compare_to_poisson(&poisson, &negative_binomial))?;
    report::write_conclusion(&mut out)?;

    out.flush()?;
    Ok(())
}
