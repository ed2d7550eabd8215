//! Command dispatch: builds requests from arguments and settings, calls the service

use std::io;

use clap::CommandFactory;
use itertools::Itertools;
use tracing::{debug, info, instrument};

use crate::application::services::{EstimationRequest, OutputPaths, RunSummary};
use crate::cli::args::{Cli, Commands, ConfigCommands, EstimateArgs};
use crate::cli::error::{CliError, CliResult};
use crate::cli::output;
use crate::config::{global_config_path, Settings};
use crate::domain::NodeTime;
use crate::infrastructure::di::ServiceContainer;

pub fn execute_command(cli: &Cli) -> CliResult<()> {
    let Some(command) = &cli.command else {
        return Err(CliError::Usage(
            "no command given, see 'haptime --help'".into(),
        ));
    };

    match command {
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(*shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
        Commands::Config { command } => config_command(command, cli),
        Commands::Run(args) => {
            let container = container(cli)?;
            run(&container, args)
        }
        Commands::Prepare(args) => {
            let container = container(cli)?;
            prepare(&container, args)
        }
        Commands::Summarize { tree, out, prefix } => {
            let container = container(cli)?;
            let table = OutputPaths::new(prefix).time_table();
            let rows = container
                .estimation_service()
                .summarize(tree, out, &table)?;
            print_rows(&rows);
            output::action("Written", &table.display());
            Ok(())
        }
        Commands::Tree { tree } => {
            let container = container(cli)?;
            let normalized = container.estimation_service().normalized_tree(tree)?;
            output::info(&normalized.to_display_tree());
            output::detail(&format!(
                "{} leaves, {} internal nodes",
                normalized.leaf_count(),
                normalized.qualifying_internal_nodes().len()
            ));
            output::info(&normalized.to_newick());
            Ok(())
        }
    }
}

fn container(cli: &Cli) -> CliResult<ServiceContainer> {
    let settings = Settings::load(cli.config.as_deref())?;
    debug!("settings: {:?}", settings);
    Ok(ServiceContainer::new(settings))
}

fn config_command(command: &ConfigCommands, cli: &Cli) -> CliResult<()> {
    match command {
        ConfigCommands::Show => {
            let settings = Settings::load(cli.config.as_deref())?;
            output::info(&settings.to_toml()?);
        }
        ConfigCommands::Template => output::info(&Settings::template()),
        ConfigCommands::Path => match cli.config.clone().or_else(global_config_path) {
            Some(path) => {
                let state = if path.exists() { "exists" } else { "not found" };
                output::info(&format!("{} ({})", path.display(), state));
            }
            None => output::warning("cannot determine config directory"),
        },
    }
    Ok(())
}

/// Command-line flags over settings.
pub fn build_request(args: &EstimateArgs, settings: &Settings) -> CliResult<EstimationRequest> {
    if let Some(rate) = args.mut_rate {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(CliError::InvalidArgs(format!(
                "--mut-rate must be positive, got {rate}"
            )));
        }
    }
    Ok(EstimationRequest {
        seq: args.seq.clone(),
        seq_format: args.seq_format,
        tree: args.tree.clone(),
        calibration: args.cal.clone(),
        auto_calibration: args.auto_cal,
        model: args.model.unwrap_or(settings.model),
        mut_rate: args.mut_rate.unwrap_or(settings.mut_rate),
        filter: args.filter.unwrap_or(settings.filter),
        nsample: Some(args.nsample.unwrap_or(settings.nsample)),
        prefix: args.prefix.clone(),
    })
}

fn log_run_header(request: &EstimationRequest) {
    info!("Date: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    info!("Tree file: {}", request.tree.display());
    info!("Seq file: {}", request.seq.display());
    if let Some(cal) = &request.calibration {
        info!("Calibration: {}", cal);
    }
    if request.auto_calibration {
        info!("Automatic calibration requested");
    }
    info!("Mutation rate: {}", request.mut_rate);
    info!("Model: {}", request.model);
}

#[instrument(skip(container))]
fn run(container: &ServiceContainer, args: &EstimateArgs) -> CliResult<()> {
    let request = build_request(args, &container.settings)?;
    log_run_header(&request);

    output::action(
        "Estimating",
        &format!(
            "divergence times with {}, this may take some time",
            container.settings.estimator
        ),
    );
    let summary = container.estimation_service().run(&request)?;
    report_summary(&summary);
    Ok(())
}

#[instrument(skip(container))]
fn prepare(container: &ServiceContainer, args: &EstimateArgs) -> CliResult<()> {
    let request = build_request(args, &container.settings)?;
    log_run_header(&request);

    let prepared = container.estimation_service().prepare(&request)?;
    output::success(&format!(
        "Prepared {} leaves{}",
        prepared.tree.leaf_count,
        prepared
            .tree
            .root_age
            .map(|age| format!(", root age {}", age))
            .unwrap_or_default()
    ));
    for path in [&prepared.seqfile, &prepared.treefile, &prepared.ctlfile] {
        output::detail(&path.display());
    }
    Ok(())
}

fn report_summary(summary: &RunSummary) {
    print_rows(&summary.rows);
    output::success("Divergence time estimation finished");
    output::action("Time table", &summary.table.display());
    output::action("Estimator report", &summary.report.display());
}

fn print_rows(rows: &[NodeTime]) {
    output::header("NodeName\tNodeTime\tLower\tUpper");
    let body = rows
        .iter()
        .map(|r| format!("{}\t{}\t{}\t{}", r.name, r.time, r.lower, r.upper))
        .join("\n");
    if !body.is_empty() {
        output::info(&body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SubstitutionModel;
    use clap::Parser;

    fn estimate_args(argv: &[&str]) -> EstimateArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Some(Commands::Run(args)) | Some(Commands::Prepare(args)) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn given_no_flags_when_building_request_then_uses_settings() {
        let args = estimate_args(&["haptime", "run", "--seq", "s.fa", "--tree", "t.nwk", "--auto-cal"]);
        let settings = Settings {
            model: SubstitutionModel::F84,
            nsample: 5000,
            ..Default::default()
        };

        let request = build_request(&args, &settings).unwrap();

        assert_eq!(request.model, SubstitutionModel::F84);
        assert_eq!(request.nsample, Some(5000));
        assert_eq!(request.filter, settings.filter);
        assert!(request.auto_calibration);
        assert!(request.calibration.is_none());
    }

    #[test]
    fn given_flags_when_building_request_then_flags_win() {
        let args = estimate_args(&[
            "haptime", "prepare", "--seq", "s.fa", "--tree", "t.nwk", "--cal", "B:<20",
            "--mut-rate", "1e-9", "--filter", "0", "-o", "out/run1",
        ]);

        let request = build_request(&args, &Settings::default()).unwrap();

        assert_eq!(request.mut_rate, 1e-9);
        assert_eq!(request.filter, 0.0);
        assert_eq!(request.prefix, std::path::PathBuf::from("out/run1"));
        assert_eq!(request.calibration.as_deref(), Some("B:<20"));
    }

    #[test]
    fn given_zero_rate_when_building_request_then_invalid_args() {
        let args = estimate_args(&[
            "haptime", "run", "--seq", "s.fa", "--tree", "t.nwk", "--auto-cal", "--mut-rate", "0",
        ]);

        let result = build_request(&args, &Settings::default());

        assert!(matches!(result, Err(CliError::InvalidArgs(_))));
    }

    #[test]
    fn given_no_command_when_executing_then_usage_error() {
        let cli = Cli::try_parse_from(["haptime"]).unwrap();
        let result = execute_command(&cli);
        assert!(matches!(result, Err(CliError::Usage(_))));
    }
}
