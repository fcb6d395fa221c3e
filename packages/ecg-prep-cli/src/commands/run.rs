use crate::cli::{ProjectArgs, RunArgs};
use crate::commands::load_config;
use crate::exit_codes;
use crate::output;
use ecg_prep::{PipelineConfig, PipelineRunner, StageReport, Step};
use serde::Serialize;

#[derive(Serialize)]
struct RunOutput {
    root: String,
    config_path: String,
    config: PipelineConfig,
    reports: Vec<StageReport>,
}

pub fn execute(args: RunArgs) -> i32 {
    let steps = if args.steps.is_empty() {
        Step::ALL.to_vec()
    } else {
        args.steps
    };
    execute_steps(&args.project, &steps)
}

pub fn execute_steps(args: &ProjectArgs, steps: &[Step]) -> i32 {
    let (config_path, config) = match load_config(&args.root, args.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let runner = match PipelineRunner::new(config.clone(), &args.root) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let reports = match runner.run_steps(steps) {
        Ok(reports) => reports,
        Err(e) => {
            eprintln!("Error: {}", e);
            return if e.is_fatal() {
                exit_codes::INPUT_ERROR
            } else {
                exit_codes::EXECUTION_ERROR
            };
        }
    };

    let partial = reports.iter().any(StageReport::is_partial);

    if args.json {
        let result = RunOutput {
            root: args.root.clone(),
            config_path: config_path.display().to_string(),
            config,
            reports,
        };
        match output::to_json(&result, args.compact) {
            Ok(json) => {
                if let Err(e) = output::write_output(&json, args.output.as_deref()) {
                    eprintln!("Error: {}", e);
                    return exit_codes::EXECUTION_ERROR;
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return exit_codes::EXECUTION_ERROR;
            }
        }
    } else {
        let text = format_reports(&reports);
        if let Err(e) = output::write_output(&text, args.output.as_deref()) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    }

    if partial {
        exit_codes::PARTIAL_FAILURE
    } else {
        exit_codes::SUCCESS
    }
}

fn format_reports(reports: &[StageReport]) -> String {
    let mut lines = Vec::new();
    for report in reports {
        lines.push(format!(
            "{:<9} processed={} skipped={} degraded={} rows={} ({:.1}s) -> {}",
            report.step.as_str(),
            report.processed,
            report.skipped,
            report.degraded,
            report.rows,
            report.elapsed_ms / 1000.0,
            report.output.display()
        ));
        for skipped in &report.skipped_recordings {
            lines.push(format!(
                "  skipped {}/{}: {}",
                skipped.class, skipped.recname, skipped.reason
            ));
        }
    }
    lines.join("\n")
}
