use crate::cli::StepsArgs;
use crate::exit_codes;
use crate::output;
use ecg_prep::Step;
use serde::Serialize;

#[derive(Serialize)]
struct StepInfo {
    name: &'static str,
    order: usize,
    description: &'static str,
}

pub fn execute(args: StepsArgs) -> i32 {
    let steps: Vec<StepInfo> = Step::ALL
        .iter()
        .enumerate()
        .map(|(i, step)| StepInfo {
            name: step.as_str(),
            order: i + 1,
            description: step.description(),
        })
        .collect();

    if args.json {
        match output::to_json(&steps, false) {
            Ok(json) => {
                if let Err(e) = output::write_output(&json, None) {
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
        println!("{:<6} {:<10} DESCRIPTION", "ORDER", "STEP");
        println!("{}", "-".repeat(80));
        for s in &steps {
            println!("{:<6} {:<10} {}", s.order, s.name, s.description);
        }
    }

    exit_codes::SUCCESS
}
