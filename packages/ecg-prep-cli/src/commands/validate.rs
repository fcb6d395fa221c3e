use crate::cli::ValidateArgs;
use crate::commands::{config_path, load_config};
use crate::exit_codes;
use crate::output;
use ecg_prep::BandpassConfig;
use serde::Serialize;

#[derive(Serialize)]
struct ValidateOutput {
    config_path: String,
    valid: bool,
    target_fs: Option<u32>,
    bandpass: Option<BandpassConfig>,
    window_samples: Option<usize>,
    stride_samples: Option<usize>,
    drop_last: Option<bool>,
    error: Option<String>,
}

pub fn execute(args: ValidateArgs) -> i32 {
    let result = match load_config(&args.root, args.config.as_deref()) {
        Ok((path, config)) => {
            let spec = config.window_spec();
            ValidateOutput {
                config_path: path.display().to_string(),
                valid: true,
                target_fs: Some(config.target_fs),
                bandpass: Some(config.bandpass),
                window_samples: Some(spec.window),
                stride_samples: Some(spec.stride),
                drop_last: Some(spec.drop_last),
                error: None,
            }
        }
        Err(msg) => ValidateOutput {
            config_path: config_path(&args.root, args.config.as_deref())
                .display()
                .to_string(),
            valid: false,
            target_fs: None,
            bandpass: None,
            window_samples: None,
            stride_samples: None,
            drop_last: None,
            error: Some(msg),
        },
    };

    if args.json {
        match output::to_json(&result, false) {
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
    } else if let Some(ref err) = result.error {
        eprintln!("Error: {}", err);
    } else {
        println!(
            "Config '{}' is valid: {} Hz, bandpass {}-{} Hz (order {}), window {} samples, stride {} samples{}",
            result.config_path,
            result.target_fs.unwrap_or_default(),
            result.bandpass.map(|b| b.low).unwrap_or_default(),
            result.bandpass.map(|b| b.high).unwrap_or_default(),
            result.bandpass.map(|b| b.order).unwrap_or_default(),
            result.window_samples.unwrap_or_default(),
            result.stride_samples.unwrap_or_default(),
            if result.drop_last == Some(false) {
                ", trailing window padded"
            } else {
                ""
            }
        );
    }

    if result.valid {
        exit_codes::SUCCESS
    } else {
        exit_codes::INPUT_ERROR
    }
}
