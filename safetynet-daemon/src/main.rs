use std::process::ExitCode;

fn main() -> ExitCode {
    let Some(home) = dirs::home_dir() else {
        eprintln!("safetynet-daemon: could not determine home directory");
        return ExitCode::FAILURE;
    };
    match safetynet_daemon::start_blocking(&home) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("safetynet-daemon: {err}");
            ExitCode::FAILURE
        }
    }
}
