use std::process::ExitCode;

fn main() -> ExitCode {
    match gatehoused::run_server() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("gatehoused: {error}");
            ExitCode::FAILURE
        }
    }
}
