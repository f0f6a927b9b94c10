use basewarden::cli;

fn main() -> std::process::ExitCode {
    basewarden::telemetry::init();
    let command = cli::run();
    match cli::run_cli_app(command) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
