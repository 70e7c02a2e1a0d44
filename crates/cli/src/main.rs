use std::process::ExitCode;

fn main() -> ExitCode {
    taskbridge_cli::run()
}
