use std::process::ExitCode;

fn main() -> ExitCode {
    aide_cli::run()
}
