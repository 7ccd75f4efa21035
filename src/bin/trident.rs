use std::process::ExitCode;

fn main() -> ExitCode {
    trident::cli::run()
}
