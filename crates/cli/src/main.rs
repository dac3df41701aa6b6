use std::process::ExitCode;

fn main() -> ExitCode {
    colloquy_cli::run()
}
