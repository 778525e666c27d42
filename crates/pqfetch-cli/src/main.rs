use std::process::ExitCode;

mod cli;

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration errors (bad flags, missing input dir) land here with exit 1.
    match cli::run_from_args().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("pqfetch error: {:#}", err);
            ExitCode::from(1)
        }
    }
}
