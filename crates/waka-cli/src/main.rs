use std::process::ExitCode;

use clap::Parser;
use waka_cli::{CliConfig, Outcome, run};

fn main() -> ExitCode {
    let cfg = CliConfig::parse();

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("waka: cannot start runtime: {e}");
            return ExitCode::from(3);
        }
    };

    let result = rt.block_on(async {
        let interrupt = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        run(&cfg, &mut std::io::stdout(), interrupt).await
    });

    let code = match result {
        Ok(outcome) => {
            match &outcome {
                Outcome::Rejected { status, body } => eprintln!("waka: rejected ({status}): {body}"),
                Outcome::Aborted(reason) => eprintln!("waka: {reason}"),
                Outcome::Finished(_) => {}
            }
            outcome.exit_code()
        }
        Err(e) => {
            eprintln!("waka: {e}");
            e.exit_code()
        }
    };
    // exit statuses are taken modulo 256, so -1 reads as 255
    ExitCode::from(code as u8)
}
