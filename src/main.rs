use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use clap_complete::CompleteEnv;
use sshhop::{askpass, cli::Cli, init_logging, App, Config, Error};

fn main() -> ExitCode {
    // ssh runs us again as its askpass helper
    if let Some(code) = askpass::answer_from_env() {
        return ExitCode::from(code as u8);
    }

    // answers `COMPLETE=<shell> sshhop ...` requests and exits
    CompleteEnv::with_factory(Cli::command).complete();

    let cli = Cli::parse();
    init_logging();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err.downcast_ref::<Error>().map_or(1, Error::exit_code);
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    App::new(config).run(cli.command)
}
