use clap::Parser;

mod subcmd_impls;

use subcmd_impls::args::Cli;

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let cli = Cli::parse();
    if let Err(e) = cli.run_program() {
        log::error!("{e}");
        std::process::exit(1);
    }
}
