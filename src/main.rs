use clap::Parser;
use qat_notifier_lib::Cli;

fn main() -> anyhow::Result<()> {
    qat_notifier_lib::run(Cli::parse())
}
