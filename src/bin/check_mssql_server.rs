use check_mssql::{plugin, Family};
use color_eyre::eyre::Report;

fn main() -> Result<(), Report> {
    color_eyre::install()?;
    std::process::exit(plugin::main_for(Family::Server));
}
