use anyhow::Result;
use clap::{Arg, ArgAction, Command};

use modbus_write_node::cli::commands::handle_subcommands;

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("TOML node configuration")
}

fn build_cli() -> Command {
    Command::new("modbus-write-node")
        .version(modbus_write_node::VERSION)
        .about("Correlated Modbus write endpoint for flow runtimes")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Debug logging unless RUST_LOG is set"),
        )
        .subcommand(
            Command::new("run")
                .about("Read JSON flow messages from stdin and write them through a loopback transport")
                .arg(config_arg())
                .arg(Arg::new("unit-id").long("unit-id").value_name("ID"))
                .arg(Arg::new("address").long("address").value_name("ADDR"))
                .arg(Arg::new("quantity").long("quantity").value_name("N"))
                .arg(
                    Arg::new("data-type")
                        .long("data-type")
                        .value_name("TYPE")
                        .help("Coil, HoldingRegister, MCoils or MHoldingRegisters"),
                )
                .arg(
                    Arg::new("fail-every")
                        .long("fail-every")
                        .value_name("N")
                        .help("Make the loopback fail every n-th write"),
                )
                .arg(
                    Arg::new("empty-msg-on-fail")
                        .long("empty-msg-on-fail")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load and validate a node configuration")
                .arg(config_arg().required(true)),
        )
        .subcommand(
            Command::new("init-config")
                .about("Write the default node configuration")
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .required(true),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let default_level = if matches.get_flag("verbose") { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if !handle_subcommands(&matches).await? {
        build_cli().print_help()?;
    }

    Ok(())
}
