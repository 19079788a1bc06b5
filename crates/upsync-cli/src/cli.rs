//! Command line definition

use crate::events::InstanceSpec;
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Path to the TOML configuration file")
}

fn instance_arg() -> Arg {
    Arg::new("instance")
        .long("instance")
        .short('i')
        .action(ArgAction::Append)
        .value_parser(|s: &str| s.parse::<InstanceSpec>())
        .help("Backend instance as ADDR=WEIGHT, e.g. 10.0.0.1:9000=5 (repeatable)")
}

/// Build the `upsync` command
#[must_use]
pub fn build_cli() -> Command {
    Command::new("upsync")
        .version(upsync_core::VERSION)
        .about("Keeps a remote nginx upstream block in step with registered instances")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("render")
                .about("Print the configuration for the given instances")
                .arg(instance_arg()),
        )
        .subcommand(
            Command::new("check")
                .about("Validate a configuration file")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("push")
                .about("Register the given instances and run one refresh cycle")
                .arg(config_arg())
                .arg(instance_arg()),
        )
        .subcommand(
            Command::new("run")
                .about("Apply registrar events read from stdin, one per line")
                .arg(config_arg()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn render_collects_instances() {
        let matches = build_cli()
            .try_get_matches_from(["upsync", "render", "-i", "a:1=5", "--instance", "b=2"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "render");

        let instances: Vec<InstanceSpec> = args
            .get_many::<InstanceSpec>("instance")
            .unwrap()
            .cloned()
            .collect();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[1].address, "b");
        assert_eq!(instances[1].weight, 2);
    }

    #[test]
    fn bad_instance_rejected() {
        let result = build_cli().try_get_matches_from(["upsync", "render", "-i", "a:1"]);
        assert!(result.is_err());
    }

    #[test]
    fn push_requires_config() {
        let result = build_cli().try_get_matches_from(["upsync", "push", "-i", "a:1=5"]);
        assert!(result.is_err());
    }
}
