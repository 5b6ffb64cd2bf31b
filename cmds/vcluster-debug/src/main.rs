use anyhow::Result;
use clap::{Parser, Subcommand};
use vcluster_debug::{commands, telemetry};

#[derive(Parser)]
#[command(name = "vcluster-debug")]
#[command(about = "Debugging helpers for virtual Kubernetes clusters", long_about = None)]
#[command(version = env!("VCLUSTER_DEBUG_VERSION"))]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Collects debugging information from the vCluster
	Collect(commands::collect::CollectArgs),
}

fn log_level(cmd: &Commands) -> Option<&str> {
	match cmd {
		Commands::Collect(args) => args.log_level.as_deref(),
	}
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let _telemetry = telemetry::init(log_level(&cli.command).and_then(telemetry::parse_level))?;

	match cli.command {
		Commands::Collect(args) => commands::collect::run(args, std::io::stdout()),
	}
}
