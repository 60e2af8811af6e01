mod health;
mod receive;

use clap::{Parser, Subcommand};

use crate::{kubectl::Kubectl, Result};

#[derive(Debug, Parser)]
#[command(version = crate::version::VERSION, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Address of the Kubernetes API server. Without it kubectl uses its own configuration.
    #[arg(long = "server", env = "KUBERNETES_API_SERVER", global = true)]
    server: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the receive hook on the ref updates read from stdin
    Receive(receive::ReceiveArgs),

    /// Check that the cluster can be reached by listing its namespaces
    Health(health::HealthArgs),
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let kubectl = Kubectl::new(self.server);
        match self.command {
            Commands::Receive(args) => receive::receive(&kubectl, args),
            Commands::Health(args) => health::health(kubectl, args),
        }
    }
}
