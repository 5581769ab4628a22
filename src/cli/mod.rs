use clap::{Parser, Subcommand};

pub mod commands;

#[derive(Parser)]
#[command(name = "stackctl")]
#[command(about = "Operator CLI for a containerized data-access stack")]
#[command(long_about = "stackctl manages the application stack produced by setup and diagnoses it: \
                       container health, inter-service connectivity, ports, certificates, endpoints, \
                       firewall and WAF interference. Start with 'stackctl diagnose'.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run health diagnostics against the stack and its host
    Diagnose {
        /// Expand every sub-result regardless of status
        #[arg(long, short = 'v', help = "Show every sub-result and check explanation")]
        verbose: bool,
        /// Print only the summary counts
        #[arg(long, short = 'q', help = "Print only the summary line")]
        quiet: bool,
        /// Fail instead of offering to start a stopped stack
        #[arg(long, help = "Exit with next steps instead of offering to start a stopped stack")]
        no_auto_start: bool,
        /// Run the reduced check subset
        #[arg(long, help = "Only check engine connectivity, container status and container connectivity")]
        quick: bool,
        /// Emit the report as JSON
        #[arg(long, help = "Print the environment snapshot, checks and issues as JSON")]
        json: bool,
        /// Offer automatic fixes after the report
        #[arg(
            long,
            conflicts_with_all = ["json", "quiet"],
            help = "Offer each automatic fix for confirmed execution after the report"
        )]
        fix: bool,
    },
    /// Start the stack in the background
    Up,
    /// Stop and remove the stack's containers
    Down,
    /// Show the state of the stack's containers
    Status,
}
