//! External tool abstractions
//!
//! Trait-based seams over the processes, the container engine and the network
//! probes the diagnostics depend on, so checks can be exercised with scripted
//! implementations.

pub mod command;
pub mod docker;
pub mod network;

pub use command::{CommandError, CommandExecutor, CommandOutput, OutputMode, ProcessCommandExecutor};
pub use docker::{ComposeFlavor, ContainerEngine, ContainerSummary, EngineError};
pub use network::{
    CertificateInfo, HttpProbeError, HttpRequest, HttpResponse, LiveNetworkProbe, NetworkProbe, TcpProbeError,
    TlsProbeError,
};
