// Root app shell and re-exports for workspace crates used by the binary.
pub use data_runtime as data;
pub use net_core as net;
pub use server_core as sim;
pub mod server;
