//! Driver-side process control: launches a debuggee directly or through a
//! remote BindServer, behind one uniform wait/exit-code/kill surface.

mod binder;
mod options;
mod process;

pub use binder::{Debugee, DebugeeBinder, LaunchCommand, RemoteDebugee};
pub use options::{HarnessOptions, LaunchMode};
pub use process::DebugeeProcess;
