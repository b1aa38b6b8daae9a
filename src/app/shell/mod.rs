pub mod registry;
pub mod session;

pub use registry::{PendingMount, ShellRegistry};
pub use session::{ShellSession, ShellWriter, TerminalBinding, TerminalSurface, WriteOutcome};
