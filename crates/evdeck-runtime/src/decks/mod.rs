//! Stock decks registered by the kernel builder.

mod console;
mod execution;
mod hardware;

pub use console::{ConsoleBackend, StdConsole};
pub use execution::ExecutionDeck;
pub use hardware::HardwareDeck;
