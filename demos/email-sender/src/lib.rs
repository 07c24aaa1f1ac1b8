//! Demo provider module: sends messages "by email".
//!
//! Exports one provider under both `message-sender` and `message-sender.v2`.
//!
//! # Building
//!
//! ```bash
//! cargo build --release
//! ```
//!
//! Copy `target/release/libcourier_email_sender.so` (`.dylib` on macOS,
//! `courier_email_sender.dll` on Windows) into a plugin directory and run:
//!
//! ```bash
//! courier run --dir <plugin-dir>
//! ```

use courier_core::{ContractId, MessageSender, ModuleExports, SendError, export_module};

/// Prints every message to stdout
#[derive(Debug, Clone)]
pub struct EmailSender {
    prefix: &'static str,
}

impl EmailSender {
    pub fn new() -> Self {
        Self { prefix: "EmailSender" }
    }

    /// The variant bound to `message-sender.v2`
    pub fn v2() -> Self {
        Self {
            prefix: "EmailSender Send2",
        }
    }
}

impl Default for EmailSender {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSender for EmailSender {
    fn send(&self, message: &str) -> Result<(), SendError> {
        println!("{}: {}", self.prefix, message);
        Ok(())
    }

    fn sender_name(&self) -> &str {
        "email"
    }
}

fn exports() -> ModuleExports {
    ModuleExports::new(env!("CARGO_PKG_NAME"))
        .export_as("email", &[ContractId::message_sender()], || Ok(EmailSender::new()))
        .export_as("email", &[ContractId::message_sender_v2()], || Ok(EmailSender::v2()))
}

export_module!(exports);
