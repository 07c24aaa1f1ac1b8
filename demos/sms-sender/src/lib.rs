//! Demo provider module: sends messages "by SMS".
//!
//! Exports one provider under `message-sender`. Build and install it the same
//! way as the email demo.

use courier_core::{ContractId, MessageSender, ModuleExports, SendError, export_module};

#[derive(Debug, Default, Clone)]
pub struct SmsSender;

impl MessageSender for SmsSender {
    fn send(&self, message: &str) -> Result<(), SendError> {
        if message.is_empty() {
            return Err(SendError::failed("refusing to send an empty SMS"));
        }
        println!("SmsSender: {message}");
        Ok(())
    }

    fn sender_name(&self) -> &str {
        "sms"
    }
}

fn exports() -> ModuleExports {
    ModuleExports::new(env!("CARGO_PKG_NAME")).export_as("sms", &[ContractId::message_sender()], || Ok(SmsSender))
}

export_module!(exports);
