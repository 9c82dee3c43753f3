pub mod email;

pub use email::{EmailError, EmailService, LogMailer, Mailer, OutgoingEmail};

#[cfg(test)]
pub use email::MockMailer;
