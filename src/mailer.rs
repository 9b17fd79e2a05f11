// src/mailer.rs
//! Verification-mail hand-off. Actual SMTP delivery is an external concern;
//! the demo records what would have been sent so the link stays usable.

use log::info;

pub fn send_verification(to: &str, verify_link: &str) {
    info!(
        "Verification mail for {}: visit {} to activate the account",
        to, verify_link
    );
}
