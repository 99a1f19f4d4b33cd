//! This tool generates a validator key pair and prints it to stdout.
#![allow(clippy::print_stdout)]

use keel_crypto::TextFmt as _;
use keel_roles::validator;

/// This tool generates a validator key pair and prints it to stdout.
fn main() {
    let validator_key = validator::SecretKey::generate();
    println!("keys:");
    println!("{}", validator_key.encode());
    println!("{}", validator_key.public().encode());
}
