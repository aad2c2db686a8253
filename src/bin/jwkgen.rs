//! # JWK Generator
//!
//! Prints a freshly generated RSA-2048 signing key as a JSON Web Key, suitable for
//! `--client-jwk-file`.

use jwker_controller::jwk::Jwk;

fn main() -> anyhow::Result<()> {
    let jwk = Jwk::generate()?;
    println!("{}", serde_json::to_string_pretty(&jwk)?);
    Ok(())
}
