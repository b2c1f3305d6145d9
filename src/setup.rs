//! Configuration setup subcommands: `set-pass` and `add-oper`.
//!
//! Both prompt on stdin, hash the secret with argon2 and rewrite the
//! configuration file. The daemon never sees a plaintext secret at rest.

use anyhow::{Context as _, Result};
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHasher};
use std::io::{BufRead, Write};

use crate::config::{Config, OperBlock};

/// Set the server password in `config_path`.
pub fn set_pass(config_path: &str) -> Result<()> {
    let mut config = Config::load(config_path)?;

    let password = prompt("server password: ")?;
    config.password = Some(hash_password(&password)?);
    config.save(config_path)?;

    println!("server password updated");
    Ok(())
}

/// Append an operator credential to `config_path`.
pub fn add_oper(config_path: &str) -> Result<()> {
    let mut config = Config::load(config_path)?;

    let name = prompt("operator name: ")?;
    if name.is_empty() {
        anyhow::bail!("operator name must not be empty");
    }
    let password = prompt("operator password: ")?;

    config.opers.push(OperBlock {
        name: name.clone(),
        password: hash_password(&password)?,
    });
    config.save(config_path)?;

    println!("operator {name} added");
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    std::io::stdout().flush().context("flush stdout")?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Argon2id hash in PHC string form.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("hash password: {e}"))?;
    Ok(hash.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::PasswordHash;
    use argon2::PasswordVerifier;

    #[test]
    fn hashes_verify_with_argon2() {
        let hash = hash_password("hunter2").unwrap();
        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(Argon2::default()
            .verify_password(b"hunter2", &parsed)
            .is_ok());
        assert!(Argon2::default()
            .verify_password(b"wrong", &parsed)
            .is_err());
    }
}
