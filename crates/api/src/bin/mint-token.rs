//! Issue a bearer token for local testing
//!
//! Usage: mint-token <ROLES> [ORG_ID] [ACTOR_ID]
//!
//! ROLES is a comma separated list of ADMIN, ORGANIZATION and DRIVER.
//! Reads JWT_SECRET and JWT_EXPIRY_HOURS from the environment or `.env`.

use std::env;

use anyhow::{bail, Context};
use uuid::Uuid;
use wastewise_api::auth::JwtManager;
use wastewise_shared::types::Role;

fn parse_roles(raw: &str) -> anyhow::Result<Vec<Role>> {
    let roles = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Role>().map_err(anyhow::Error::msg))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if roles.is_empty() {
        bail!("at least one role is required");
    }
    Ok(roles)
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(raw_roles) = args.first() else {
        eprintln!("Usage: mint-token <ROLES> [ORG_ID] [ACTOR_ID]");
        std::process::exit(2);
    };

    let roles = parse_roles(raw_roles)?;
    let org_id = args
        .get(1)
        .map(|s| Uuid::parse_str(s).context("ORG_ID must be a UUID"))
        .transpose()?;
    let actor_id = match args.get(2) {
        Some(s) => Uuid::parse_str(s).context("ACTOR_ID must be a UUID")?,
        None => Uuid::new_v4(),
    };

    let secret = env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
    if secret.len() < 32 {
        bail!("JWT_SECRET must be at least 32 characters");
    }
    let expiry_hours = env::var("JWT_EXPIRY_HOURS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(24);

    let token = JwtManager::new(&secret, expiry_hours).generate_token(actor_id, org_id, &roles)?;

    eprintln!("actor_id: {}", actor_id);
    println!("{}", token);
    Ok(())
}
