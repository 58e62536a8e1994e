use anyhow::{bail, Context, Result};
use clap::Parser;

use features_api::auth::{generate_jwt, Claims};
use features_api::config;

/// Mint a signed access token for a configured user.
#[derive(Debug, Parser)]
#[command(name = "features-token", version)]
struct Args {
    /// User name the token authorizes
    user: String,

    /// Token lifetime in seconds
    #[arg(default_value_t = 86_400)]
    duration: i64,

    /// Path to the configuration file
    #[arg(default_value = "config.json")]
    config: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = config::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config))?;

    let Some(user) = config.users.get(&args.user) else {
        bail!("unknown user: {}", args.user);
    };

    let claims = Claims::new(&args.user, args.duration, &user.auth);
    let token = generate_jwt(&claims, &user.auth)?;
    println!("{}", token);

    Ok(())
}
