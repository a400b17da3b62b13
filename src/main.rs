//! rota-fetch - fetch a URL through the rotating proxy
//!
//! Usage: `rota-fetch <url> [count]`. Provider, strategy and limits come from
//! the `ROTA_*` environment variables.

use anyhow::{bail, Context};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rota_client::{Config, RequestSpec, RotatingClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config.log.level, &config.log.format);

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        bail!("usage: rota-fetch <url> [count]");
    };
    let count: u32 = match args.next() {
        Some(raw) => raw.parse().with_context(|| format!("invalid count: {}", raw))?,
        None => 1,
    };

    let mut client = RotatingClient::with_defaults(config.client)?;
    info!(url = %url, count, "Starting fetches");

    let mut failures = 0u32;
    for n in 1..=count {
        match client.fetch(RequestSpec::get(url.clone())).await {
            Ok(response) => println!(
                "#{} {} session={} country={} bytes={}",
                n,
                response.status,
                client.session_id().map(|id| id.to_string()).unwrap_or_default(),
                client.country().map(|c| c.as_str()).unwrap_or("-"),
                response.body.len()
            ),
            Err(e) => {
                failures += 1;
                error!(request = n, error = %e, "Fetch failed");
            }
        }
    }

    info!(
        requests = count,
        failures,
        rotations = client.rotations(),
        "Done"
    );

    if count > 0 && failures == count {
        bail!("all {} requests failed", count);
    }
    Ok(())
}

fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rota_client={},rota_fetch={}", level, level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
