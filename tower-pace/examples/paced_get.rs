use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use http::Request;
use http_body_util::BodyExt;
use http_body_util::Empty;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tower::ServiceExt;
use tower_pace::Context;
use tower_pace::Credentials;
use tower_pace::RetryConfig;
use tower_pace::TransportBuilder;
use tracing_subscriber::EnvFilter;

/// Fetch a URL repeatedly through a shared pacer.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// URL to fetch
    url: String,

    /// Number of requests to issue concurrently
    #[arg(short, long, default_value_t = 20)]
    count: usize,

    /// Bearer token sent with every request
    #[arg(long, env = "PLATFORM_TOKEN")]
    token: Option<String>,

    /// Total calls per request, first one included
    #[arg(long, default_value_t = 4)]
    max_attempts: u32,

    /// Per-attempt timeout, e.g. "5s"
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    attempt_timeout: Duration,

    /// Deadline for each request across all of its attempts, e.g. "1m"
    #[arg(long, value_parser = humantime::parse_duration)]
    deadline: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tower_pace=debug")),
        )
        .init();

    let args = Args::parse();

    let shutdown = CancellationToken::new();
    let mut builder = TransportBuilder::new()
        .with_retry(RetryConfig::new(args.max_attempts))
        .with_attempt_timeout(args.attempt_timeout)
        .with_lifetime(Context::background().with_token(shutdown.clone()));
    if let Some(token) = &args.token {
        builder = builder.with_credentials(Credentials::bearer(token)?);
    }
    let client = builder.build::<Empty<Bytes>>()?;

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    });

    let mut tasks = JoinSet::new();
    for n in 0..args.count {
        let client = client.clone();
        let mut request = Request::get(args.url.as_str()).body(Empty::new())?;
        if let Some(deadline) = args.deadline {
            request
                .extensions_mut()
                .insert(Context::background().with_timeout(deadline));
        }
        tasks.spawn(async move {
            let started = tokio::time::Instant::now();
            let result = match client.oneshot(request).await {
                Ok(response) => {
                    let status = response.status();
                    response
                        .into_body()
                        .collect()
                        .await
                        .map(|body| (status, body.to_bytes().len()))
                        .map_err(BoxError::from)
                }
                Err(err) => Err(err),
            };
            (n, result, started.elapsed())
        });
    }

    while let Some(task) = tasks.join_next().await {
        let (n, result, elapsed) = task?;
        match result {
            Ok((status, len)) => println!("#{n:<4} {status} {len} bytes in {elapsed:.2?}"),
            Err(err) => println!("#{n:<4} failed after {elapsed:.2?}: {err}"),
        }
    }

    let snapshot = client.pacer().snapshot();
    println!(
        "budget: {}/{} remaining, paused: {}",
        snapshot.remaining, snapshot.limit, snapshot.paused
    );
    Ok(())
}
