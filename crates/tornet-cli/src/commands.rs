//! CLI command implementations.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::future::Future;
use tornet_core::tor::Method;
use tornet_core::{TorConfig, TorNetworkClient};

/// Connect, run `f`, and disconnect whatever `f` returned.
async fn with_client<F, Fut>(config: TorConfig, f: F) -> Result<()>
where
    F: FnOnce(TorNetworkClient) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let client = TorNetworkClient::new(config);
    tracing::info!("Connecting to Tor...");
    if !client.connect().await {
        let reason = client
            .last_failure()
            .map(|f| f.message)
            .unwrap_or_else(|| "unknown error".to_string());
        bail!("Failed to connect to Tor: {}", reason);
    }

    let result = f(client.clone()).await;
    client.disconnect().await;
    result
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    state: String,
    tor_version: String,
    socks_proxy: String,
    circuits: usize,
    built_circuits: usize,
    streams: usize,
}

/// Show connection status.
pub async fn status(config: TorConfig, json: bool) -> Result<()> {
    with_client(config, |client| async move {
        let circuits = client.get_circuit_info().await;
        let streams = client.get_stream_info().await;
        let report = StatusReport {
            state: client.state().to_string(),
            tor_version: client.tor_version().await.unwrap_or_default(),
            socks_proxy: client.config().socks_addr(),
            circuits: circuits.len(),
            built_circuits: circuits
                .iter()
                .filter(|c| c.state == tornet_core::tor::CircuitState::Built)
                .count(),
            streams: streams.len(),
        };

        if json {
            return print_json(&report);
        }
        println!("Tor status:");
        println!("  State:       {}", report.state);
        println!("  Version:     {}", report.tor_version);
        println!("  SOCKS proxy: {}", report.socks_proxy);
        println!("  Circuits:    {} ({} built)", report.circuits, report.built_circuits);
        println!("  Streams:     {}", report.streams);
        Ok(())
    })
    .await
}

/// List circuits.
pub async fn circuits(config: TorConfig, json: bool) -> Result<()> {
    with_client(config, |client| async move {
        let circuits = client.get_circuit_info().await;
        if json {
            return print_json(&circuits);
        }
        if circuits.is_empty() {
            println!("No circuits.");
        }
        for circuit in circuits {
            println!(
                "{:>6}  {:<9} {:<16} {}",
                circuit.circuit_id,
                circuit.state,
                circuit.purpose,
                circuit.path.join(" -> ")
            );
        }
        Ok(())
    })
    .await
}

/// List streams.
pub async fn streams(config: TorConfig, json: bool) -> Result<()> {
    with_client(config, |client| async move {
        let streams = client.get_stream_info().await;
        if json {
            return print_json(&streams);
        }
        if streams.is_empty() {
            println!("No streams.");
        }
        for stream in streams {
            println!(
                "{:>6}  {:<11} circuit {:<6} {}:{}",
                stream.stream_id, stream.state, stream.circuit_id, stream.target_host, stream.target_port
            );
        }
        Ok(())
    })
    .await
}

/// Fetch a URL through Tor and print the body.
pub async fn fetch(config: TorConfig, method: &str, url: &str) -> Result<()> {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    with_client(config, |client| async move {
        let response = client.make_request(method, url).await?;
        eprintln!("HTTP {}", response.status());
        let body = response.text().await.context("Failed to read response body")?;
        println!("{}", body);
        Ok(())
    })
    .await
}

/// Open and close a tunnel to check reachability.
pub async fn tunnel(config: TorConfig, host: &str, port: u16) -> Result<()> {
    with_client(config, |client| async move {
        let availability = client.ensure_circuit_available().await;
        tracing::debug!(?availability, "Circuit check");

        client
            .with_connection(host, port, |stream| {
                Box::pin(async move {
                    let local = stream.local_addr()?;
                    tracing::debug!(%local, "Tunnel socket");
                    Ok(())
                })
            })
            .await
            .with_context(|| format!("Failed to open tunnel to {}:{}", host, port))?;

        println!("Tunnel to {}:{} established through Tor.", host, port);
        Ok(())
    })
    .await
}

/// Send `SIGNAL NEWNYM`.
pub async fn new_identity(config: TorConfig) -> Result<()> {
    with_client(config, |client| async move {
        client.new_identity().await?;
        println!("New identity requested. New connections will use fresh circuits.");
        Ok(())
    })
    .await
}

/// Print health checks until Ctrl+C.
pub async fn monitor(config: TorConfig) -> Result<()> {
    with_client(config, |client| async move {
        let interval = client.config().health_check_interval;
        println!("Connected. Health checks every {:?}. Press Ctrl+C to stop.", interval);

        let mut health = client.subscribe_health();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!("\nShutting down...");
                    break;
                }
                changed = health.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = health.borrow_and_update().clone();
                    let circuits = client.circuits().await;
                    match status.last_error {
                        None => println!(
                            "[OK] healthy, {} circuits known",
                            circuits.entries.len()
                        ),
                        Some(error) => eprintln!(
                            "[WARN] unhealthy ({} consecutive failures): {}",
                            status.consecutive_failures, error
                        ),
                    }
                }
            }
        }
        Ok(())
    })
    .await
}
