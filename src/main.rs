/// Entry point for the container metadata registry.
///
/// Connects to the Docker daemon, keeps an in-memory registry of running and
/// recently exited containers, and serves it read-only over HTTP.
///
/// # Errors
///
/// Returns an error if initialization fails (e.g., invalid configuration,
/// unreadable TLS files, or an unreachable Docker daemon).
///
/// # Examples
///
/// ```bash
/// RUST_LOG=debug DOCKER_HOST=unix:///var/run/docker.sock cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    docker_metadata::run().await
}
