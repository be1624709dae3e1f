use anyhow::Context;
use clap::Parser;
use proxy::server::auth::credentials::Credentials;
use proxy::server::proxy_cli_args::ProxyServerArgs;
use proxy::server::session::Session;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ProxySrv received ctrl-c"),
        _ = terminate => info!("ProxySrv received terminate signal"),
    }
}

fn main() -> anyhow::Result<()> {
    let proxy_config = ProxyServerArgs::parse();
    let log_level_string = proxy_config.log_level.clone().unwrap_or("INFO".to_string());
    let level = Level::from_str(log_level_string.as_str())?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("INFO"))
        .add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_line_number(true)
        .init();

    let credentials = Arc::new(
        Credentials::load(
            &proxy_config.service_account_file,
            &proxy_config.user_file,
        )
        .context("loading credential files")?,
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("TAG_PROXY")
        .worker_threads(proxy_config.works)
        .build()?;

    info!("ProxySrv running config args={proxy_config:?}");
    runtime.block_on(async {
        let listen_addr = proxy_config.listen_addr();
        let tcp_listener = TcpListener::bind(&listen_addr)
            .await
            .with_context(|| format!("binding {listen_addr}"))?;
        let upstream_addr = proxy_config.upstream_addr();
        // the listener task is the only writer of the session-id counter
        let mut next_session_id: u64 = 0;
        loop {
            tokio::select! {
                _ = shutdown_signal() => break,
                accepted = tcp_listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        next_session_id += 1;
                        let session_id = next_session_id;
                        info!("session [{session_id}] accepted {addr}");
                        let session = Session::new(
                            session_id,
                            upstream_addr.clone(),
                            Arc::clone(&credentials),
                        );
                        tokio::spawn(async move {
                            if let Err(e) = session.run(stream).await {
                                warn!("session [{session_id}] failed: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("ProxySrv accept connection err. cause by {e:?}"),
                },
            }
        }
        Ok(())
    })
}
