use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{info, warn};

use crate::{
    config::RelayConfig,
    envelope::Envelope,
    session::{Session, SessionContext},
};

pub struct Server {
    listener: TcpListener,
    ctx: SessionContext,
}

impl Server {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            ctx: SessionContext::new(config),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Services shared with every session; lets callers inspect the hub.
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, ctx } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&ctx).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &ctx);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(ctx: &SessionContext) {
    info!("relay shutting down");
    ctx.hub
        .publish(&Envelope::announcement("Server shutting down"))
        .await;
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, ctx: &SessionContext) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, ctx),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, ctx: &SessionContext) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(err) = stream.set_nodelay(true) {
            warn!(%peer, error = ?err, "could not disable nagle");
        }
        let (reader, writer) = stream.into_split();
        match Session::accept(reader, writer, ctx).await {
            Ok(session) => {
                info!(%peer, session = session.id(), user = %session.username(), "session started");
                session.run().await;
            }
            Err(err) => warn!(%peer, error = %err, "handshake failed"),
        }
    });
}
