//! One connected client.
//!
//! A [`Session`] owns the read half of the connection and drives the
//! protocol: the handshake, the idle read loop, the file relay mode entered
//! by `/send`, and teardown. The write half lives in a [`SessionHandle`],
//! which is what the hub sees; all writes to the socket and to the inbound
//! file go through the handle's mutex, so deliveries from concurrent
//! publishers never interleave.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::future::BoxFuture;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tracing::{debug, info, warn};

use crate::{
    command::{Command, HELP, SIGIL},
    config::RelayConfig,
    directory::{self, Directories},
    envelope::{Envelope, Origin, Payload, SERVER_NAME, SessionId, Target},
    error::{DeliveryError, FrameError, HandshakeError},
    frame::{read_chunk, read_frame, read_transfer_len, write_frame},
    hub::{Delivery, Hub, Subscriber},
    relay::{InboundFile, Transfer},
};

/// Shared services every session is handed on creation.
#[derive(Clone)]
pub struct SessionContext {
    pub hub: Arc<Hub>,
    pub directories: Arc<Directories>,
    pub config: Arc<RelayConfig>,
}

impl SessionContext {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            hub: Arc::new(Hub::new()),
            directories: Arc::new(Directories::new(config.files_root.clone())),
            config: Arc::new(config),
        }
    }
}

/// Closing lines of the `/list_users` and `/list_files` replies.
const USERS_FOOTER: &str = "_________";
const FILES_FOOTER: &str = "____________";

enum Mode {
    Idle,
    Transfer(Transfer),
}

pub struct Session<R, W> {
    reader: R,
    handle: Arc<SessionHandle<W>>,
    ctx: SessionContext,
    mode: Mode,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Reads the username, registers with the hub and announces the join.
    pub async fn accept(
        mut reader: R,
        mut writer: W,
        ctx: SessionContext,
    ) -> Result<Self, HandshakeError> {
        let username = read_frame(&mut reader).await?.ok_or(HandshakeError::Closed)?;

        let incoming_dir = match ctx.directories.default_for(&username) {
            Ok(dir) => dir,
            Err(_) => {
                let refusal = format!("{SERVER_NAME}: Invalid username '{username}'");
                if let Err(error) = write_frame(&mut writer, &refusal).await {
                    debug!(%error, "could not send handshake refusal");
                }
                return Err(HandshakeError::InvalidUsername(username));
            }
        };

        if let Err(error) = ctx.directories.claim(&incoming_dir).await {
            warn!(user = %username, %error, "could not create incoming directory");
        }

        let origin = Origin::new(ctx.hub.next_id(), username);
        let handle = Arc::new(SessionHandle::new(origin, writer, incoming_dir));
        ctx.hub.subscribe(handle.clone()).await;

        info!(session = handle.origin.id, user = %handle.origin.username, "user joined");
        ctx.hub
            .publish(&Envelope::announcement(format!(
                "New user {} joined the chat room",
                handle.origin.username
            )))
            .await;

        Ok(Self {
            reader,
            handle,
            ctx,
            mode: Mode::Idle,
        })
    }

    pub fn id(&self) -> SessionId {
        self.handle.origin.id
    }

    pub fn username(&self) -> &str {
        &self.handle.origin.username
    }

    pub fn is_transferring(&self) -> bool {
        matches!(self.mode, Mode::Transfer(_))
    }

    /// Serves the connection until a read fails, then tears down.
    pub async fn run(mut self) {
        loop {
            match self.step().await {
                Ok(true) => {}
                Ok(false) => {
                    info!(session = self.id(), user = %self.username(), "client disconnected");
                    break;
                }
                Err(error) => {
                    warn!(session = self.id(), user = %self.username(), %error, "session ended");
                    break;
                }
            }
        }
        self.teardown().await;
    }

    /// Handles one unit of input. Returns `false` once the peer has closed.
    pub async fn step(&mut self) -> Result<bool, FrameError> {
        if self.is_transferring() {
            self.advance_transfer().await?;
            return Ok(true);
        }

        let Some(line) = read_frame(&mut self.reader).await? else {
            return Ok(false);
        };
        self.handle_line(line).await;
        Ok(true)
    }

    async fn handle_line(&mut self, line: String) {
        if line.is_empty() {
            return;
        }

        if line.starts_with(SIGIL) {
            debug!(session = self.id(), %line, "command");
            match Command::parse(&line) {
                Ok(command) => self.execute(command).await,
                Err(error) => self.reply_server(&error.to_string()).await,
            }
            return;
        }

        let text = format!("{}: {line}", self.username());
        self.publish(Target::All, Payload::Chat(text)).await;
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::Whisper { username, message } => {
                let text = format!("{} (Whispering): {message}", self.username());
                let delivery = self
                    .publish(Target::User(username.clone()), Payload::Private(text))
                    .await;
                if delivery.recipients == 0 {
                    self.reply_server(&format!("No user named {username} is connected"))
                        .await;
                }
            }
            Command::ListUsers => {
                let mut lines = self.ctx.hub.usernames().await;
                lines.push(USERS_FOOTER.to_string());
                self.handle.send_line(&lines.join("\n")).await;
            }
            Command::ListFiles => self.list_files().await,
            Command::Send { target, file_name } => self.begin_transfer(target, file_name).await,
            Command::ChangeIncomingFolder { folder } => self.change_incoming_folder(&folder).await,
            Command::Help => self.handle.send_line(HELP).await,
        }
    }

    async fn list_files(&self) {
        let dir = self.handle.incoming_dir().await;
        match directory::list_files(&dir).await {
            Ok(names) => {
                let mut lines = vec![format!("Incoming Folder: {}", dir.display())];
                lines.extend(names);
                lines.push(FILES_FOOTER.to_string());
                self.handle.send_line(&lines.join("\n")).await;
            }
            Err(error) => {
                warn!(session = self.id(), %error, "could not list incoming directory");
                self.reply_server(&format!("Could not list files in {}", dir.display()))
                    .await;
            }
        }
    }

    async fn change_incoming_folder(&self, folder: &str) {
        let dir = match self.ctx.directories.resolve(folder) {
            Ok(dir) => dir,
            Err(error) => {
                self.reply_server(&error.to_string()).await;
                return;
            }
        };

        if let Err(error) = self.ctx.directories.claim(&dir).await {
            warn!(session = self.id(), %error, "could not create incoming directory");
            self.ctx.directories.release(&dir).await;
            self.reply_server(&format!("Could not use {}", dir.display())).await;
            return;
        }

        let previous = self.handle.set_incoming_dir(dir.clone()).await;
        self.ctx.directories.release(&previous).await;
        info!(session = self.id(), dir = %dir.display(), "incoming folder changed");
        self.reply_server(&format!("Incoming folder changed to {}", dir.display()))
            .await;
    }

    async fn begin_transfer(&mut self, target: Target, file_name: String) {
        let mut transfer = Transfer::new(target, file_name);
        let delivery = self
            .publish(transfer.target().clone(), transfer.open_payload())
            .await;
        transfer.record(delivery);

        info!(
            session = self.id(),
            file = %transfer.file_name(),
            target = ?transfer.target(),
            "transfer started"
        );
        self.mode = Mode::Transfer(transfer);
    }

    async fn advance_transfer(&mut self) -> Result<(), FrameError> {
        let Mode::Transfer(transfer) = &mut self.mode else {
            return Ok(());
        };
        let deadline = self.ctx.config.transfer_timeout;

        match transfer.remaining() {
            None => {
                let total = read_transfer_len(&mut self.reader, deadline).await?;
                debug!(session = self.handle.origin.id, total, "transfer length");
                transfer.set_total(total);
            }
            Some(remaining) => {
                let chunk = read_chunk(
                    &mut self.reader,
                    remaining,
                    self.ctx.config.max_chunk_len,
                    deadline,
                )
                .await?;
                let len = chunk.len();
                let envelope = Envelope::new(
                    self.handle.origin.clone(),
                    transfer.target().clone(),
                    Payload::FileChunk(chunk),
                );
                transfer.record(self.ctx.hub.publish(&envelope).await);
                transfer.consume(len);
                debug!(session = self.handle.origin.id, bytes = len, "chunk relayed");
            }
        }

        if transfer.remaining() == Some(0) {
            self.end_transfer(true).await;
        }
        Ok(())
    }

    /// Publishes the closing envelope and leaves transfer mode.
    async fn end_transfer(&mut self, complete: bool) {
        let Mode::Transfer(mut transfer) = std::mem::replace(&mut self.mode, Mode::Idle) else {
            return;
        };

        let delivery = self
            .publish(transfer.target().clone(), transfer.close_payload(complete))
            .await;
        transfer.record(delivery);

        if !complete {
            info!(session = self.id(), file = %transfer.file_name(), "transfer aborted");
            return;
        }

        info!(session = self.id(), file = %transfer.file_name(), "transfer complete");
        for line in transfer.report() {
            self.reply_server(&line).await;
        }
    }

    /// Unregisters, cleans up and announces the departure.
    ///
    /// Only the first call does anything.
    pub async fn teardown(&mut self) {
        if self.handle.disconnected.swap(true, Ordering::SeqCst) {
            debug!(session = self.id(), "teardown already done");
            return;
        }

        self.ctx.hub.unsubscribe(self.id()).await;
        if self.is_transferring() {
            self.end_transfer(false).await;
        }

        self.handle.close_inbound().await;
        let dir = self.handle.incoming_dir().await;
        match self.ctx.directories.release_and_remove(&dir).await {
            Ok(removed) => debug!(session = self.id(), removed, "incoming directory released"),
            Err(error) => warn!(session = self.id(), %error, "could not remove incoming directory"),
        }

        info!(session = self.id(), user = %self.username(), "user left");
        self.ctx
            .hub
            .publish(&Envelope::announcement(format!(
                "{} left the chat room !!!",
                self.username()
            )))
            .await;
        self.handle.shutdown().await;
    }

    async fn publish(&self, target: Target, payload: Payload) -> Delivery {
        let envelope = Envelope::new(self.handle.origin.clone(), target, payload);
        self.ctx.hub.publish(&envelope).await
    }

    async fn reply_server(&self, text: &str) {
        self.handle.send_line(&format!("{SERVER_NAME}: {text}")).await;
    }
}

/// The hub-facing half of a session.
pub struct SessionHandle<W> {
    origin: Origin,
    outbound: Mutex<Outbound<W>>,
    disconnected: AtomicBool,
}

struct Outbound<W> {
    writer: W,
    incoming_dir: PathBuf,
    inbound: Option<InboundFile>,
    closed: bool,
}

impl<W> SessionHandle<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn new(origin: Origin, writer: W, incoming_dir: PathBuf) -> Self {
        Self {
            origin,
            outbound: Mutex::new(Outbound {
                writer,
                incoming_dir,
                inbound: None,
                closed: false,
            }),
            disconnected: AtomicBool::new(false),
        }
    }

    async fn send_line(&self, text: &str) {
        let mut outbound = self.outbound.lock().await;
        if outbound.closed {
            return;
        }
        if let Err(error) = write_frame(&mut outbound.writer, text).await {
            warn!(session = self.origin.id, %error, "could not write to client");
        }
    }

    async fn incoming_dir(&self) -> PathBuf {
        self.outbound.lock().await.incoming_dir.clone()
    }

    async fn set_incoming_dir(&self, dir: PathBuf) -> PathBuf {
        let mut outbound = self.outbound.lock().await;
        std::mem::replace(&mut outbound.incoming_dir, dir)
    }

    /// Stops accepting deliveries and drops any half-written file.
    async fn close_inbound(&self) {
        let mut outbound = self.outbound.lock().await;
        outbound.closed = true;
        if let Some(file) = outbound.inbound.take() {
            file.discard().await;
        }
    }

    async fn shutdown(&self) {
        let mut outbound = self.outbound.lock().await;
        if let Err(error) = outbound.writer.shutdown().await {
            debug!(session = self.origin.id, %error, "writer shutdown failed");
        }
    }
}

impl<W> Outbound<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn deliver(&mut self, envelope: &Envelope) -> Result<(), DeliveryError> {
        if self.closed {
            return Ok(());
        }

        let sender = &envelope.origin;
        match &envelope.payload {
            Payload::Chat(text) | Payload::Private(text) => {
                write_frame(&mut self.writer, text).await?;
                Ok(())
            }
            Payload::FileOpen { file_name } => {
                if let Some(open) = &self.inbound {
                    let busy = open.name().to_string();
                    self.notify(&format!(
                        "{SERVER_NAME}: Ignoring {file_name} from {}: already receiving {busy}",
                        sender.username
                    ))
                    .await;
                    return Err(DeliveryError::Busy(busy));
                }

                match InboundFile::create(&self.incoming_dir, sender.clone(), file_name).await {
                    Ok(file) => {
                        self.notify(&format!("Receiving {}", file.name())).await;
                        self.inbound = Some(file);
                        Ok(())
                    }
                    Err(error) => {
                        self.notify(&format!(
                            "{SERVER_NAME}: Could not receive {file_name} from {}: {error}",
                            sender.username
                        ))
                        .await;
                        Err(error)
                    }
                }
            }
            Payload::FileChunk(bytes) => {
                let Some(file) = self.inbound.as_mut().filter(|file| file.belongs_to(sender.id))
                else {
                    return Ok(());
                };
                if let Err(error) = file.write_chunk(bytes).await {
                    if let Some(file) = self.inbound.take() {
                        let name = file.name().to_string();
                        file.discard().await;
                        self.notify(&format!(
                            "{SERVER_NAME}: Could not store {name} from {}: {error}",
                            sender.username
                        ))
                        .await;
                    }
                    return Err(error);
                }
                Ok(())
            }
            Payload::FileClose { complete, .. } => {
                if !self
                    .inbound
                    .as_ref()
                    .is_some_and(|file| file.belongs_to(sender.id))
                {
                    return Ok(());
                }
                let Some(file) = self.inbound.take() else {
                    return Ok(());
                };

                if !complete {
                    let name = file.name().to_string();
                    file.discard().await;
                    self.notify(&format!(
                        "{SERVER_NAME}: Transfer of {name} from {} was interrupted",
                        sender.username
                    ))
                    .await;
                    return Ok(());
                }

                match file.finish().await {
                    Ok(name) => {
                        self.notify(&format!(
                            "{SERVER_NAME}: {} sent you a file: {name}",
                            sender.username
                        ))
                        .await;
                        Ok(())
                    }
                    Err(error) => {
                        self.notify(&format!("{SERVER_NAME}: Could not save file: {error}"))
                            .await;
                        Err(error)
                    }
                }
            }
        }
    }

    async fn notify(&mut self, text: &str) {
        if let Err(error) = write_frame(&mut self.writer, text).await {
            debug!(%error, "could not notify client");
        }
    }
}

impl<W> Subscriber for SessionHandle<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn id(&self) -> SessionId {
        self.origin.id
    }

    fn username(&self) -> &str {
        &self.origin.username
    }

    fn deliver<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            let mut outbound = self.outbound.lock().await;
            outbound.deliver(envelope).await
        })
    }
}
