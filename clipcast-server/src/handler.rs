//! Per-request handling: read one framed request, apply it to the catalog
//! and clip storage, write one framed response.
//!
//! A handler serves exactly one connection; the connection task calls
//! [`RequestHandler::handle_one`] in a loop and inspects the returned
//! [`RunOutcome`] to decide between keep-alive and close. All shared state
//! (catalog, clip service, deadlines) lives in the immutable
//! [`HandlerContext`] so handlers are cheap to mint per connection.

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use clipcast_core::error::Error as CoreError;
use clipcast_core::models::{ClipBatch, Media, MediaId};
use clipcast_core::{ClipService, MediaCatalog};
use clipcast_proto::body::{
    AudioTrackInfo, Body, FetchedClipsBody, MediaInfoBody, MediaListBody, VideoTrackInfo,
};
use clipcast_proto::frame::{FrameError, Framer, FramerConfig};
use clipcast_proto::message::{key, Status, Verb};
use clipcast_proto::parser::{ParseError, RequestParser};
use clipcast_proto::validate::{IntValidator, MediaIdValidator, TitleFilterValidator, ValidateError};

/// Dependencies shared by every handler.
pub struct HandlerContext {
    pub catalog: Arc<dyn MediaCatalog>,
    pub clips: ClipService,
    pub framer_config: FramerConfig,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("response write failed: {0}")]
    Write(FrameError),
}

/// How one request run ended; drives the keep-alive decision.
#[derive(Debug)]
pub enum RunOutcome {
    /// A response was written (any status). The connection stays open.
    Success,
    /// The read deadline elapsed with no request in flight: the client is
    /// paused but still connected.
    IdleTimeout,
    /// The connection is done for: EOF, deadline mid-message, malformed
    /// framing, or a failed write.
    Fault(SessionError),
}

/// Request-level failures that still produce a status-coded response.
/// Reached only after a complete request was framed.
enum HandleError {
    BadRequest(String),
    Server(CoreError),
}

impl From<ParseError> for HandleError {
    fn from(err: ParseError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<ValidateError> for HandleError {
    fn from(err: ValidateError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<CoreError> for HandleError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(msg) | CoreError::InvalidInput(msg) => Self::BadRequest(msg),
            other => Self::Server(other),
        }
    }
}

pub struct RequestHandler {
    ctx: Arc<HandlerContext>,
    framer: Framer,
    parser: RequestParser,
}

impl RequestHandler {
    #[must_use]
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        let framer = Framer::new(ctx.framer_config);
        Self {
            ctx,
            framer,
            parser: RequestParser::new(),
        }
    }

    /// Serve exactly one request on the stream.
    pub async fn handle_one<S>(&mut self, stream: &mut S) -> RunOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        // Phase A: framing. Nothing is written back for a request that
        // never fully arrived.
        let message = match self.framer.extract(stream).await {
            Ok(message) => message,
            Err(FrameError::DeadlineElapsed { idle: true }) => return RunOutcome::IdleTimeout,
            Err(err) => return RunOutcome::Fault(err.into()),
        };

        // Phase B: dispatch. Every failure from here on maps to a status.
        let (status, body) = self.dispatch(&message).await;

        match self
            .framer
            .write_response(stream, status, body.as_ref())
            .await
        {
            Ok(()) => RunOutcome::Success,
            Err(err) => {
                // The peer is presumed gone; the response is discarded.
                tracing::debug!(error = %err, "failed to write response");
                RunOutcome::Fault(SessionError::Write(err))
            }
        }
    }

    async fn dispatch(&mut self, message: &[u8]) -> (Status, Option<Body>) {
        if let Err(err) = self.parser.feed(message) {
            tracing::debug!(error = %err, "rejecting unparseable request");
            return (Status::BadRequest, None);
        }
        let verb = match self.parser.verb() {
            Ok(verb) => verb,
            Err(err) => {
                tracing::debug!(error = %err, "rejecting request with unknown verb");
                return (Status::BadRequest, None);
            }
        };

        let result = match verb {
            Verb::List => self.handle_list().await,
            Verb::Info => self.handle_info().await,
            Verb::Fetch => self.handle_fetch().await,
        };

        match result {
            Ok(body) => (Status::Ok, Some(body)),
            Err(HandleError::BadRequest(reason)) => {
                tracing::debug!(%verb, reason, "request rejected");
                (Status::BadRequest, None)
            }
            Err(HandleError::Server(err)) => {
                tracing::warn!(%verb, error = %err, "request failed on the server side");
                (Status::ServerError, None)
            }
        }
    }

    async fn handle_list(&self) -> Result<Body, HandleError> {
        let filter = TitleFilterValidator
            .validate(key::TITLE_CONTAINS, self.parser.field(key::TITLE_CONTAINS)?)?;

        let proxies = self.ctx.catalog.list_brief().await?;
        let mut list = MediaListBody::default();
        for proxy in &proxies {
            if filter.is_match(proxy.title()) {
                list.ids.push(proxy.id().to_hex());
                list.titles.push(proxy.title().to_string());
            }
        }
        Ok(Body::MediaList(list))
    }

    async fn handle_info(&self) -> Result<Body, HandleError> {
        let media = self.lookup_requested_media().await?;
        Ok(Body::MediaInfo(media_info_body(&media)))
    }

    async fn handle_fetch(&self) -> Result<Body, HandleError> {
        let offset = IntValidator::non_negative()
            .validate(key::STARTING_PIECE, self.parser.field(key::STARTING_PIECE)?)?;
        let amount = IntValidator::positive()
            .validate(key::TOTAL_PIECES, self.parser.field(key::TOTAL_PIECES)?)?;

        let media = self.lookup_requested_media().await?;
        let batch = self.ctx.clips.fetch_clips(&media, offset, amount).await?;
        Ok(Body::FetchedClips(fetched_clips_body(batch)))
    }

    async fn lookup_requested_media(&self) -> Result<Media, HandleError> {
        let raw_id = self.parser.field(key::MEDIA_ID)?;
        MediaIdValidator.validate(key::MEDIA_ID, raw_id)?;
        let id = MediaId::from_hex(raw_id)?;

        self.ctx
            .catalog
            .lookup(&id)
            .await?
            .ok_or_else(|| HandleError::BadRequest(format!("no media with id {id}")))
    }
}

fn media_info_body(media: &Media) -> MediaInfoBody {
    MediaInfoBody {
        id: media.id.to_hex(),
        title: media.title.clone(),
        duration_secs: media.duration_secs,
        video: media.video.as_ref().map(|v| VideoTrackInfo {
            width: v.width,
            height: v.height,
            codec: v.codec.clone(),
            container: v.container.clone(),
        }),
        audio: media.audio.as_ref().map(|a| AudioTrackInfo {
            codec: a.codec.clone(),
            container: a.container.clone(),
        }),
    }
}

fn fetched_clips_body(batch: ClipBatch) -> FetchedClipsBody {
    FetchedClipsBody {
        id: batch.media_id.to_hex(),
        offset: batch.offset,
        video: batch.video,
        audio: batch.audio,
    }
}
