//! Server-Sent Events stream for one generation request.
//!
//! The pipeline is blocking (it waits on agent processes), so it runs on the
//! blocking pool and hands each update event to the async stream over a
//! bounded channel. The stream ends after the terminal `complete` event.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use widgetgen::core::events::UpdateEvent;
use widgetgen::core::types::DataSource;

use crate::state::SharedOrchestrator;

/// Buffered updates before the pipeline thread waits on a slow client.
const CHANNEL_CAPACITY: usize = 64;

pub struct StreamRequest {
    pub message: String,
    pub model: Option<String>,
    pub data_mode: Option<DataSource>,
}

pub fn update_stream(
    orchestrator: SharedOrchestrator,
    request: StreamRequest,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, mut rx) = mpsc::channel::<UpdateEvent>(CHANNEL_CAPACITY);

    tokio::task::spawn_blocking(move || {
        let mut client_gone = false;
        let outcome = orchestrator.run(
            &request.message,
            request.model.as_deref(),
            request.data_mode,
            &mut |event: UpdateEvent| {
                if client_gone {
                    return;
                }
                if tx.blocking_send(event).is_err() {
                    debug!("SSE client disconnected, dropping remaining updates");
                    client_gone = true;
                }
            },
        );
        debug!(?outcome, "generation finished");
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => yield Ok(Event::default().data(json)),
                Err(e) => warn!(error = %e, "failed to serialize update event"),
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
