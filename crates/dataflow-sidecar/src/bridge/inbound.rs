// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delivery of source messages to the user container.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dataflow_api::Interface;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::SidecarContext;
use crate::error::{Error, Result};

/// Failure to hand one message to the user container.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeliveryError {
    /// The step declares no `in` interface.
    #[error("no in interface configured")]
    NoInterface,

    /// The input FIFO has already been closed.
    #[error("input FIFO closed")]
    Closed,

    /// Writing to the input FIFO failed.
    #[error("failed to write message to main via FIFO: {0}")]
    Fifo(#[source] std::io::Error),

    /// The HTTP request could not be sent.
    #[error("failed to send message to main via HTTP: {0}")]
    Http(#[from] reqwest::Error),

    /// The user container answered with a non-success status.
    #[error("failed to send message to main via HTTP: {status}")]
    Status {
        /// Status code returned.
        status: reqwest::StatusCode,
    },
}

/// Channel into the user container.
pub enum ToMain {
    /// No `in` interface; every delivery fails.
    Unconfigured,
    /// Newline-terminated writes to the input FIFO.
    Fifo {
        /// Open write end, `None` once closed.
        file: Arc<Mutex<Option<File>>>,
    },
    /// One `POST /messages` per message.
    Http {
        /// Shared client.
        client: reqwest::Client,
        /// Messages endpoint.
        url: String,
    },
}

impl ToMain {
    /// Open the channel declared by the step's `in` interface.
    ///
    /// For a FIFO this blocks until the user container opens the read end.
    /// For HTTP it waits until the container reports ready. Both waits end
    /// early with [`Error::Cancelled`] when `ctx` is cancelled.
    pub async fn connect(
        ctx: &SidecarContext,
        fifo_in: &Path,
        main_url: &str,
        ready_poll_interval: Duration,
    ) -> Result<Self> {
        match ctx.spec.input {
            None => {
                info!("no in interface configured");
                Ok(ToMain::Unconfigured)
            }
            Some(Interface::Fifo) => {
                info!(path = %fifo_in.display(), "opening input FIFO");
                let mut options = OpenOptions::new();
                let open = options.write(true).open(fifo_in);
                let file = tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                    file = open => file.map_err(|e| {
                        let path = fifo_in.display();
                        Error::Other(format!("failed to open input FIFO {}: {}", path, e))
                    })?,
                };
                info!(path = %fifo_in.display(), "opened input FIFO");

                let file = Arc::new(Mutex::new(Some(file)));
                let closing = file.clone();
                ctx.lifecycle.push("input FIFO", async move {
                    if let Some(mut file) = closing.lock().await.take() {
                        file.flush().await?;
                    }
                    Ok(())
                });
                Ok(ToMain::Fifo { file })
            }
            Some(Interface::Http) => {
                info!(url = %main_url, "HTTP in interface configured");
                let client = reqwest::Client::new();
                wait_until_ready(&client, main_url, ready_poll_interval, &ctx.cancel).await?;
                Ok(ToMain::Http {
                    client,
                    url: format!("{}/messages", main_url),
                })
            }
        }
    }

    /// Deliver one message.
    pub async fn send(&self, data: &[u8]) -> std::result::Result<(), DeliveryError> {
        match self {
            ToMain::Unconfigured => Err(DeliveryError::NoInterface),
            ToMain::Fifo { file } => {
                let mut guard = file.lock().await;
                let file = guard.as_mut().ok_or(DeliveryError::Closed)?;
                let mut record = Vec::with_capacity(data.len() + 1);
                record.extend_from_slice(data);
                record.push(b'\n');
                file.write_all(&record).await.map_err(DeliveryError::Fifo)?;
                file.flush().await.map_err(DeliveryError::Fifo)?;
                Ok(())
            }
            ToMain::Http { client, url } => {
                let response = client
                    .post(url)
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(data.to_vec())
                    .send()
                    .await?;
                let status = response.status();
                if status.as_u16() >= 300 {
                    return Err(DeliveryError::Status { status });
                }
                Ok(())
            }
        }
    }
}

/// Poll `GET <main_url>/ready` every `interval` until it answers 200.
pub async fn wait_until_ready(
    client: &reqwest::Client,
    main_url: &str,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let url = format!("{}/ready", main_url);
    info!(url = %url, "waiting for HTTP in interface to be ready");
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match client.get(&url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                info!(url = %url, "HTTP in interface ready");
                return Ok(());
            }
            Ok(response) => debug!(status = %response.status(), "main not ready yet"),
            Err(e) => debug!(error = %e, "main not reachable yet"),
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
