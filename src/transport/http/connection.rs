//! Per-connection state machine.
//!
//! One loop per socket: read a request, route it, write one response, then
//! either loop for keep-alive or close. Application errors become JSON
//! error responses; transport errors (timeout, end-of-stream, oversized
//! payload) close the connection without a response.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::ServeError;
use crate::task::{Task, TaskKind};

use super::super::ServeContext;
use super::protocol::{read_request, Method, ReadError, ReadLimits, Request, Response};

/// Routing outcome for method + path.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Route {
    Health,
    Task(TaskKind),
    KeyedTask(TaskKind, String, String),
    NotFound,
}

pub(crate) fn route(method: Method, target: &str) -> Route {
    let path = target.split('?').next().unwrap_or(target);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (method, segments.as_slice()) {
        (Method::Get, ["health"]) => Route::Health,
        (Method::Post, ["api", "sessions"]) => Route::Task(TaskKind::CreateSession),
        (Method::Get, ["api", "sessions"]) => Route::Task(TaskKind::ListSession),
        (Method::Get, ["api", "sessions", model, version]) => {
            Route::KeyedTask(TaskKind::GetSession, model.to_string(), version.to_string())
        }
        (Method::Post, ["api", "sessions", model, version]) => Route::KeyedTask(
            TaskKind::ExecuteSession,
            model.to_string(),
            version.to_string(),
        ),
        (Method::Delete, ["api", "sessions", model, version]) => Route::KeyedTask(
            TaskKind::DestroySession,
            model.to_string(),
            version.to_string(),
        ),
        _ => Route::NotFound,
    }
}

/// Drive one connection until it closes. The caller's guard deregisters the
/// connection from the listener's live set when this returns.
pub(crate) async fn serve_connection<S>(
    mut stream: S,
    ctx: Arc<ServeContext>,
    peer: String,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let limits = ReadLimits {
        payload_limit: ctx.payload_limit,
        idle_timeout: ctx.idle_timeout,
    };

    loop {
        let read = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            read = read_request(&mut stream, &limits) => read,
        };

        let request = match read {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(ReadError::IdleTimeout) => {
                tracing::debug!(%peer, "closing idle connection");
                break;
            }
            Err(ReadError::PayloadTooLarge { size, max }) => {
                tracing::warn!(%peer, size, max, "payload over limit, closing connection");
                break;
            }
            Err(err) => {
                tracing::warn!(%peer, error = %err, "read failed, closing connection");
                break;
            }
        };

        let started = Instant::now();
        let keep_alive = request.keep_alive();

        let mut response = match dispatch(&ctx, &request).await {
            Ok(response) => response,
            Err(err) => Response::json(err.status(), &err.to_body()),
        };
        response.set_keep_alive(keep_alive);

        tracing::info!(
            target: "tensorgate::access",
            %peer,
            method = request.method.as_str(),
            path = %request.target,
            status = response.status(),
            duration_us = started.elapsed().as_micros() as u64,
            "request"
        );

        if let Err(err) = response.write_to(&mut stream).await {
            tracing::warn!(%peer, error = %err, "write failed, closing connection");
            break;
        }

        if !keep_alive {
            break;
        }
    }
}

/// Route and execute one request. Management tasks run inline on the I/O
/// task; execution is handed to the worker pool, with the response write
/// resumed once the pool completes it.
async fn dispatch(ctx: &ServeContext, request: &Request) -> Result<Response, ServeError> {
    match route(request.method, &request.target) {
        Route::Health => Ok(Response::text(200, "OK")),
        Route::NotFound => Ok(Response::text(404, "Not Found")),
        Route::Task(kind) => {
            let task = Task::build(Arc::clone(&ctx.registry), kind, &request.body)?;
            let value = run_task(ctx, task).await?;
            Ok(Response::json(200, &value))
        }
        Route::KeyedTask(kind, model, version) => {
            let task = Task::build_keyed(
                Arc::clone(&ctx.registry),
                kind,
                &model,
                &version,
                &request.body,
            )?;
            let value = run_task(ctx, task).await?;
            Ok(Response::json(200, &value))
        }
    }
}

async fn run_task(ctx: &ServeContext, task: Task) -> Result<Value, ServeError> {
    if task.kind() != TaskKind::ExecuteSession {
        return task.run();
    }

    let (tx, rx) = oneshot::channel();
    ctx.pool
        .enqueue(Box::new(move || {
            let _ = tx.send(task.run());
        }))
        .map_err(|err| ServeError::Internal(err.to_string()))?;

    // A flushed queue drops the sender before the job ever starts.
    rx.await
        .map_err(|_| ServeError::Internal("execution was discarded before completion".into()))?
}
