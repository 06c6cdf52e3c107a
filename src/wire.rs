use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::identity::Caller;
use crate::limits::{MAX_LINE_LEN, MAX_WATCHES_PER_CONNECTION};
use crate::model::*;
use crate::observability::{op_label, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};

/// One request line. `{"op":"create", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Create {
        caller: Caller,
        resource_type: ResourceType,
        resource_id: String,
        window: Window,
    },
    Cancel {
        caller: Caller,
        id: Ulid,
        #[serde(default)]
        reason: Option<String>,
    },
    Confirm {
        caller: Caller,
        id: Ulid,
    },
    Complete {
        caller: Caller,
        id: Ulid,
    },
    Get {
        id: Ulid,
    },
    List {
        #[serde(default)]
        filter: BookingFilter,
    },
    /// Free spans for guides and homestays (`start`/`end` required),
    /// remaining stock for products.
    Availability {
        resource_type: ResourceType,
        resource_id: String,
        #[serde(default)]
        start: Option<Ms>,
        #[serde(default)]
        end: Option<Ms>,
    },
    /// Stream this resource's booking events on the connection.
    Watch {
        resource_type: ResourceType,
        resource_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// One response line. Events from watches are interleaved as `{"event": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Booking(Booking),
    Page(BookingPage),
    Free(Vec<Span>),
    Units(u32),
    Watching(ResourceKey),
    Event(Event),
    Error(ErrorBody),
}

impl From<EngineError> for Reply {
    fn from(e: EngineError) -> Self {
        Reply::Error(ErrorBody {
            code: e.code().to_string(),
            message: e.to_string(),
            retryable: e.is_retryable(),
        })
    }
}

impl Reply {
    fn malformed(message: String) -> Self {
        Reply::Error(ErrorBody {
            code: "invalid_request".into(),
            message,
            retryable: false,
        })
    }
}

/// Per-connection watch forwarders, keyed by resource.
struct Watches {
    tasks: HashMap<ResourceKey, JoinHandle<()>>,
    events_tx: mpsc::Sender<Event>,
}

impl Watches {
    fn add(&mut self, resource: ResourceKey, mut rx: broadcast::Receiver<Event>) {
        let tx = self.events_tx.clone();
        let key = resource.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("watcher on {key} lagged, {n} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.insert(resource, task);
    }
}

impl Drop for Watches {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort();
        }
    }
}

async fn handle_request(engine: &Engine, req: Request, watches: &mut Watches) -> Result<Reply, EngineError> {
    match req {
        Request::Create {
            caller,
            resource_type,
            resource_id,
            window,
        } => {
            let request = NewBooking {
                resource: ResourceKey::new(resource_type, resource_id),
                window,
            };
            engine.create_booking(&caller, request).await.map(Reply::Booking)
        }
        Request::Cancel { caller, id, reason } => {
            engine.cancel_booking(&caller, id, reason).await.map(Reply::Booking)
        }
        Request::Confirm { caller, id } => engine.confirm_booking(&caller, id).await.map(Reply::Booking),
        Request::Complete { caller, id } => engine.complete_booking(&caller, id).await.map(Reply::Booking),
        Request::Get { id } => engine.get_booking(id).map(Reply::Booking),
        Request::List { filter } => engine.list_bookings(&filter).map(Reply::Page),
        Request::Availability {
            resource_type,
            resource_id,
            start,
            end,
        } => {
            let resource = ResourceKey::new(resource_type, resource_id);
            if !resource_type.is_time_based() {
                return engine.remaining_units(&resource).await.map(Reply::Units);
            }
            match (start, end) {
                (Some(start), Some(end)) if start < end => engine
                    .availability(&resource, Span::new(start, end))
                    .await
                    .map(Reply::Free),
                (Some(_), Some(_)) => Err(EngineError::InvalidInput("window start must be before end")),
                _ => Err(EngineError::InvalidInput("availability needs start and end")),
            }
        }
        Request::Watch {
            resource_type,
            resource_id,
        } => {
            let resource = ResourceKey::new(resource_type, resource_id);
            if !watches.tasks.contains_key(&resource) {
                if watches.tasks.len() >= MAX_WATCHES_PER_CONNECTION {
                    return Err(EngineError::InvalidInput("too many watches on connection"));
                }
                let rx = engine.watch(&resource)?;
                watches.add(resource.clone(), rx);
            }
            Ok(Reply::Watching(resource))
        }
    }
}

async fn dispatch(engine: &Engine, line: &str, watches: &mut Watches) -> Reply {
    let req: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => "unknown", "status" => "error").increment(1);
            return Reply::malformed(e.to_string());
        }
    };
    let op = op_label(&req);
    let start = Instant::now();
    let result = handle_request(engine, req, watches).await;
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op).record(start.elapsed().as_secs_f64());
    match result {
        Ok(reply) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => "ok").increment(1);
            reply
        }
        Err(e) => {
            debug!("{op} failed: {e}");
            metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => "error").increment(1);
            e.into()
        }
    }
}

/// Serve one client: newline-delimited JSON requests in, one reply line per
/// request out, with watched events interleaved between replies.
pub async fn process_connection<S>(stream: S, engine: Arc<Engine>) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (events_tx, mut events_rx) = mpsc::channel::<Event>(256);
    let mut watches = Watches {
        tasks: HashMap::new(),
        events_tx,
    };

    loop {
        tokio::select! {
            line = framed.next() => {
                let reply = match line {
                    None => break,
                    Some(Ok(line)) if line.trim().is_empty() => continue,
                    Some(Ok(line)) => dispatch(&engine, &line, &mut watches).await,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        EngineError::InvalidInput("request line too long").into()
                    }
                    Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
                };
                framed.send(serde_json::to_string(&reply)?).await?;
            }
            Some(event) = events_rx.recv() => {
                framed.send(serde_json::to_string(&Reply::Event(event))?).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_request() {
        let line = r#"{"op":"create","caller":{"customer_ref":"alice"},"resource_type":"homestay","resource_id":"H1","window":{"time":{"start":10,"end":20}}}"#;
        let req: Request = serde_json::from_str(line).unwrap();
        assert_eq!(
            req,
            Request::Create {
                caller: Caller::customer("alice"),
                resource_type: ResourceType::Homestay,
                resource_id: "H1".into(),
                window: Window::Time(Span::new(10, 20)),
            }
        );
        assert_eq!(op_label(&req), "create");
    }

    #[test]
    fn list_filter_defaults() {
        let req: Request = serde_json::from_str(r#"{"op":"list"}"#).unwrap();
        assert_eq!(
            req,
            Request::List {
                filter: BookingFilter::default()
            }
        );

        let req: Request =
            serde_json::from_str(r#"{"op":"list","filter":{"status":"pending","page":2}}"#).unwrap();
        let Request::List { filter } = req else {
            panic!("expected list");
        };
        assert_eq!(filter.status, Some(BookingStatus::Pending));
        assert_eq!(filter.page, 2);
        assert_eq!(filter.limit, crate::limits::DEFAULT_PAGE_LIMIT);
    }

    #[test]
    fn unknown_op_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"drop_table"}"#).is_err());
    }

    #[test]
    fn error_reply_shape() {
        let reply: Reply = EngineError::Forbidden("caller may not cancel this booking").into();
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["error"]["code"], "forbidden");
        assert_eq!(json["error"]["retryable"], false);

        let reply: Reply = EngineError::StorageFailure("disk full".into()).into();
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["error"]["code"], "storage_failure");
        assert_eq!(json["error"]["retryable"], true);
    }
}
