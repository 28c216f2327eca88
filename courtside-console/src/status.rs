use std::convert::Infallible;
use async_stream::stream;
use courtside_lib::{Context, Event};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;
use warp::{Filter, Rejection, Reply, sse::{self, keep_alive, reply}};

/// `GET /health` and `GET /events` (server-sent events, one JSON
/// [`Event`] per frame).
pub fn status_routes(
    ctx: Context,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let health = warp::get().and(warp::path!("health")).map(|| "OK");

    let events = warp::get()
        .and(warp::path!("events"))
        .map(move || {
            // subscribe per client, inside the closure
            let mut rx = ctx.subscribe();
            info!("SSE client connected");
            let event_stream = stream! {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            let frame = sse::Event::default().event(kind(&event));
                            match frame.json_data(&event) {
                                Ok(frame) => yield Ok::<_, Infallible>(frame),
                                Err(e) => warn!("Skipping unserializable event: {}", e),
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("SSE client lagged, dropped {} events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            };
            reply(keep_alive().stream(event_stream))
        });

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["OPTIONS", "GET"])
        .allow_headers(vec!["content-type", "accept", "last-event-id", "origin"]);

    health.or(events).with(cors)
}

fn kind(event: &Event) -> &'static str {
    match event {
        Event::Status { .. } => "status",
        Event::Log { .. } => "log",
        Event::Token { .. } => "token",
        Event::Catalog(_) => "catalog",
        Event::NowPlaying(_) => "nowPlaying",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtside_lib::PairingState;

    #[tokio::test]
    async fn health_answers_ok() {
        let res = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&status_routes(Context::new(4)))
            .await;
        assert_eq!(res.status(), 200);
        assert_eq!(res.body(), "OK");
    }

    #[test]
    fn sse_event_names_follow_the_payload_tag() {
        let event = Event::Status { state: PairingState::Open, message: "connected".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], kind(&event));
    }
}
