use std::convert::Infallible;
use courtside_lib::Context;
use futures_util::{SinkExt, StreamExt, future::select};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::UnboundedSender;
use warp::{Filter, Rejection, Reply, ws::{Message as WsMsg, WebSocket}};

use crate::driver::ControlRequest;

/// Cloneable filter handing each connection the shared context
fn with_ctx(ctx: Context) -> impl Filter<Extract = (Context,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn with_requests(
    requests: UnboundedSender<ControlRequest>,
) -> impl Filter<Extract = (UnboundedSender<ControlRequest>,), Error = Infallible> + Clone {
    warp::any().map(move || requests.clone())
}

/// Build the WebSocket route under `/control`
pub fn control_routes(
    ctx: Context,
    requests: UnboundedSender<ControlRequest>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    // allow CORS for WS handshake
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "OPTIONS"])
        .allow_headers(vec!["sec-websocket-protocol", "origin", "upgrade"]);

    warp::path("control")
        .and(warp::ws())
        .and(with_ctx(ctx))
        .and(with_requests(requests))
        .map(|ws: warp::ws::Ws, ctx, requests| {
            ws.on_upgrade(move |socket| handle_ws(socket, ctx, requests))
        })
        .with(cors)
}

async fn handle_ws(ws: WebSocket, ctx: Context, requests: UnboundedSender<ControlRequest>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut rx = ctx.subscribe();
    info!("Control client connected");

    // Incoming from client → driver
    let inbound = async {
        while let Some(Ok(msg)) = ws_rx.next().await {
            let Ok(txt) = msg.to_str() else { continue };
            match serde_json::from_str::<ControlRequest>(txt) {
                Ok(request) => {
                    if requests.send(request).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Bad control frame: {}", e),
            }
        }
    };

    // Session events → client (TEXT frames)
    let outbound = async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let Ok(txt) = serde_json::to_string(&event) else { continue };
                    if ws_tx.send(WsMsg::text(txt)).await.is_err() {
                        break; // client disconnected
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Control client lagged, dropped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    // Run inbound and outbound until one finishes
    select(Box::pin(inbound), Box::pin(outbound)).await;
    info!("Control client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtside_lib::{Event, PairingState};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let ctx = Context::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let routes = control_routes(ctx.clone(), tx);

        let mut client = warp::test::ws().path("/control").handshake(routes).await.unwrap();

        client.send_text(r#"{"action":"createOffer"}"#).await;
        assert_eq!(rx.recv().await, Some(ControlRequest::CreateOffer));

        ctx.publish(Event::Status { state: PairingState::Open, message: "connected".into() });
        let frame = client.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(frame.to_str().unwrap()).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["payload"]["state"], "open");
    }
}
