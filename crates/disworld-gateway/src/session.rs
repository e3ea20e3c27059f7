use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use disworld_types::events::{
    BotEvent, GatewayPayload, Hello, OP_DISPATCH, OP_HEARTBEAT, OP_HEARTBEAT_ACK, OP_HELLO,
    OP_INVALID_SESSION, OP_RECONNECT,
};

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 60;
/// A session that lasted this long counts as healthy and resets the backoff.
const HEALTHY_UPTIME: Duration = Duration::from_secs(120);

/// Close codes after which reconnecting cannot help.
const FATAL_CLOSE_CODES: &[u16] = &[4004, 4010, 4011, 4012, 4013, 4014];

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("websocket: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("bad gateway payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("gateway closed with fatal code {0}")]
    Fatal(u16),
    #[error("{0}")]
    Protocol(&'static str),
}

/// How a single session ended.
enum SessionEnd {
    /// Gateway asked us to reconnect, or the socket dropped.
    Reconnect,
    /// The event receiver is gone; the bot is shutting down.
    Shutdown,
}

/// Keep a gateway session alive, forwarding decoded dispatches to `events`.
///
/// Returns only when the receiver is dropped or the gateway rejects us for
/// good (bad token, disallowed intents).
pub async fn run(token: String, intents: u64, events: mpsc::Sender<BotEvent>) -> Result<(), SessionError> {
    let mut backoff_secs = INITIAL_BACKOFF_SECS;

    loop {
        let started = Instant::now();
        match run_session(&token, intents, &events).await {
            Ok(SessionEnd::Shutdown) => {
                info!("Event receiver closed, gateway session stopping");
                return Ok(());
            }
            Ok(SessionEnd::Reconnect) => {
                backoff_secs = INITIAL_BACKOFF_SECS;
                info!("Gateway requested reconnect");
            }
            Err(SessionError::Fatal(code)) => {
                error!("Gateway rejected the session (close code {})", code);
                return Err(SessionError::Fatal(code));
            }
            Err(e) => {
                backoff_secs = retry_delay(backoff_secs, started.elapsed());
                warn!("Gateway session failed (retry in {}s): {}", backoff_secs, e);
            }
        }

        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
        backoff_secs = next_backoff(backoff_secs);
    }
}

/// Delay before retrying a failed session. Failures before a long healthy
/// run don't count against the next attempt.
fn retry_delay(backoff_secs: u64, uptime: Duration) -> u64 {
    if uptime >= HEALTHY_UPTIME {
        INITIAL_BACKOFF_SECS
    } else {
        backoff_secs
    }
}

fn next_backoff(backoff_secs: u64) -> u64 {
    (backoff_secs * 2).min(MAX_BACKOFF_SECS)
}

fn is_fatal_close(code: u16) -> bool {
    FATAL_CLOSE_CODES.contains(&code)
}

async fn run_session(
    token: &str,
    intents: u64,
    events: &mpsc::Sender<BotEvent>,
) -> Result<SessionEnd, SessionError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(GATEWAY_URL).await?;
    let (mut write, mut read) = ws_stream.split();

    // Step 1: HELLO carries the heartbeat interval
    let hello = match read.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str::<GatewayPayload>(&text)?,
        Some(Ok(_)) => return Err(SessionError::Protocol("expected HELLO as text frame")),
        Some(Err(e)) => return Err(e.into()),
        None => return Err(SessionError::Protocol("socket closed before HELLO")),
    };
    if hello.op != OP_HELLO {
        return Err(SessionError::Protocol("first payload was not HELLO"));
    }
    let hello: Hello = serde_json::from_value(hello.d)?;
    debug!("Gateway HELLO, heartbeat every {}ms", hello.heartbeat_interval);

    // Step 2: IDENTIFY
    let identify = serde_json::to_string(&GatewayPayload::identify(token, intents))?;
    write.send(Message::Text(identify.into())).await?;

    let mut heartbeat = tokio::time::interval(Duration::from_millis(hello.heartbeat_interval));
    heartbeat.tick().await;
    let mut acked = true;
    let mut seq: Option<u64> = None;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if !acked {
                    warn!("Heartbeat not acknowledged, dropping zombie connection");
                    return Ok(SessionEnd::Reconnect);
                }
                acked = false;
                let beat = serde_json::to_string(&GatewayPayload::heartbeat(seq))?;
                write.send(Message::Text(beat.into())).await?;
            }
            msg = read.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code)).unwrap_or(1000);
                        if is_fatal_close(code) {
                            return Err(SessionError::Fatal(code));
                        }
                        info!("Gateway closed the connection (code {})", code);
                        return Ok(SessionEnd::Reconnect);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(SessionEnd::Reconnect),
                };

                let payload: GatewayPayload = match serde_json::from_str(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("Undecodable gateway payload: {} -- raw: {}", e, raw);
                        continue;
                    }
                };

                match payload.op {
                    OP_DISPATCH => {
                        if payload.s.is_some() {
                            seq = payload.s;
                        }
                        let Some(name) = payload.t else { continue };
                        match BotEvent::from_dispatch(&name, payload.d) {
                            Ok(Some(event)) => {
                                if events.send(event).await.is_err() {
                                    return Ok(SessionEnd::Shutdown);
                                }
                            }
                            Ok(None) => {}
                            Err(e) => warn!("Failed to decode {} dispatch: {}", name, e),
                        }
                    }
                    OP_HEARTBEAT => {
                        let beat = serde_json::to_string(&GatewayPayload::heartbeat(seq))?;
                        write.send(Message::Text(beat.into())).await?;
                    }
                    OP_HEARTBEAT_ACK => acked = true,
                    OP_RECONNECT | OP_INVALID_SESSION => return Ok(SessionEnd::Reconnect),
                    other => debug!("Ignoring gateway opcode {}", other),
                }
            }
        }
    }
}
