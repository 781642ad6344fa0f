// Binance USD-M futures adapter: REST depth snapshot + combined depth diff stream

use std::time::Duration;

use futures::{stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

use super::binance_types::{ApiError, WsCommandReply, WsEnvelope};
use super::{FeedMessage, FeedStream, FeedTransport, SnapshotProvider};
use crate::market_data::normaliser::Normaliser;
use crate::market_data::types::{Snapshot, SnapshotFetchError, TransportError, WireSnapshot};

pub const DEFAULT_REST_URL: &str = "https://fapi.binance.com";
pub const DEFAULT_WS_URL: &str = "wss://fstream.binance.com";

/// Name of the diff depth stream for a symbol, e.g. `btcusdt@depth`.
pub fn depth_stream_key(symbol: &str) -> String {
    format!("{}@depth", symbol.to_lowercase())
}

pub struct BinanceSnapshotProvider {
    pub rest_url: String, // "https://fapi.binance.com"
    pub limit: u32,       // levels per side, max 1000
    normaliser: Normaliser,
    client: reqwest::Client,
}

impl BinanceSnapshotProvider {
    pub fn new(rest_url: &str, limit: u32, normaliser: Normaliser, timeout: Duration) -> Result<Self, SnapshotFetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("depthsync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| SnapshotFetchError::Network(e.to_string()))?;
        Ok(Self { rest_url: rest_url.trim_end_matches('/').to_string(), limit, normaliser, client })
    }

    pub fn depth_url(&self, symbol: &str) -> String {
        format!("{}/fapi/v1/depth?symbol={}&limit={}", self.rest_url, symbol.to_uppercase(), self.limit)
    }
}

/// Decode a snapshot body. Any bad level fails the whole snapshot.
pub fn parse_snapshot_body(body: &str, normaliser: &Normaliser) -> Result<Snapshot, SnapshotFetchError> {
    let wire: WireSnapshot = serde_json::from_str(body).map_err(|e| SnapshotFetchError::Parse(e.to_string()))?;
    Ok(normaliser.snapshot(&wire)?)
}

#[async_trait::async_trait]
impl SnapshotProvider for BinanceSnapshotProvider {
    #[instrument(skip(self))]
    async fn fetch(&self, symbol: &str) -> Result<Snapshot, SnapshotFetchError> {
        let url = self.depth_url(symbol);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SnapshotFetchError::Network(e.to_string()))?;

        let status = res.status();
        let body = res.text().await.map_err(|e| SnapshotFetchError::Network(e.to_string()))?;
        if !status.is_success() {
            if let Ok(api) = serde_json::from_str::<ApiError>(&body) {
                warn!(status = status.as_u16(), code = api.code, msg = %api.msg, "Depth snapshot rejected");
            }
            return Err(SnapshotFetchError::Status(status.as_u16()));
        }

        let snapshot = parse_snapshot_body(&body, &self.normaliser)?;
        info!(
            last_update_id = snapshot.last_update_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Depth snapshot fetched"
        );
        Ok(snapshot)
    }
}

pub struct BinanceFeed {
    pub ws_url: String, // "wss://fstream.binance.com"
    pub connect_timeout: Duration,
}

impl BinanceFeed {
    pub fn new(ws_url: &str, connect_timeout: Duration) -> Self {
        Self { ws_url: ws_url.trim_end_matches('/').to_string(), connect_timeout }
    }

    pub fn stream_url(&self, stream_key: &str) -> String {
        format!("{}/stream?streams={}", self.ws_url, stream_key)
    }
}

/// Map one text frame to a feed message. Command replies and undecodable
/// frames yield `None`.
pub fn decode_frame(text: &str) -> Option<FeedMessage> {
    match serde_json::from_str::<WsEnvelope>(text) {
        Ok(env) => Some(FeedMessage::Message { stream: env.stream, payload: env.data }),
        Err(e) => {
            if let Ok(reply) = serde_json::from_str::<WsCommandReply>(text) {
                debug!(id = reply.id, result = ?reply.result, "Command reply");
            } else {
                warn!(error = %e, len = text.len(), "Dropping undecodable frame");
                metrics::counter!("depthsync_malformed_events_total").increment(1);
            }
            None
        }
    }
}

#[async_trait::async_trait]
impl FeedTransport for BinanceFeed {
    #[instrument(skip(self))]
    async fn open(&self, stream_key: &str) -> Result<FeedStream, TransportError> {
        let url = self.stream_url(stream_key);
        let connect = tokio_tungstenite::connect_async(url.as_str());
        let (ws_stream, response) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| TransportError::Connect {
                url: url.clone(),
                reason: format!("timed out after {:?}", self.connect_timeout),
            })?
            .map_err(|e| TransportError::Connect { url: url.clone(), reason: e.to_string() })?;
        info!(%url, status = %response.status(), "Connected to depth stream");

        // Pings are answered by tungstenite while the stream is polled.
        let frames = ws_stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => decode_frame(&text),
                Ok(Message::Close(frame)) => {
                    info!(?frame, "WebSocket connection closed by server");
                    Some(FeedMessage::Closed)
                }
                Ok(_) => None,
                Err(e) => Some(FeedMessage::Error(e.to_string())),
            }
        });

        Ok(stream::once(async { FeedMessage::Opened }).chain(frames).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::PriceLevel;

    #[test]
    fn test_depth_stream_key() {
        assert_eq!(depth_stream_key("BTCUSDT"), "btcusdt@depth");
        assert_eq!(depth_stream_key("1000pepeusdt"), "1000pepeusdt@depth");
    }

    #[test]
    fn test_urls() {
        let provider =
            BinanceSnapshotProvider::new("https://fapi.binance.com/", 1000, Normaliser::new(2, 3), Duration::from_secs(5))
                .unwrap();
        assert_eq!(provider.depth_url("btcusdt"), "https://fapi.binance.com/fapi/v1/depth?symbol=BTCUSDT&limit=1000");

        let feed = BinanceFeed::new(DEFAULT_WS_URL, Duration::from_secs(5));
        assert_eq!(feed.stream_url("btcusdt@depth"), "wss://fstream.binance.com/stream?streams=btcusdt@depth");
    }

    #[tokio::test]
    async fn test_open_times_out_on_silent_endpoint() {
        // accepts TCP but never answers the websocket handshake
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        let feed = BinanceFeed::new(&format!("ws://{addr}"), Duration::from_millis(100));
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(5), feed.open("btcusdt@depth")).await.unwrap();
        match result {
            Err(TransportError::Connect { reason, .. }) => assert!(reason.contains("timed out")),
            Err(other) => panic!("unexpected {:?}", other),
            Ok(_) => panic!("handshake should not complete"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_decode_depth_frame() {
        let text = r#"{"stream":"btcusdt@depth","data":{"e":"depthUpdate","U":1,"u":2,"pu":0,"b":[],"a":[]}}"#;
        match decode_frame(text) {
            Some(FeedMessage::Message { stream, payload }) => {
                assert_eq!(stream, "btcusdt@depth");
                assert_eq!(payload["u"], 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_ignores_command_reply_and_garbage() {
        assert_eq!(decode_frame(r#"{"result":null,"id":1}"#), None);
        assert_eq!(decode_frame("not json"), None);
    }

    #[test]
    fn test_parse_snapshot_body() {
        let n = Normaliser::new(2, 3);
        let body = r#"{"lastUpdateId":42,"E":1,"T":1,"bids":[["100.10","1.500"]],"asks":[["100.20","0.250"]]}"#;
        let snap = parse_snapshot_body(body, &n).unwrap();
        assert_eq!(snap.last_update_id, 42);
        assert_eq!(snap.bids, vec![PriceLevel::new(10_010, 1_500)]);
        assert_eq!(snap.asks, vec![PriceLevel::new(10_020, 250)]);
    }

    #[test]
    fn test_parse_snapshot_body_rejects_partial_data() {
        let n = Normaliser::new(2, 3);
        let body = r#"{"lastUpdateId":42,"bids":[["100.10","1.500"],["bad","1"]],"asks":[]}"#;
        assert!(matches!(parse_snapshot_body(body, &n), Err(SnapshotFetchError::Parse(_))));
        assert!(matches!(parse_snapshot_body("{}", &n), Err(SnapshotFetchError::Parse(_))));
    }
}
